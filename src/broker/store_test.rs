use super::*;

use crate::EndpointId;

fn entity() -> EntityId {
    EntityId::new(EndpointId::generate(), 1)
}

#[test]
fn test_memory_backend() {
    let mut backend = MemoryBackend::default();
    assert!(backend.is_empty());

    assert_eq!(backend.insert("a".into(), "1".into(), None), None);
    assert_eq!(backend.insert("a".into(), "2".into(), None), Some("1".into()));
    assert_eq!(backend.get(&"a".into()), Some(&Data::from("2")));
    assert_eq!(backend.len(), 1);

    backend.insert("b".into(), "3".into(), None);
    assert_eq!(backend.snapshot().len(), 2);

    assert_eq!(backend.remove(&"a".into()), Some("2".into()));
    assert_eq!(backend.remove(&"a".into()), None);

    backend.restore(vec![("x".into(), "y".into())]);
    assert_eq!(backend.len(), 1);
    assert_eq!(backend.clear(), vec![Data::from("x")]);
    assert!(backend.is_empty());
}

#[test]
fn test_event_encoding() {
    let publisher = entity();
    let event = StoreEvent::Insert {
        store: "foo".to_string(),
        key: "hello".into(),
        value: "world".into(),
        expiry: None,
        publisher,
    };
    assert_eq!(StoreEvent::from_data(&event.to_data()), Some(event.clone()));
    let shown = event.to_string();
    assert!(shown.starts_with("insert(foo, hello, world, none, "), "{}", shown);

    let event = StoreEvent::Update {
        store: "foo".to_string(),
        key: "hello".into(),
        old: "world".into(),
        value: "universe".into(),
        expiry: Some(time::Duration::from_millis(500)),
        publisher,
    };
    assert_eq!(StoreEvent::from_data(&event.to_data()), Some(event));

    // an invalid publisher occupies its two slots with nils.
    let event = StoreEvent::Erase {
        store: "foo".to_string(),
        key: "hello".into(),
        publisher: EntityId::invalid(),
    };
    match event.to_data() {
        Data::Vector(xs) => {
            assert_eq!(xs.len(), 5);
            assert_eq!(xs[3], Data::Nil);
            assert_eq!(xs[4], Data::Nil);
        }
        _ => unreachable!(),
    }
    assert_eq!(StoreEvent::from_data(&event.to_data()), Some(event.clone()));
    assert_eq!(event.to_string(), "erase(foo, hello, none)");

    // not an event.
    assert_eq!(StoreEvent::from_data(&Data::from("nope")), None);
    assert_eq!(StoreEvent::from_data(&Data::Vector(vec!["insert".into()])), None);
}

#[test]
fn test_master_apply() {
    let publisher = entity();
    let mut master = MasterStore::new("foo", "test", publisher);

    let mut effects = Vec::new();
    let cmd = InternalCommand::Put {
        key: "hello".into(),
        value: "world".into(),
        expiry: None,
        publisher,
    };
    master.apply(cmd, &mut effects);
    assert_eq!(effects.len(), 2);
    match &effects[0] {
        Effect::PublishData(msg) => {
            assert_eq!(msg.topic, Topic::store_events());
            let event = StoreEvent::from_data(&msg.data).unwrap();
            assert!(matches!(event, StoreEvent::Insert { .. }));
        }
        Effect::PublishCommand(_) => unreachable!(),
    }
    match &effects[1] {
        Effect::PublishCommand(msg) => {
            assert_eq!(msg.topic, Topic::clone_for("foo"));
            assert!(matches!(msg.cmd, InternalCommand::Put { .. }));
        }
        Effect::PublishData(_) => unreachable!(),
    }
    assert_eq!(master.get(&"hello".into()).unwrap(), Data::from("world"));

    // same key again observes an update.
    let mut effects = Vec::new();
    let cmd = InternalCommand::Put {
        key: "hello".into(),
        value: "universe".into(),
        expiry: None,
        publisher,
    };
    master.apply(cmd, &mut effects);
    match &effects[0] {
        Effect::PublishData(msg) => {
            let event = StoreEvent::from_data(&msg.data).unwrap();
            match event {
                StoreEvent::Update { old, value, .. } => {
                    assert_eq!(old, Data::from("world"));
                    assert_eq!(value, Data::from("universe"));
                }
                event => panic!("unexpected {:?}", event),
            }
        }
        Effect::PublishCommand(_) => unreachable!(),
    }

    // erasing a missing key produces nothing.
    let mut effects = Vec::new();
    master.apply(InternalCommand::Erase { key: "nope".into(), publisher }, &mut effects);
    assert!(effects.is_empty());

    // clear erases every remaining key.
    master.apply(InternalCommand::Clear { publisher }, &mut effects);
    assert_eq!(effects.len(), 2); // one erase event plus the replication
    match &effects[0] {
        Effect::PublishData(msg) => {
            let event = StoreEvent::from_data(&msg.data).unwrap();
            assert!(matches!(event, StoreEvent::Erase { .. }));
        }
        Effect::PublishCommand(_) => unreachable!(),
    }
    assert_eq!(master.len(), 0);
    assert_eq!(master.get(&"hello".into()).unwrap_err().kind(), ErrorKind::NoSuchKey);
}

#[test]
fn test_master_snapshot() {
    let publisher = entity();
    let mut master = MasterStore::new("foo", "test", publisher);

    let mut effects = Vec::new();
    let cmd = InternalCommand::Put {
        key: "k".into(),
        value: "v".into(),
        expiry: None,
        publisher,
    };
    master.apply(cmd, &mut effects);

    let mut effects = Vec::new();
    master.apply(InternalCommand::SnapshotRequest { requester: publisher }, &mut effects);
    assert_eq!(effects.len(), 1);
    match &effects[0] {
        Effect::PublishCommand(msg) => {
            assert_eq!(msg.topic, Topic::clone_for("foo"));
            match &msg.cmd {
                InternalCommand::SnapshotResponse { entries } => {
                    assert_eq!(entries, &vec![(Data::from("k"), Data::from("v"))]);
                }
                cmd => panic!("unexpected {:?}", cmd),
            }
        }
        Effect::PublishData(_) => unreachable!(),
    }
}

#[test]
fn test_clone_apply() {
    let publisher = entity();
    let mut clone = CloneStore::new("foo", "test", publisher);

    clone.apply(InternalCommand::SnapshotResponse {
        entries: vec![("a".into(), "1".into())],
    });
    assert_eq!(clone.get(&"a".into()).unwrap(), Data::from("1"));

    let cmd = InternalCommand::Put {
        key: "b".into(),
        value: "2".into(),
        expiry: None,
        publisher,
    };
    clone.apply(cmd);
    assert_eq!(clone.len(), 2);

    clone.apply(InternalCommand::Erase { key: "a".into(), publisher });
    assert_eq!(clone.get(&"a".into()).unwrap_err().kind(), ErrorKind::NoSuchKey);

    clone.apply(InternalCommand::Clear { publisher });
    assert_eq!(clone.len(), 0);
}
