use super::*;

use std::fs;

use crate::broker::store::StoreEvent;

fn config(name: &str) -> Config {
    Config { name: name.to_string(), ..Config::default() }
}

fn events(sub: &Subscriber) -> Vec<String> {
    sub.try_recvs()
        .take_values()
        .iter()
        .map(|msg| StoreEvent::from_data(&msg.data).unwrap().to_string())
        .collect()
}

#[test]
fn test_local_master() {
    let mut ep = Endpoint::from_config(config("e1")).unwrap();
    let logger = ep.subscribe(Filter::from(vec![Topic::store_events()])).unwrap();
    ep.attach_master("foo").unwrap();

    ep.put("foo", "hello".into(), "world".into(), None).unwrap();
    assert_eq!(ep.get("foo", &"hello".into()).unwrap(), Data::from("world"));

    // a put command published on the master topic reaches the store.
    let cmd = InternalCommand::Put {
        key: "hello".into(),
        value: "universe".into(),
        expiry: None,
        publisher: EntityId::invalid(),
    };
    ep.publish_command(Topic::master_for("foo"), cmd);
    assert_eq!(ep.get("foo", &"hello".into()).unwrap(), Data::from("universe"));

    ep.clear("foo").unwrap();
    let err = ep.get("foo", &"hello".into()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchKey);

    let log = events(&logger);
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("insert(foo, hello, world, none, "), "{}", log[0]);
    assert!(log[1].starts_with("update(foo, hello, world, universe, none, "), "{}", log[1]);
    assert!(log[2].starts_with("erase(foo, hello, "), "{}", log[2]);
}

#[test]
fn test_subscriber_mailbox() {
    let mut ep = Endpoint::from_config(config("e1")).unwrap();
    let sub = ep.subscribe(Filter::from(vec![Topic::from("x")])).unwrap();
    assert!(sub.descriptor() >= 0);

    // locally published messages are delivered to local subscribers.
    ep.publish(Topic::from("x/1"), "ping".into());
    ep.publish(Topic::from("y/1"), "nope".into());

    let msgs = sub.try_recvs().take_values();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].topic, Topic::from("x/1"));
    assert_eq!(msgs[0].data, Data::from("ping"));
}

#[test]
fn test_store_errors() {
    let mut ep = Endpoint::from_config(config("e1")).unwrap();

    assert_eq!(
        ep.get("nope", &"k".into()).unwrap_err().kind(),
        ErrorKind::InvalidInput
    );
    let err = ep.put("nope", "k".into(), "v".into(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    ep.attach_master("foo").unwrap();
    assert!(ep.attach_master("foo").is_err());
    assert!(ep.attach_clone("foo").is_err());
}

#[test]
fn test_recording_published_messages() {
    let dir = std::env::temp_dir().join(format!("meshmq-ep-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();

    let mut cfg = config("e1");
    cfg.recording_directory = dir.to_str().unwrap().to_string();
    let mut ep = Endpoint::from_config(cfg).unwrap();

    ep.publish(Topic::from("a"), "1".into());
    ep.publish(Topic::from("b"), "2".into());

    let contents = fs::read_to_string(dir.join("messages.dat")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("data\ta\t"));

    fs::remove_dir_all(&dir).ok();
}
