use super::*;

use crate::broker::store::StoreEvent;
use crate::broker::Subscriber;

fn init_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

fn routable(name: &str) -> Config {
    Config { name: name.to_string(), ..Config::default() }
}

fn leaf(name: &str) -> Config {
    Config { name: name.to_string(), forward: false, ..Config::default() }
}

fn filter(topics: &[&str]) -> Filter {
    let topics: Vec<Topic> = topics.iter().map(|t| Topic::from(*t)).collect();
    Filter::from(topics)
}

fn received(sub: &Subscriber) -> Vec<(Topic, Data)> {
    let msgs = sub.try_recvs().take_values();
    msgs.into_iter().map(|m| (m.topic, m.data)).collect()
}

fn events(sub: &Subscriber) -> Vec<String> {
    sub.try_recvs()
        .take_values()
        .iter()
        .map(|msg| StoreEvent::from_data(&msg.data).unwrap().to_string())
        .collect()
}

#[test]
fn test_peering_is_idempotent() {
    init_logging();
    let mut ov = Overlay::new("idem");
    let a = ov.spawn(routable("a")).unwrap();
    let b = ov.spawn(routable("b")).unwrap();

    ov.peer(a, b).unwrap();
    assert_eq!(ov.endpoint(a).unwrap().peers(), vec![b]);
    assert_eq!(ov.endpoint(b).unwrap().peers(), vec![a]);
    let statuses = ov.take_statuses(a);
    assert!(statuses.contains(&Status::PeerAdded { peer: b }));
    assert!(ov.take_statuses(b).contains(&Status::PeerAdded { peer: a }));

    // repeated peering, from either side, succeeds without extra paths.
    ov.peer(a, b).unwrap();
    ov.peer(b, a).unwrap();
    assert_eq!(ov.endpoint(a).unwrap().peers(), vec![b]);
    assert_eq!(ov.endpoint(b).unwrap().peers(), vec![a]);
}

#[test]
fn test_peer_unavailable() {
    init_logging();
    let mut ov = Overlay::new("down");
    let a = ov.spawn(routable("a")).unwrap();
    let ghost = EndpointId::generate();

    let err = ov.peer(a, ghost).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PeerUnavailable);
    let statuses = ov.take_statuses(a);
    assert!(statuses
        .iter()
        .any(|s| matches!(s, Status::PeerUnavailable { peer, .. } if peer == &ghost)));
}

#[test]
fn test_endpoint_death_notifies_peers() {
    init_logging();
    let mut ov = Overlay::new("death");
    let a = ov.spawn(routable("a")).unwrap();
    let b = ov.spawn(routable("b")).unwrap();
    ov.peer(a, b).unwrap();
    ov.take_statuses(a);

    ov.remove(b, ErrorKind::Disconnected);
    let statuses = ov.take_statuses(a);
    assert!(statuses
        .iter()
        .any(|s| matches!(s, Status::PeerLost { peer, .. } if peer == &b)));
    assert!(ov.endpoint(a).unwrap().peers().is_empty());
}

#[test]
fn test_shutdown_removes_endpoint() {
    init_logging();
    let mut ov = Overlay::new("bye");
    let a = ov.spawn(routable("a")).unwrap();
    let b = ov.spawn(routable("b")).unwrap();
    ov.peer(a, b).unwrap();
    ov.take_statuses(b);

    ov.shutdown(a).unwrap();
    assert!(ov.endpoint(a).is_none());
    let statuses = ov.take_statuses(b);
    assert!(statuses
        .iter()
        .any(|s| matches!(s, Status::PeerLost { peer, .. } if peer == &a)));
}

#[test]
fn test_master_with_remote_clone() {
    init_logging();
    let mut ov = Overlay::new("stores");
    let earth = ov.spawn(routable("earth")).unwrap();
    let mars = ov.spawn(routable("mars")).unwrap();

    let earth_log = ov.subscribe(earth, filter(&["store/events"])).unwrap();
    let mars_log = ov.subscribe(mars, filter(&["store/events"])).unwrap();

    ov.peer(earth, mars).unwrap();
    ov.attach_master(earth, "foo").unwrap();
    ov.put(earth, "foo", "test".into(), Data::Integer(123)).unwrap();

    // the clone starts from a snapshot of the master.
    ov.attach_clone(mars, "foo").unwrap();
    assert_eq!(ov.get(mars, "foo", &"test".into()).unwrap(), Data::Integer(123));

    // a put through the clone is relayed to the master and replicated back.
    ov.put(mars, "foo", "user".into(), "neverlord".into()).unwrap();
    assert_eq!(ov.get(earth, "foo", &"user".into()).unwrap(), Data::from("neverlord"));
    assert_eq!(ov.get(mars, "foo", &"test".into()).unwrap(), Data::Integer(123));
    assert_eq!(ov.get(mars, "foo", &"user".into()).unwrap(), Data::from("neverlord"));

    for log in [events(&earth_log), events(&mars_log)].into_iter() {
        assert_eq!(log.len(), 2, "{:?}", log);
        assert!(log[0].starts_with("insert(foo, test, 123, none, "), "{}", log[0]);
        assert!(log[1].starts_with("insert(foo, user, neverlord, none, "), "{}", log[1]);
    }
}

#[test]
fn test_three_hop_chain() {
    init_logging();
    // n0 [a] -- n1 [b] -- n2 [c]
    let mut ov = Overlay::new("chain");
    let n0 = ov.spawn(leaf("n0")).unwrap();
    let n1 = ov.spawn(routable("n1")).unwrap();
    let n2 = ov.spawn(leaf("n2")).unwrap();

    ov.peer(n0, n1).unwrap();
    ov.peer(n1, n2).unwrap();
    assert_eq!(ov.endpoint(n0).unwrap().peers().len(), 1);
    assert_eq!(ov.endpoint(n1).unwrap().peers().len(), 2);
    assert_eq!(ov.endpoint(n2).unwrap().peers().len(), 1);

    let s0 = ov.subscribe(n0, filter(&["a"])).unwrap();
    let s1 = ov.subscribe(n1, filter(&["b"])).unwrap();
    let s2 = ov.subscribe(n2, filter(&["c"])).unwrap();

    for _ in 0..2 {
        ov.publish(n2, Topic::from("a"), "ping".into()).unwrap();
    }
    let msgs = received(&s0);
    assert_eq!(msgs.len(), 2);
    for (topic, data) in msgs.into_iter() {
        assert_eq!(topic, Topic::from("a"));
        assert_eq!(data, Data::from("ping"));
    }
    assert!(received(&s1).is_empty());
    assert!(received(&s2).is_empty());

    ov.publish(n0, Topic::from("c"), "pong".into()).unwrap();
    let msgs = received(&s2);
    assert_eq!(msgs, vec![(Topic::from("c"), Data::from("pong"))]);
    assert!(received(&s0).is_empty());
    assert!(received(&s1).is_empty());
}

#[test]
fn test_tree_routing() {
    init_logging();
    //       n0 [a]
    //       |
    //       n1 [b]
    //      /  \
    // [c] n2  n3 [b]
    //         |
    //         n4 [d]
    let mut ov = Overlay::new("tree");
    let n0 = ov.spawn(leaf("n0")).unwrap();
    let n1 = ov.spawn(routable("n1")).unwrap();
    let n2 = ov.spawn(leaf("n2")).unwrap();
    let n3 = ov.spawn(routable("n3")).unwrap();
    let n4 = ov.spawn(leaf("n4")).unwrap();

    ov.peer(n0, n1).unwrap();
    ov.peer(n1, n2).unwrap();
    ov.peer(n1, n3).unwrap();
    ov.peer(n3, n4).unwrap();

    let s0 = ov.subscribe(n0, filter(&["a"])).unwrap();
    let s1 = ov.subscribe(n1, filter(&["b"])).unwrap();
    let s2 = ov.subscribe(n2, filter(&["c"])).unwrap();
    let s3 = ov.subscribe(n3, filter(&["b"])).unwrap();
    let s4 = ov.subscribe(n4, filter(&["d"])).unwrap();

    ov.publish(n2, Topic::from("a"), "ping".into()).unwrap();
    assert_eq!(received(&s0).len(), 1);
    assert!(received(&s1).is_empty());
    assert!(received(&s2).is_empty());
    assert!(received(&s3).is_empty());
    assert!(received(&s4).is_empty());

    ov.publish(n0, Topic::from("d"), "pong".into()).unwrap();
    assert_eq!(received(&s4).len(), 1);
    assert!(received(&s2).is_empty());
    assert!(received(&s0).is_empty());
    assert!(received(&s1).is_empty());
    assert!(received(&s3).is_empty());
}

#[test]
fn test_partition_via_unpeer() {
    init_logging();
    //  n0 [a] - n1 [b] - n2 [c]
    //           |
    //           n3 [b] - n4 [d] - n5 [e]
    let mut ov = Overlay::new("split");
    let n0 = ov.spawn(leaf("n0")).unwrap();
    let n1 = ov.spawn(routable("n1")).unwrap();
    let n2 = ov.spawn(leaf("n2")).unwrap();
    let n3 = ov.spawn(routable("n3")).unwrap();
    let n4 = ov.spawn(routable("n4")).unwrap();
    let n5 = ov.spawn(leaf("n5")).unwrap();

    ov.peer(n0, n1).unwrap();
    ov.peer(n1, n2).unwrap();
    ov.peer(n1, n3).unwrap();
    ov.peer(n3, n4).unwrap();
    ov.peer(n4, n5).unwrap();

    let subs: Vec<Subscriber> = vec![
        ov.subscribe(n0, filter(&["a"])).unwrap(),
        ov.subscribe(n1, filter(&["b"])).unwrap(),
        ov.subscribe(n2, filter(&["c"])).unwrap(),
        ov.subscribe(n3, filter(&["b"])).unwrap(),
        ov.subscribe(n4, filter(&["d"])).unwrap(),
        ov.subscribe(n5, filter(&["e"])).unwrap(),
    ];

    // connected overlay: e-traffic crosses three forwarders.
    ov.publish(n0, Topic::from("e"), "ping".into()).unwrap();
    assert_eq!(received(&subs[5]).len(), 1);

    // unpeering n3 from n1 partitions the overlay.
    ov.unpeer(n3, n1).unwrap();
    assert!(ov.take_statuses(n3).contains(&Status::PeerRemoved { peer: n1 }));
    assert!(ov
        .take_statuses(n1)
        .iter()
        .any(|s| matches!(s, Status::PeerLost { peer, .. } if peer == &n3)));

    ov.publish(n0, Topic::from("e"), "ping".into()).unwrap();
    for sub in subs.iter() {
        assert!(received(sub).is_empty());
    }
}

#[test]
fn test_cluster_broadcast() {
    init_logging();
    // A typical cluster setting: n0 connected to every node, the workers
    // cross-connected. None of them forwards, so the publish from n0 reaches
    // every subscriber exactly once despite the cycles.
    //
    //  n0 -- n1, n0 -- n2, n0 -- n3, n0 -- n4
    //  n1 -- n2, n1 -- n3, n1 -- n4, n2 -- n4, n3 -- n4
    let mut ov = Overlay::new("cluster");
    let n0 = ov.spawn(leaf("n0")).unwrap();
    let n1 = ov.spawn(leaf("n1")).unwrap();
    let n2 = ov.spawn(leaf("n2")).unwrap();
    let n3 = ov.spawn(leaf("n3")).unwrap();
    let n4 = ov.spawn(leaf("n4")).unwrap();

    for (a, b) in [
        (n0, n1),
        (n0, n2),
        (n0, n3),
        (n0, n4),
        (n1, n2),
        (n1, n3),
        (n1, n4),
        (n2, n4),
        (n3, n4),
    ] {
        ov.peer(a, b).unwrap();
    }
    assert_eq!(ov.endpoint(n0).unwrap().peers().len(), 4);
    assert_eq!(ov.endpoint(n1).unwrap().peers().len(), 4);
    assert_eq!(ov.endpoint(n2).unwrap().peers().len(), 3);
    assert_eq!(ov.endpoint(n3).unwrap().peers().len(), 3);
    assert_eq!(ov.endpoint(n4).unwrap().peers().len(), 4);

    let s0 = ov.subscribe(n0, filter(&["b"])).unwrap();
    let subs: Vec<Subscriber> = vec![
        ov.subscribe(n1, filter(&["a"])).unwrap(),
        ov.subscribe(n2, filter(&["a"])).unwrap(),
        ov.subscribe(n3, filter(&["a"])).unwrap(),
        ov.subscribe(n4, filter(&["a"])).unwrap(),
    ];

    ov.publish(n0, Topic::from("a"), "ping".into()).unwrap();
    for sub in subs.iter() {
        let msgs = received(sub);
        assert_eq!(msgs, vec![(Topic::from("a"), Data::from("ping"))]);
    }
    assert!(received(&s0).is_empty());
}
