use super::*;

use crate::broker::message::{Content, DataMessage, NodeMessage};
use crate::Data;

fn dm(topic: &str, data: &str) -> DataMessage {
    DataMessage::new(Topic::from(topic), Data::from(data))
}

fn nm(topic: &str, sender: EndpointId) -> NodeMessage {
    NodeMessage::new(dm(topic, "ping"), 20, sender)
}

#[test]
fn test_fan_out_and_credit() {
    let mut mgr: BroadcastManager<DataMessage, Filter, PrefixSelector> =
        BroadcastManager::new("test", PrefixSelector);

    mgr.add_path(1, Filter::from(vec![Topic::from("a")]), 2);
    mgr.add_path(2, Filter::from(vec![Topic::from("b")]), 2);
    assert_eq!(mgr.num_paths(), 2);

    mgr.push(dm("a/1", "x"));
    mgr.push(dm("b/1", "y"));
    mgr.push(dm("a/2", "z"));
    mgr.push(dm("c", "w"));

    let batches = mgr.emit_batches(1024);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].0, 1);
    assert_eq!(batches[0].1.len(), 2);
    assert_eq!(batches[0].1[0].topic, Topic::from("a/1"));
    assert_eq!(batches[0].1[1].topic, Topic::from("a/2"));
    assert_eq!(batches[1].0, 2);
    assert_eq!(batches[1].1.len(), 1);

    // credit spent: slot 1 emitted 2 of its 2 credits.
    assert_eq!(mgr.credit(1), Some(0));
    mgr.push(dm("a/3", "x"));
    assert!(mgr.emit_batches(1024).is_empty());
    assert_eq!(mgr.pending(1), Some(1));
    assert!(!mgr.idle());

    mgr.grant_credit(1, 2);
    let batches = mgr.emit_batches(1024);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1[0].topic, Topic::from("a/3"));
    assert!(mgr.idle());
}

#[test]
fn test_requeue() {
    let mut mgr: BroadcastManager<DataMessage, Filter, PrefixSelector> =
        BroadcastManager::new("test", PrefixSelector);
    mgr.add_path(1, Filter::from(vec![Topic::from("")]), 8);

    mgr.push(dm("a", "1"));
    mgr.push(dm("b", "2"));
    let mut batches = mgr.emit_batches(1024);
    let (slot, msgs) = batches.remove(0);
    assert_eq!(mgr.credit(1), Some(6));

    // the sink took none of them.
    mgr.requeue(slot, msgs);
    assert_eq!(mgr.credit(1), Some(8));
    let batches = mgr.emit_batches(1024);
    assert_eq!(batches[0].1[0].topic, Topic::from("a"));
    assert_eq!(batches[0].1[1].topic, Topic::from("b"));
}

#[test]
fn test_peer_selector_exclusion() {
    let origin = EndpointId::generate();
    let other = EndpointId::generate();

    let mut mgr: BroadcastManager<NodeMessage, PeerFilter, PeerSelector> =
        BroadcastManager::new("test", PeerSelector::default());
    let catch_all = Filter::from(vec![Topic::from("")]);
    mgr.add_path(1, PeerFilter::new(origin, catch_all.clone()), 8);
    mgr.add_path(2, PeerFilter::new(other, catch_all), 8);

    // a message originating at `origin` is never fanned out to its own path.
    mgr.push(nm("t", origin));
    let batches = mgr.emit_batches(1024);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, 2);

    // while `origin` is the active sender, the same exclusion applies to
    // messages regardless of their sender field.
    mgr.selector_mut().active_sender = Some(origin);
    mgr.push(nm("t", EndpointId::generate()));
    mgr.fan_out_flush();
    mgr.selector_mut().active_sender = None;
    let batches = mgr.emit_batches(1024);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, 2);
}

#[test]
fn test_flush_bracketing() {
    // locally produced messages flushed before the inbound sender goes
    // active are not mis-filtered by it.
    let peer = EndpointId::generate();
    let me = EndpointId::generate();

    let mut mgr: BroadcastManager<NodeMessage, PeerFilter, PeerSelector> =
        BroadcastManager::new("test", PeerSelector::default());
    mgr.add_path(1, PeerFilter::new(peer, Filter::from(vec![Topic::from("")])), 8);

    mgr.push(nm("local", me));
    mgr.fan_out_flush();
    mgr.selector_mut().active_sender = Some(peer);
    mgr.push(nm("forwarded", me));
    mgr.fan_out_flush();
    mgr.selector_mut().active_sender = None;

    // only the pre-flushed local message reached the peer's cache.
    let batches = mgr.emit_batches(1024);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1.len(), 1);
    assert_eq!(batches[0].1[0].as_topic(), &Topic::from("local"));
}

#[test]
fn test_fused_slot_space() {
    let mut out = FusedManagers::new("test");
    let catch_all = Filter::from(vec![Topic::from("")]);

    out.assign_worker(1, catch_all.clone(), 8);
    assert_eq!(out.kind_of(1), Some(ManagerKind::Worker));

    // a slot is owned by exactly one manager.
    out.assign_store(1, catch_all.clone(), 8);
    assert_eq!(out.kind_of(1), Some(ManagerKind::Worker));
    assert!(!out.stores.has_path(1));

    out.assign_peer(2, PeerFilter::new(EndpointId::generate(), catch_all), 8);
    assert_eq!(out.kind_of(2), Some(ManagerKind::Peer));

    assert_eq!(out.remove_path(1, None, true), Some(ManagerKind::Worker));
    assert_eq!(out.kind_of(1), None);
    assert_eq!(out.remove_path(1, None, true), None);
    assert!(out.idle());
}

#[test]
fn test_routable_content() {
    let msg = nm("x/y", EndpointId::generate());
    assert_eq!(msg.route_topic(), &Topic::from("x/y"));
    match &msg.content {
        Content::Data(dm) => assert_eq!(dm.route_topic(), &Topic::from("x/y")),
        Content::Command(_) => unreachable!(),
    }
}
