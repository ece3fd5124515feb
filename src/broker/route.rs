//! Topic/filter matching. Matching is segment aligned: filter prefix `a/b`
//! matches topic `a/b/c` but not `a/bc`.

use crate::{EndpointId, Filter, IterTopicPath, Topic};

/// Return whether `prefix` is a segment-aligned prefix of `topic`.
///
/// The empty prefix matches every topic.
pub fn prefix_match(prefix: &Topic, topic: &Topic) -> bool {
    if prefix.is_empty() {
        return true;
    }

    let mut pre_levels = prefix.iter_topic_path();
    let mut top_levels = topic.iter_topic_path();
    loop {
        match (pre_levels.next(), top_levels.next()) {
            (None, _) => break true,
            (Some(p), Some(t)) if p == t => (),
            (Some(_), _) => break false,
        }
    }
}

/// Return whether `topic` matches any prefix in `filter`.
///
/// Empty filter matches nothing.
pub fn matches(filter: &Filter, topic: &Topic) -> bool {
    filter.iter().any(|prefix| prefix_match(prefix, topic))
}

/// Per-path filter state of the peer manager.
///
/// `sender` records the remote endpoint address of the path so that inbound
/// forwarding can suppress echo back to the originator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFilter {
    pub sender: EndpointId,
    pub filter: Filter,
}

impl PeerFilter {
    pub fn new(sender: EndpointId, filter: Filter) -> PeerFilter {
        PeerFilter { sender, filter }
    }
}

/// Selector used by the peer manager. Returns false whenever `msg_sender`
/// equals the path's recorded sender address, no echo, and otherwise
/// delegates to the plain matcher.
pub fn peer_matches(pf: &PeerFilter, msg_sender: &EndpointId, topic: &Topic) -> bool {
    if &pf.sender == msg_sender {
        return false;
    }

    matches(&pf.filter, topic)
}

#[cfg(test)]
#[path = "route_test.rs"]
mod route_test;
