//! Credit-aware broadcast managers for the three downstreams: peers, worker
//! subscribers and store subscribers.
//!
//! Every manager holds a central buffer and per-path caches. [fan_out_flush]
//! moves the central buffer into the caches of every path whose filter
//! selects the element, under the currently configured selector state.
//! [emit_batches] then drains per-path caches up to the credit granted by the
//! consumer of that path.
//!
//! [fan_out_flush]: BroadcastManager::fan_out_flush
//! [emit_batches]: BroadcastManager::emit_batches

use log::{debug, error};

use std::collections::{BTreeMap, VecDeque};

use crate::broker::message::{CommandMessage, DataMessage, NodeMessage};
use crate::broker::route::{self, PeerFilter};
use crate::broker::{Slot, INVALID_SLOT};
use crate::{EndpointId, ErrorKind, Filter, Topic};

/// Trait for elements that can be routed by topic.
pub trait Routable {
    fn route_topic(&self) -> &Topic;
}

impl Routable for DataMessage {
    fn route_topic(&self) -> &Topic {
        &self.topic
    }
}

impl Routable for CommandMessage {
    fn route_topic(&self) -> &Topic {
        &self.topic
    }
}

impl Routable for NodeMessage {
    fn route_topic(&self) -> &Topic {
        self.as_topic()
    }
}

/// Trait deciding whether an element is fanned out to a path.
pub trait Selector<F, E> {
    fn select(&self, filter: &F, element: &E) -> bool;
}

/// Plain prefix selector for worker and store paths.
#[derive(Default)]
pub struct PrefixSelector;

impl<E> Selector<Filter, E> for PrefixSelector
where
    E: Routable,
{
    fn select(&self, filter: &Filter, element: &E) -> bool {
        route::matches(filter, element.route_topic())
    }
}

/// Selector for peer paths, suppressing echo back to the message's origin.
///
/// `active_sender` is scoped state: while an inbound batch from peer `p` is
/// being processed it holds `p`, so that forwarded messages are never fanned
/// out to the path whose recorded sender address equals `p`.
#[derive(Default)]
pub struct PeerSelector {
    pub active_sender: Option<EndpointId>,
}

impl Selector<PeerFilter, NodeMessage> for PeerSelector {
    fn select(&self, pf: &PeerFilter, msg: &NodeMessage) -> bool {
        if let Some(active) = &self.active_sender {
            if &pf.sender == active {
                return false;
            }
        }

        route::peer_matches(pf, &msg.sender, msg.as_topic())
    }
}

struct PathState<E, F> {
    filter: F,
    cache: VecDeque<E>,
    credit: usize,
}

/// Broadcast manager for one element type, holding per-path filters and a
/// central buffer of not yet fanned-out elements.
pub struct BroadcastManager<E, F, S> {
    prefix: String,
    selector: S,
    buf: VecDeque<E>,
    paths: BTreeMap<Slot, PathState<E, F>>,
}

impl<E, F, S> BroadcastManager<E, F, S>
where
    E: Clone,
    S: Selector<F, E>,
{
    pub fn new(prefix: &str, selector: S) -> BroadcastManager<E, F, S> {
        BroadcastManager {
            prefix: prefix.to_string(),
            selector,
            buf: VecDeque::default(),
            paths: BTreeMap::default(),
        }
    }

    pub fn selector(&self) -> &S {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut S {
        &mut self.selector
    }

    pub fn add_path(&mut self, slot: Slot, filter: F, credit: usize) {
        if slot == INVALID_SLOT {
            error!("{} tried to add an invalid path", self.prefix);
            return;
        }

        let state = PathState { filter, cache: VecDeque::default(), credit };
        if self.paths.insert(slot, state).is_some() {
            error!("{} path already exists slot:{}", self.prefix, slot);
        }
    }

    /// Drop path `slot` along with its cached elements.
    pub fn remove_path(&mut self, slot: Slot, reason: Option<ErrorKind>, silent: bool) -> bool {
        match self.paths.remove(&slot) {
            Some(state) => {
                debug!(
                    "{} remove path slot:{} cached:{} reason:{:?} silent:{}",
                    self.prefix,
                    slot,
                    state.cache.len(),
                    reason,
                    silent
                );
                true
            }
            None => false,
        }
    }

    pub fn set_filter(&mut self, slot: Slot, filter: F) -> bool {
        match self.paths.get_mut(&slot) {
            Some(state) => {
                state.filter = filter;
                true
            }
            None => false,
        }
    }

    pub fn filter(&self, slot: Slot) -> Option<&F> {
        self.paths.get(&slot).map(|state| &state.filter)
    }

    pub fn filter_mut(&mut self, slot: Slot) -> Option<&mut F> {
        self.paths.get_mut(&slot).map(|state| &mut state.filter)
    }

    /// Iterate over `(slot, filter)` of every path.
    pub fn states(&self) -> impl Iterator<Item = (Slot, &F)> {
        self.paths.iter().map(|(slot, state)| (*slot, &state.filter))
    }

    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    pub fn has_path(&self, slot: Slot) -> bool {
        self.paths.contains_key(&slot)
    }

    /// Append an element to the central buffer. Never emits by itself.
    pub fn push(&mut self, element: E) {
        self.buf.push_back(element);
    }

    /// Move the central buffer into per-path caches using the currently
    /// configured selector state.
    pub fn fan_out_flush(&mut self) {
        while let Some(element) = self.buf.pop_front() {
            for state in self.paths.values_mut() {
                if self.selector.select(&state.filter, &element) {
                    state.cache.push_back(element.clone());
                }
            }
        }
    }

    /// Form per-path batches using the selector and available credit.
    ///
    /// Elements exceeding a path's credit remain cached for a later grant.
    pub fn emit_batches(&mut self, batch_size: usize) -> Vec<(Slot, Vec<E>)> {
        self.fan_out_flush();

        let mut batches = Vec::new();
        for (slot, state) in self.paths.iter_mut() {
            let n = std::cmp::min(state.credit, batch_size);
            let n = std::cmp::min(n, state.cache.len());
            if n == 0 {
                continue;
            }
            let batch: Vec<E> = state.cache.drain(..n).collect();
            state.credit -= n;
            batches.push((*slot, batch));
        }

        batches
    }

    /// Return credit to path `slot` after the consumer acknowledged elements.
    pub fn grant_credit(&mut self, slot: Slot, n: usize) {
        match self.paths.get_mut(&slot) {
            Some(state) => state.credit += n,
            None => debug!("{} credit for unknown path slot:{}", self.prefix, slot),
        }
    }

    /// Put back elements that could not be delivered, preserving order, and
    /// restore the credit spent on emitting them.
    pub fn requeue(&mut self, slot: Slot, elements: Vec<E>) {
        if let Some(state) = self.paths.get_mut(&slot) {
            state.credit += elements.len();
            for element in elements.into_iter().rev() {
                state.cache.push_front(element);
            }
        }
    }

    pub fn credit(&self, slot: Slot) -> Option<usize> {
        self.paths.get(&slot).map(|state| state.credit)
    }

    pub fn pending(&self, slot: Slot) -> Option<usize> {
        self.paths.get(&slot).map(|state| state.cache.len())
    }

    /// True iff the central buffer and every per-path cache is drained.
    pub fn idle(&self) -> bool {
        self.buf.is_empty() && self.paths.values().all(|state| state.cache.is_empty())
    }
}

/// Which manager a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Peer,
    Worker,
    Store,
}

/// The three broadcast managers sharing a single slot space.
///
/// A slot is owned by exactly one manager, tracked through the tag index.
pub struct FusedManagers {
    prefix: String,
    tags: BTreeMap<Slot, ManagerKind>,
    pub peers: BroadcastManager<NodeMessage, PeerFilter, PeerSelector>,
    pub workers: BroadcastManager<DataMessage, Filter, PrefixSelector>,
    pub stores: BroadcastManager<CommandMessage, Filter, PrefixSelector>,
}

impl FusedManagers {
    pub fn new(prefix: &str) -> FusedManagers {
        FusedManagers {
            prefix: prefix.to_string(),
            tags: BTreeMap::default(),
            peers: BroadcastManager::new(prefix, PeerSelector::default()),
            workers: BroadcastManager::new(prefix, PrefixSelector),
            stores: BroadcastManager::new(prefix, PrefixSelector),
        }
    }

    pub fn assign_peer(&mut self, slot: Slot, filter: PeerFilter, credit: usize) {
        if self.claim(slot, ManagerKind::Peer) {
            self.peers.add_path(slot, filter, credit);
        }
    }

    pub fn assign_worker(&mut self, slot: Slot, filter: Filter, credit: usize) {
        if self.claim(slot, ManagerKind::Worker) {
            self.workers.add_path(slot, filter, credit);
        }
    }

    pub fn assign_store(&mut self, slot: Slot, filter: Filter, credit: usize) {
        if self.claim(slot, ManagerKind::Store) {
            self.stores.add_path(slot, filter, credit);
        }
    }

    fn claim(&mut self, slot: Slot, kind: ManagerKind) -> bool {
        match self.tags.insert(slot, kind) {
            None => true,
            Some(existing) => {
                error!(
                    "{} slot:{} already assigned to {:?}, can't assign {:?}",
                    self.prefix, slot, existing, kind
                );
                self.tags.insert(slot, existing);
                false
            }
        }
    }

    pub fn kind_of(&self, slot: Slot) -> Option<ManagerKind> {
        self.tags.get(&slot).copied()
    }

    /// Remove `slot` from whichever manager owns it.
    pub fn remove_path(
        &mut self,
        slot: Slot,
        reason: Option<ErrorKind>,
        silent: bool,
    ) -> Option<ManagerKind> {
        let kind = self.tags.remove(&slot)?;
        match kind {
            ManagerKind::Peer => self.peers.remove_path(slot, reason, silent),
            ManagerKind::Worker => self.workers.remove_path(slot, reason, silent),
            ManagerKind::Store => self.stores.remove_path(slot, reason, silent),
        };
        Some(kind)
    }

    /// True iff no manager holds buffered work.
    pub fn idle(&self) -> bool {
        self.peers.idle() && self.workers.idle() && self.stores.idle()
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod fanout_test;
