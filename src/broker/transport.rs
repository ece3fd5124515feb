//! Per-endpoint stream transport: the peering state machine, the inbound
//! batch dispatcher and the block/unblock buffering.
//!
//! The transport is a single-threaded cooperative state machine. Handlers run
//! to completion, never block, and produce outbound work into [Envelope]
//! queues that the hosting endpoint drains. Handshake wire sequence:
//!
//! ```txt
//! step 1   A -> B   PeerRequest(filter_A)
//! step 2   B -> A   OpenStream(slot_B, Some(filter_B))
//! step 3   A -> B   OpenStream(slot_A, None)
//! step 4   B -> A   AckOpen(slot_A)
//! ```

use log::{debug, error, info, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;

use crate::broker::fanout::FusedManagers;
use crate::broker::message::{Batch, CommandMessage, Content, DataMessage, NodeMessage};
use crate::broker::paths::PathTable;
use crate::broker::recorder::Recorder;
use crate::broker::route::PeerFilter;
use crate::broker::{Config, Slot, INVALID_SLOT};
use crate::{EndpointId, Error, ErrorKind, Filter, Result, TopicKind};

/// One-shot reply for a peering request.
pub type ReplyTx = mpsc::Sender<Result<()>>;

/// Wire messages exchanged between endpoints.
#[derive(Debug, Clone)]
pub enum WireMessage {
    /// Step 1 of the handshake, carrying the initiator's filter.
    PeerRequest { filter: Filter },
    /// Steps 2 and 3: open a stream on the sender's `slot`. Step 2 carries
    /// the acceptor's filter, step 3 carries none (the OK payload).
    OpenStream { slot: Slot, filter: Option<Filter> },
    /// Step 4, acknowledging the stream opened by the receiver of this
    /// message on `slot`. A rebind of the acknowledging endpoint's address is
    /// reconciled through `rebind_from`/`rebind_to`.
    AckOpen { slot: Slot, rebind_from: EndpointId, rebind_to: EndpointId },
    /// A batch of elements on an established stream.
    NodeBatch { slot: Slot, batch: Batch },
    /// Credit grant: `count` elements of the batch sent on `slot` were
    /// consumed by the receiver.
    AckBatch { slot: Slot, count: usize },
    /// Downstream teardown of the sender's outbound path `slot`. A reason
    /// marks a forced close.
    CloseStream { slot: Slot, reason: Option<ErrorKind> },
    /// Upstream teardown of the sender's inbound path `slot`. A reason marks
    /// a forced drop.
    DropStream { slot: Slot, reason: Option<ErrorKind> },
    /// Replaces the filter recorded for the sending peer.
    FilterUpdate { filter: Filter },
    /// Monitor signal: the endpoint named as sender has died.
    Down { reason: ErrorKind },
}

/// A wire message in flight between two endpoints.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: EndpointId,
    pub to: EndpointId,
    pub msg: WireMessage,
}

/// User visible state changes, drained from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    PeerAdded { peer: EndpointId },
    PeerRemoved { peer: EndpointId },
    PeerLost { peer: EndpointId, reason: Option<ErrorKind> },
    PeerUnavailable { peer: EndpointId, reason: ErrorKind },
    CannotRemovePeer { peer: EndpointId },
}

/// Record for an outgoing peering attempt. The slot stays invalid until the
/// remote's open-stream (step 2) upgrades it.
pub struct PendingConnection {
    pub slot: Slot,
    reply: Option<ReplyTx>,
}

/// Stream transport state machine hosted by one endpoint.
pub struct StreamTransport {
    prefix: String,
    id: EndpointId,
    config: Config,
    next_slot: Slot,
    paths: PathTable,
    pub(crate) out: FusedManagers,
    pending: BTreeMap<EndpointId, PendingConnection>,
    blocked_peers: BTreeSet<EndpointId>,
    blocked_msgs: BTreeMap<EndpointId, Vec<(Slot, Batch)>>,
    cache: BTreeSet<EndpointId>,
    recorder: Option<Recorder>,
    shutting_down: bool,
    exited: bool,
    outbox: Vec<Envelope>,
    statuses: Vec<Status>,
    monitor_reqs: Vec<EndpointId>,
}

impl StreamTransport {
    pub fn new(id: EndpointId, config: Config) -> StreamTransport {
        let prefix = format!("{}:core", config.name);
        let recorder = Recorder::from_config(&prefix, &config);

        StreamTransport {
            prefix: prefix.clone(),
            id,
            config,
            next_slot: INVALID_SLOT + 1,
            paths: PathTable::new(&prefix),
            out: FusedManagers::new(&prefix),
            pending: BTreeMap::default(),
            blocked_peers: BTreeSet::default(),
            blocked_msgs: BTreeMap::default(),
            cache: BTreeSet::default(),
            recorder,
            shutting_down: false,
            exited: false,
            outbox: Vec::default(),
            statuses: Vec::default(),
            monitor_reqs: Vec::default(),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    fn alloc_slot(&mut self) -> Slot {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn send(&mut self, to: EndpointId, msg: WireMessage) {
        self.outbox.push(Envelope { from: self.id, to, msg });
    }
}

// peer management
impl StreamTransport {
    /// Queries whether `hdl` is a known peer.
    pub fn connected_to(&self, hdl: &EndpointId) -> bool {
        self.paths.is_connected(hdl)
    }

    pub fn is_peered(&self, hdl: &EndpointId) -> bool {
        self.paths.is_peered(hdl)
    }

    pub fn has_outbound_path_to(&self, hdl: &EndpointId) -> bool {
        self.paths.outbound_slot(hdl).is_some()
    }

    pub fn has_inbound_path_from(&self, hdl: &EndpointId) -> bool {
        self.paths.inbound_slot(hdl).is_some()
    }

    /// All peers connected through at least one path.
    pub fn peer_handles(&self) -> Vec<EndpointId> {
        self.paths.peers()
    }

    pub fn pending_connection(&self, hdl: &EndpointId) -> Option<&PendingConnection> {
        self.pending.get(hdl)
    }

    /// Initiates peering between this endpoint and `remote`. Step 1.
    ///
    /// Repeated requests for a pending or connected peer deliver success
    /// without creating extra paths.
    pub fn start_peering(&mut self, remote: EndpointId, own_filter: Filter, reply: ReplyTx) {
        if remote.is_nil() {
            let resp: Result<()> =
                err!(InvalidArgument, desc: "{} peering with nil endpoint", self.prefix);
            reply.send(resp).ok();
            return;
        }
        if self.pending.contains_key(&remote) || self.connected_to(&remote) {
            debug!("{} repeated peering request for {}", self.prefix, remote);
            reply.send(Ok(())).ok();
            return;
        }

        let pc = PendingConnection { slot: INVALID_SLOT, reply: Some(reply) };
        self.pending.insert(remote, pc);
        self.send(remote, WireMessage::PeerRequest { filter: own_filter });
        self.monitor_reqs.push(remote);
    }

    /// Handle step 1 on the acceptor: open the outbound stream and send our
    /// own filter with it (step 2).
    pub fn handle_peer_request(
        &mut self,
        from: EndpointId,
        peer_filter: Filter,
        own_filter: Filter,
    ) {
        if self.start_handshake(true, from, peer_filter, own_filter).is_some() {
            self.monitor_reqs.push(from);
        }
    }

    /// Open the outbound half towards `peer` (steps 2 and 3 senders).
    ///
    /// `send_own_filter` selects between the `(filter, self)` and the
    /// `(OK, self)` open-stream payload.
    fn start_handshake(
        &mut self,
        send_own_filter: bool,
        peer: EndpointId,
        peer_filter: Filter,
        own_filter: Filter,
    ) -> Option<Slot> {
        if self.paths.outbound_slot(&peer).is_some() {
            error!("{} peer {} already connected", self.prefix, peer);
            return None;
        }

        let slot = self.alloc_slot();
        let credit = self.config.path_credit as usize;
        self.out.assign_peer(slot, PeerFilter::new(peer, peer_filter), credit);
        self.paths.add_outbound(slot, peer);

        let filter = match send_own_filter {
            true => Some(own_filter),
            false => None,
        };
        self.send(peer, WireMessage::OpenStream { slot, filter });
        Some(slot)
    }

    /// Acknowledge an incoming stream by adding the inbound path.
    ///
    /// Precondition: no inbound path from this peer exists yet.
    fn ack_peering(&mut self, from: EndpointId) -> Option<Slot> {
        if self.paths.inbound_slot(&from).is_some() {
            error!("{} peer {} already connected", self.prefix, from);
            return None;
        }

        let slot = self.alloc_slot();
        self.paths.add_inbound(slot, from);
        Some(slot)
    }

    /// Handle an open-stream from `from`: step 2 when it carries the remote
    /// filter, step 3 when it carries the OK payload.
    pub fn handle_open_stream(
        &mut self,
        from: EndpointId,
        sender_slot: Slot,
        filter: Option<Filter>,
    ) {
        if self.ack_peering(from).is_none() {
            return;
        }

        match filter {
            Some(peer_filter) => {
                // step 2 on the initiator: complete our outbound half with OK.
                match self.start_handshake(false, from, peer_filter, Filter::default()) {
                    Some(out_slot) => {
                        if let Some(pc) = self.pending.get_mut(&from) {
                            pc.slot = out_slot;
                        }
                    }
                    None => (),
                }
            }
            None => {
                // step 4: acknowledge the stream the initiator opened.
                let msg = WireMessage::AckOpen {
                    slot: sender_slot,
                    rebind_from: self.id,
                    rebind_to: self.id,
                };
                self.send(from, msg);
            }
        }

        if self.paths.is_peered(&from) {
            self.cache.insert(from);
            self.statuses.push(Status::PeerAdded { peer: from });
        }
    }

    /// Handle step 4. A missing outbound path means the ack-open failed.
    pub fn handle_ack_open(
        &mut self,
        from: EndpointId,
        sender_slot: Slot,
        rebind_from: EndpointId,
        rebind_to: EndpointId,
    ) {
        match self.paths.outbound_slot(&from) {
            Some(out_slot) => {
                if rebind_from != rebind_to {
                    debug!(
                        "{} rebind occurred slot:{} {} -> {}",
                        self.prefix, sender_slot, rebind_from, rebind_to
                    );
                    if let Some(pf) = self.out.peers.filter_mut(out_slot) {
                        pf.sender = rebind_to;
                    }
                }
                if let Some(pc) = self.pending.remove(&from) {
                    if let Some(reply) = pc.reply {
                        reply.send(Ok(())).ok();
                    }
                }
                if self.paths.is_peered(&from) {
                    self.cache.insert(from);
                }
            }
            None => {
                self.remove_peer(&from, Some(ErrorKind::InvalidStreamState), false, false);
            }
        }
    }

    /// Removes a peer, tearing down the paths to and from it.
    ///
    /// Returns false when neither half existed. `silent` suppresses the
    /// close/drop wire messages, `graceful` selects between the removed and
    /// the disconnected status.
    pub fn remove_peer(
        &mut self,
        hdl: &EndpointId,
        reason: Option<ErrorKind>,
        silent: bool,
        graceful: bool,
    ) -> bool {
        let mut performed_erases = 0;
        if let Some(slot) = self.paths.remove_outbound(hdl) {
            debug!("{} remove outbound path to peer {}", self.prefix, hdl);
            performed_erases += 1;
            self.out.remove_path(slot, reason, silent);
            if !silent {
                self.send(*hdl, WireMessage::CloseStream { slot, reason });
            }
        }
        if let Some(slot) = self.paths.remove_inbound(hdl) {
            debug!("{} remove inbound path from peer {}", self.prefix, hdl);
            performed_erases += 1;
            if !silent {
                self.send(*hdl, WireMessage::DropStream { slot, reason });
            }
        }
        if performed_erases == 0 {
            debug!("{} no path was removed for peer {}", self.prefix, hdl);
            return false;
        }

        match graceful {
            true => self.statuses.push(Status::PeerRemoved { peer: *hdl }),
            false => self.statuses.push(Status::PeerLost { peer: *hdl, reason }),
        }
        self.cache.remove(hdl);

        if self.shutting_down && self.paths.outbound_is_empty() {
            info!("{} last outbound path gone, exiting", self.prefix);
            self.exited = true;
        }

        true
    }

    /// Disconnects a peer by demand of the user.
    pub fn unpeer(&mut self, hdl: EndpointId) {
        if !self.remove_peer(&hdl, None, false, true) {
            self.statuses.push(Status::CannotRemovePeer { peer: hdl });
        }
    }

    /// Updates the filter of an existing peer.
    pub fn update_peer(&mut self, hdl: &EndpointId, filter: Filter) -> bool {
        let slot = match self.paths.outbound_slot(hdl) {
            Some(slot) => slot,
            None => {
                debug!("{} cannot update filter on unknown peer {}", self.prefix, hdl);
                return false;
            }
        };
        match self.out.peers.filter_mut(slot) {
            Some(pf) => {
                pf.filter = filter;
                true
            }
            None => {
                debug!("{} no peer path for slot:{}", self.prefix, slot);
                false
            }
        }
    }

    /// Announce a changed filter to `peer`.
    pub fn send_filter_update(&mut self, peer: EndpointId, filter: Filter) {
        self.send(peer, WireMessage::FilterUpdate { filter });
    }

    /// Downstream close of our inbound path from `from`.
    pub fn handle_close(&mut self, from: EndpointId, reason: Option<ErrorKind>) {
        if self.paths.inbound_slot(&from).is_some() {
            self.remove_peer(&from, reason, true, false);
        } else {
            debug!("{} no inbound path for close from {}", self.prefix, from);
        }
    }

    /// Upstream drop of our outbound path towards `from`.
    pub fn handle_drop(&mut self, from: EndpointId, reason: Option<ErrorKind>) {
        if self.paths.outbound_slot(&from).is_some() {
            self.remove_peer(&from, reason, true, false);
        } else {
            debug!("{} no outbound path for drop from {}", self.prefix, from);
        }
    }

    /// Monitor signal: `peer` died with `reason`.
    pub fn handle_down(&mut self, peer: EndpointId, reason: ErrorKind) {
        if let Some(pc) = self.pending.remove(&peer) {
            warn!("{} pending peer {} down: {}", self.prefix, peer, reason);
            if let Some(reply) = pc.reply {
                let resp: Result<()> = Err(Error {
                    kind: ErrorKind::PeerUnavailable,
                    description: format!("{} peer {} down: {}", self.prefix, peer, reason),
                    cause: None,
                });
                reply.send(resp).ok();
            }
            self.statuses.push(Status::PeerUnavailable { peer, reason });
        }
        if self.paths.is_connected(&peer) {
            self.remove_peer(&peer, Some(reason), true, false);
        }
    }

    /// Cooperative shutdown: peers are removed gracefully and the transport
    /// exits once the last outbound path is gone.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        let peers = self.paths.peers();
        if peers.is_empty() {
            self.exited = true;
            return;
        }
        for peer in peers.into_iter() {
            self.remove_peer(&peer, None, false, true);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }
}

// blocking of peers
impl StreamTransport {
    /// Block peer batches from being handled. They are buffered until
    /// unblocked. Blocking is advisory: outbound traffic is unaffected.
    pub fn block_peer(&mut self, hdl: EndpointId) {
        self.blocked_peers.insert(hdl);
    }

    /// Unblock peer batches and replay any buffered ones in arrival order.
    /// A no-op when the peer is not blocked.
    pub fn unblock_peer(&mut self, hdl: EndpointId) {
        let was_blocked = self.blocked_peers.remove(&hdl);
        let batches = self.blocked_msgs.remove(&hdl);
        if !was_blocked && batches.is_none() {
            return;
        }
        let batches = batches.unwrap_or_default();
        if self.paths.inbound_slot(&hdl).is_none() {
            debug!(
                "{} dropped {} batches after unblocking peer {}: path no longer exists",
                self.prefix,
                batches.len(),
                hdl
            );
            return;
        }
        for (slot, batch) in batches.into_iter() {
            debug!("{} handle blocked batch from {}", self.prefix, hdl);
            self.handle_batch(hdl, slot, batch);
        }
    }

    pub fn is_blocked(&self, hdl: &EndpointId) -> bool {
        self.blocked_peers.contains(hdl)
    }
}

// inbound dispatch
impl StreamTransport {
    /// Classify an inbound batch from `hdl` and route its elements to local
    /// subscribers and, subject to the forwarding policy, to other peers.
    pub fn handle_batch(&mut self, hdl: EndpointId, sender_slot: Slot, batch: Batch) {
        if self.blocked_peers.contains(&hdl) {
            debug!("{} buffer batch from blocked peer {}", self.prefix, hdl);
            self.blocked_msgs.entry(hdl).or_default().push((sender_slot, batch));
            return;
        }

        let count = batch.len();

        // Anything still in the central buffer was produced by ourselves, as
        // opposed to forwarded. Flush it to the per-path caches before the
        // inbound sender filter goes active, so it cannot be mis-filtered.
        debug_assert!(self.out.peers.selector().active_sender.is_none());
        self.out.peers.fan_out_flush();
        self.out.peers.selector_mut().active_sender = Some(hdl);

        match batch {
            Batch::Peer(msgs) => self.dispatch_peer_batch(hdl, msgs),
            Batch::Worker(msgs) => {
                for msg in msgs.into_iter() {
                    self.publish_data(msg);
                }
            }
            Batch::Store(msgs) => {
                for msg in msgs.into_iter() {
                    self.publish_command(msg);
                }
            }
            Batch::Var(contents) => {
                for content in contents.into_iter() {
                    match content {
                        Content::Data(msg) => self.publish_data(msg),
                        Content::Command(msg) => self.publish_command(msg),
                    }
                }
            }
        }

        // Flush forwarded messages while the sender filter is still active,
        // so none of them can loop back to the peer they came from.
        self.out.peers.fan_out_flush();
        self.out.peers.selector_mut().active_sender = None;

        if count > 0 && self.paths.inbound_slot(&hdl).is_some() {
            self.send(hdl, WireMessage::AckBatch { slot: sender_slot, count });
        }
    }

    fn dispatch_peer_batch(&mut self, hdl: EndpointId, msgs: Vec<NodeMessage>) {
        let num_workers = self.out.workers.num_paths();
        let num_stores = self.out.stores.num_paths();
        debug!(
            "{} batch from peer {} workers:{} stores:{}",
            self.prefix, hdl, num_workers, num_stores
        );

        for mut msg in msgs.into_iter() {
            // The immediate upstream of any further hop is us-facing `hdl`.
            msg.sender = hdl;

            match &msg.content {
                Content::Data(dm) => {
                    if num_workers > 0 {
                        self.out.workers.push(dm.clone());
                    }
                }
                Content::Command(cm) => {
                    if num_stores > 0 {
                        self.out.stores.push(cm.clone());
                    }
                }
            }

            if !self.config.forward {
                continue;
            }
            // Clone traffic is replica-local, never forwarded across peers.
            if msg.as_topic().kind() == TopicKind::Clone {
                continue;
            }
            if msg.ttl <= 1 {
                warn!("{} dropped a message with expired TTL", self.prefix);
                continue;
            }
            msg.ttl -= 1;
            self.out.peers.push(msg);
        }
    }

    /// Credit grant from the consumer of our outbound path towards `from`.
    pub fn handle_ack_batch(&mut self, from: EndpointId, count: usize) {
        match self.paths.outbound_slot(&from) {
            Some(slot) => self.out.peers.grant_credit(slot, count),
            None => debug!("{} credit from unknown peer {}", self.prefix, from),
        }
    }
}

// local paths and publishing
impl StreamTransport {
    /// Add a worker subscriber path with `filter`, returning its slot.
    pub fn add_worker(&mut self, filter: Filter) -> Slot {
        let slot = self.alloc_slot();
        let credit = self.config.path_credit as usize;
        self.out.assign_worker(slot, filter, credit);
        slot
    }

    /// Add a store subscriber path with `filter`, returning its slot.
    pub fn add_store(&mut self, filter: Filter) -> Slot {
        let slot = self.alloc_slot();
        let credit = self.config.path_credit as usize;
        self.out.assign_store(slot, filter, credit);
        slot
    }

    /// Publish a locally originated data message to peers and local workers.
    pub fn publish_data(&mut self, msg: DataMessage) {
        self.record(|recorder| recorder.record_data(&msg));
        if self.out.workers.num_paths() > 0 {
            self.out.workers.push(msg.clone());
        }
        let node = NodeMessage::new(msg, self.config.ttl, self.id);
        self.out.peers.push(node);
    }

    /// Publish a locally originated command message to peers and local
    /// stores.
    pub fn publish_command(&mut self, msg: CommandMessage) {
        self.record(|recorder| recorder.record_command(&msg));
        if self.out.stores.num_paths() > 0 {
            self.out.stores.push(msg.clone());
        }
        let node = NodeMessage::new(msg, self.config.ttl, self.id);
        self.out.peers.push(node);
    }

    fn record<F>(&mut self, record: F)
    where
        F: FnOnce(&mut Recorder),
    {
        if let Some(recorder) = self.recorder.as_mut() {
            record(recorder);
            if !recorder.is_open() {
                self.recorder = None;
            }
        }
    }

    /// Emit peer batches up to per-path credit into the outbox.
    pub fn emit_peer_batches(&mut self) {
        let batch_size = self.config.msg_batch_size as usize;
        for (slot, msgs) in self.out.peers.emit_batches(batch_size).into_iter() {
            match self.paths.outbound_peer(slot) {
                Some(to) => {
                    let msg = WireMessage::NodeBatch { slot, batch: Batch::Peer(msgs) };
                    self.send(to, msg);
                }
                None => error!("{} emitted batch for unknown slot:{}", self.prefix, slot),
            }
        }
    }

    /// Emit worker batches for the hosting endpoint to deliver.
    pub fn emit_worker_batches(&mut self) -> Vec<(Slot, Vec<DataMessage>)> {
        let batch_size = self.config.msg_batch_size as usize;
        self.out.workers.emit_batches(batch_size)
    }

    /// Emit store batches for the hosting endpoint to deliver.
    pub fn emit_store_batches(&mut self) -> Vec<(Slot, Vec<CommandMessage>)> {
        let batch_size = self.config.msg_batch_size as usize;
        self.out.stores.emit_batches(batch_size)
    }

    /// True iff no outbound buffer holds work and nothing is in flight.
    pub fn idle(&self) -> bool {
        self.out.idle() && self.outbox.is_empty()
    }
}

// draining the produced work
impl StreamTransport {
    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_statuses(&mut self) -> Vec<Status> {
        std::mem::take(&mut self.statuses)
    }

    pub fn take_monitor_requests(&mut self) -> Vec<EndpointId> {
        std::mem::take(&mut self.monitor_reqs)
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
