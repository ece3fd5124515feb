//! Endpoint facade: hosts one stream transport together with its local
//! collaborators, worker subscribers, attached stores and the recorder.

use log::{debug, error, warn};

use std::collections::BTreeMap;
use std::sync::{mpsc, Arc};

use crate::broker::flare::Flare;
use crate::broker::message::{CommandMessage, DataMessage, InternalCommand};
use crate::broker::store::{CloneStore, Effect, MasterStore};
use crate::broker::transport::{Envelope, Status, StreamTransport, WireMessage};
use crate::broker::{Config, Slot};
use crate::{Data, EndpointId, EntityId, Error, ErrorKind, Filter};
use crate::{QueueStatus, Result, Topic};

/// Tx-handle of a worker subscriber channel, held by the endpoint.
struct WorkerTx {
    tx: mpsc::SyncSender<DataMessage>,
    flare: Arc<Flare>,
}

impl WorkerTx {
    fn try_sends(&self, prefix: &str, msgs: Vec<DataMessage>) -> QueueStatus<DataMessage> {
        let mut iter = msgs.into_iter();
        loop {
            match iter.next() {
                Some(msg) => match self.tx.try_send(msg) {
                    Ok(()) => self.flare.fire(),
                    Err(mpsc::TrySendError::Full(msg)) => {
                        let mut msgs: Vec<DataMessage> = Vec::from_iter(iter);
                        msgs.insert(0, msg);
                        break QueueStatus::Block(msgs);
                    }
                    Err(mpsc::TrySendError::Disconnected(msg)) => {
                        warn!("{} subscriber disconnected ...", prefix);
                        let mut msgs: Vec<DataMessage> = Vec::from_iter(iter);
                        msgs.insert(0, msg);
                        break QueueStatus::Disconnected(msgs);
                    }
                },
                None => break QueueStatus::Ok(Vec::new()),
            }
        }
    }
}

/// Rx-handle for one local subscription.
///
/// [Subscriber::descriptor] exposes the wake fd: readable whenever messages
/// are queued, drained as messages are consumed.
pub struct Subscriber {
    prefix: String,
    rx: mpsc::Receiver<DataMessage>,
    flare: Arc<Flare>,
}

impl Subscriber {
    /// File descriptor for integration with external pollers.
    pub fn descriptor(&self) -> std::os::unix::io::RawFd {
        self.flare.fd()
    }

    /// Drain currently queued messages.
    pub fn try_recvs(&self) -> QueueStatus<DataMessage> {
        let mut msgs = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    self.flare.extinguish_one();
                    msgs.push(msg);
                }
                Err(mpsc::TryRecvError::Empty) => break QueueStatus::Block(msgs),
                Err(mpsc::TryRecvError::Disconnected) => {
                    debug!("{} endpoint gone ...", self.prefix);
                    break QueueStatus::Disconnected(msgs);
                }
            }
        }
    }
}

enum StoreSink {
    Master(String),
    Clone(String),
}

/// One actor participating in the overlay; hosts publishers, subscribers and
/// stores. Driven by the [Overlay](crate::broker::Overlay) scheduler.
pub struct Endpoint {
    pub name: String,
    prefix: String,
    config: Config,
    id: EndpointId,
    transport: StreamTransport,
    /// Filter last advertised to each peer.
    advertised: BTreeMap<EndpointId, Filter>,
    workers: BTreeMap<Slot, WorkerTx>,
    masters: BTreeMap<String, MasterStore>,
    clones: BTreeMap<String, CloneStore>,
    store_sinks: BTreeMap<Slot, StoreSink>,
    next_object: u64,
}

impl Endpoint {
    /// Create an endpoint from configuration. [Config::name] doubles as the
    /// endpoint name.
    pub fn from_config(config: Config) -> Result<Endpoint> {
        config.validate()?;

        let id = EndpointId::generate();
        let transport = StreamTransport::new(id, config.clone());
        let mut val = Endpoint {
            name: config.name.clone(),
            prefix: String::default(),
            config,
            id,
            transport,
            advertised: BTreeMap::default(),
            workers: BTreeMap::default(),
            masters: BTreeMap::default(),
            clones: BTreeMap::default(),
            store_sinks: BTreeMap::default(),
            next_object: 0,
        };
        val.prefix = val.prefix();

        Ok(val)
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn as_config(&self) -> &Config {
        &self.config
    }

    fn prefix(&self) -> String {
        format!("{}:endp", self.name)
    }

    fn alloc_object(&mut self) -> u64 {
        self.next_object += 1;
        self.next_object
    }
}

// local subscribers and stores
impl Endpoint {
    /// Add a local subscriber for `filter`, returning its consumer handle.
    pub fn subscribe(&mut self, filter: Filter) -> Result<Subscriber> {
        let size = self.config.path_credit as usize;
        let (tx, rx) = mpsc::sync_channel(size);
        let flare = Arc::new(Flare::new()?);

        let slot = self.transport.add_worker(filter);
        let worker = WorkerTx { tx, flare: Arc::clone(&flare) };
        self.workers.insert(slot, worker);

        self.re_advertise();
        self.pump();

        let prefix = format!("{}:sub:{}", self.prefix, slot);
        Ok(Subscriber { prefix, rx, flare })
    }

    /// Attach the authoritative copy of store `name` to this endpoint.
    pub fn attach_master(&mut self, name: &str) -> Result<()> {
        if self.masters.contains_key(name) || self.clones.contains_key(name) {
            err!(InvalidInput, desc: "{} store {} already attached", self.prefix, name)?
        }

        let id = EntityId::new(self.id, self.alloc_object());
        let master = MasterStore::new(name, &self.prefix, id);
        let slot = self.transport.add_store(vec![Topic::master_for(name)].into());
        self.store_sinks.insert(slot, StoreSink::Master(name.to_string()));
        self.masters.insert(name.to_string(), master);

        self.re_advertise();
        self.pump();
        Ok(())
    }

    /// Attach a follower copy of store `name`, requesting an initial snapshot
    /// from the master.
    pub fn attach_clone(&mut self, name: &str) -> Result<()> {
        if self.masters.contains_key(name) || self.clones.contains_key(name) {
            err!(InvalidInput, desc: "{} store {} already attached", self.prefix, name)?
        }

        let id = EntityId::new(self.id, self.alloc_object());
        let clone = CloneStore::new(name, &self.prefix, id);
        let slot = self.transport.add_store(vec![Topic::clone_for(name)].into());
        self.store_sinks.insert(slot, StoreSink::Clone(name.to_string()));
        self.clones.insert(name.to_string(), clone);

        self.re_advertise();

        let cmd = InternalCommand::SnapshotRequest { requester: id };
        let msg = CommandMessage::new(Topic::master_for(name), cmd);
        self.transport.publish_command(msg);

        self.pump();
        Ok(())
    }

    /// Store a key-value pair into store `name`, via the local master when
    /// attached, otherwise relayed through the local clone.
    pub fn put(
        &mut self,
        name: &str,
        key: Data,
        value: Data,
        expiry: Option<std::time::Duration>,
    ) -> Result<()> {
        if let Some(master) = self.masters.get_mut(name) {
            let cmd = InternalCommand::Put { key, value, expiry, publisher: master.id() };
            let mut effects = Vec::new();
            master.apply(cmd, &mut effects);
            self.apply_effects(effects);
            self.pump();
            Ok(())
        } else if let Some(clone) = self.clones.get(name) {
            let cmd = InternalCommand::Put { key, value, expiry, publisher: clone.id() };
            let msg = CommandMessage::new(Topic::master_for(name), cmd);
            self.transport.publish_command(msg);
            self.pump();
            Ok(())
        } else {
            err!(InvalidInput, desc: "{} no store {} attached", self.prefix, name)
        }
    }

    pub fn erase(&mut self, name: &str, key: Data) -> Result<()> {
        if let Some(master) = self.masters.get_mut(name) {
            let cmd = InternalCommand::Erase { key, publisher: master.id() };
            let mut effects = Vec::new();
            master.apply(cmd, &mut effects);
            self.apply_effects(effects);
            self.pump();
            Ok(())
        } else if let Some(clone) = self.clones.get(name) {
            let cmd = InternalCommand::Erase { key, publisher: clone.id() };
            let msg = CommandMessage::new(Topic::master_for(name), cmd);
            self.transport.publish_command(msg);
            self.pump();
            Ok(())
        } else {
            err!(InvalidInput, desc: "{} no store {} attached", self.prefix, name)
        }
    }

    pub fn clear(&mut self, name: &str) -> Result<()> {
        if let Some(master) = self.masters.get_mut(name) {
            let cmd = InternalCommand::Clear { publisher: master.id() };
            let mut effects = Vec::new();
            master.apply(cmd, &mut effects);
            self.apply_effects(effects);
            self.pump();
            Ok(())
        } else if let Some(clone) = self.clones.get(name) {
            let cmd = InternalCommand::Clear { publisher: clone.id() };
            let msg = CommandMessage::new(Topic::master_for(name), cmd);
            self.transport.publish_command(msg);
            self.pump();
            Ok(())
        } else {
            err!(InvalidInput, desc: "{} no store {} attached", self.prefix, name)
        }
    }

    /// Read `key` from the local replica of store `name`.
    pub fn get(&self, name: &str, key: &Data) -> Result<Data> {
        if let Some(master) = self.masters.get(name) {
            master.get(key)
        } else if let Some(clone) = self.clones.get(name) {
            clone.get(key)
        } else {
            err!(InvalidInput, desc: "{} no store {} attached", self.prefix, name)
        }
    }
}

// publishing and peering
impl Endpoint {
    /// Publish an opaque data event on `topic`.
    pub fn publish(&mut self, topic: Topic, data: Data) {
        self.transport.publish_data(DataMessage::new(topic, data));
        self.pump();
    }

    /// Publish a store command on `topic`.
    pub fn publish_command(&mut self, topic: Topic, cmd: InternalCommand) {
        self.transport.publish_command(CommandMessage::new(topic, cmd));
        self.pump();
    }

    /// Initiate peering with `remote`. The returned channel carries the
    /// one-shot reply once the handshake settles.
    pub fn start_peering(&mut self, remote: EndpointId) -> mpsc::Receiver<Result<()>> {
        let (tx, rx) = mpsc::channel();
        let own = self.advertised_filter_for(&remote);
        self.advertised.insert(remote, own.clone());
        self.transport.start_peering(remote, own, tx);
        rx
    }

    pub fn unpeer(&mut self, remote: EndpointId) {
        self.transport.unpeer(remote);
        self.advertised.remove(&remote);
        self.re_advertise();
        self.pump();
    }

    pub fn block_peer(&mut self, peer: EndpointId) {
        self.transport.block_peer(peer);
    }

    pub fn unblock_peer(&mut self, peer: EndpointId) {
        self.transport.unblock_peer(peer);
        self.re_advertise();
        self.pump();
    }

    pub fn peers(&self) -> Vec<EndpointId> {
        self.transport.peer_handles()
    }

    pub fn is_peered(&self, remote: &EndpointId) -> bool {
        self.transport.is_peered(remote)
    }

    /// Begin cooperative shutdown, removing all peers gracefully.
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
        self.pump();
    }

    pub fn is_exited(&self) -> bool {
        self.transport.is_exited()
    }

    pub fn take_statuses(&mut self) -> Vec<Status> {
        self.transport.take_statuses()
    }
}

// wire handling, driven by the overlay scheduler
impl Endpoint {
    /// Handle one wire envelope addressed to this endpoint.
    pub fn handle_wire(&mut self, env: Envelope) {
        let Envelope { from, to: _, msg } = env;
        match msg {
            WireMessage::PeerRequest { filter } => {
                let own = self.advertised_filter_for(&from);
                self.advertised.insert(from, own.clone());
                self.transport.handle_peer_request(from, filter, own);
            }
            WireMessage::OpenStream { slot, filter } => {
                self.transport.handle_open_stream(from, slot, filter);
            }
            WireMessage::AckOpen { slot, rebind_from, rebind_to } => {
                self.transport.handle_ack_open(from, slot, rebind_from, rebind_to);
            }
            WireMessage::NodeBatch { slot, batch } => {
                self.transport.handle_batch(from, slot, batch);
            }
            WireMessage::AckBatch { slot: _, count } => {
                self.transport.handle_ack_batch(from, count);
            }
            WireMessage::CloseStream { slot: _, reason } => {
                self.transport.handle_close(from, reason);
            }
            WireMessage::DropStream { slot: _, reason } => {
                self.transport.handle_drop(from, reason);
            }
            WireMessage::FilterUpdate { filter } => {
                self.transport.update_peer(&from, filter);
            }
            WireMessage::Down { reason } => {
                self.transport.handle_down(from, reason);
            }
        }

        self.re_advertise();
        self.pump();
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        self.transport.take_outbox()
    }

    pub fn take_monitor_requests(&mut self) -> Vec<EndpointId> {
        self.transport.take_monitor_requests()
    }

    /// True iff no outbound buffer holds work.
    pub fn idle(&self) -> bool {
        self.transport.idle()
    }
}

// subscription bookkeeping and the delivery pump
impl Endpoint {
    /// Union of local subscriptions: worker filters plus store filters.
    fn local_filter(&self) -> Filter {
        let mut filter = Filter::default();
        for (_slot, f) in self.transport.out.workers.states() {
            filter.merge(f);
        }
        for (_slot, f) in self.transport.out.stores.states() {
            filter.merge(f);
        }
        filter
    }

    /// The filter announced to `peer`: local subscriptions plus, when this
    /// endpoint forwards, the filters recorded for all other peers.
    fn advertised_filter_for(&self, peer: &EndpointId) -> Filter {
        let mut filter = self.local_filter();
        if self.config.forward {
            for (_slot, pf) in self.transport.out.peers.states() {
                if &pf.sender != peer {
                    filter.merge(&pf.filter);
                }
            }
        }
        filter
    }

    /// Send a filter update to every peer whose advertisement changed.
    ///
    /// Advertisements grow monotonically within a propagation round, so the
    /// overlay-wide exchange terminates.
    fn re_advertise(&mut self) {
        let peers = self.transport.peer_handles();
        for peer in peers.iter() {
            if !self.transport.has_outbound_path_to(peer) {
                continue;
            }
            let filter = self.advertised_filter_for(peer);
            if self.advertised.get(peer) != Some(&filter) {
                self.advertised.insert(*peer, filter.clone());
                self.transport.send_filter_update(*peer, filter);
            }
        }
        self.advertised.retain(|peer, _| peers.contains(peer));
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects.into_iter() {
            match effect {
                Effect::PublishData(msg) => self.transport.publish_data(msg),
                Effect::PublishCommand(msg) => self.transport.publish_command(msg),
            }
        }
    }

    /// Drive local delivery to quiescence: worker and store batches are
    /// emitted and consumed, store effects are republished, peer batches are
    /// queued into the outbox for the scheduler.
    fn pump(&mut self) {
        loop {
            let mut progress = false;

            for (slot, msgs) in self.transport.emit_worker_batches().into_iter() {
                let worker = match self.workers.get(&slot) {
                    Some(worker) => worker,
                    None => {
                        error!("{} worker batch for unknown slot:{}", self.prefix, slot);
                        continue;
                    }
                };
                let total = msgs.len();
                let mut status = worker.try_sends(&self.prefix, msgs);
                let leftover = status.take_values();
                let delivered = total - leftover.len();
                if delivered > 0 {
                    progress = true;
                    self.transport.out.workers.grant_credit(slot, delivered);
                }
                match status {
                    QueueStatus::Ok(_) => (),
                    QueueStatus::Block(_) => {
                        self.transport.out.workers.requeue(slot, leftover);
                    }
                    QueueStatus::Disconnected(_) => {
                        warn!("{} removing worker path slot:{}", self.prefix, slot);
                        self.workers.remove(&slot);
                        let reason = Some(ErrorKind::Disconnected);
                        self.transport.out.remove_path(slot, reason, true);
                        self.re_advertise();
                    }
                }
            }

            let mut effects = Vec::new();
            for (slot, msgs) in self.transport.emit_store_batches().into_iter() {
                let count = msgs.len();
                match self.store_sinks.get(&slot) {
                    Some(StoreSink::Master(name)) => {
                        let master = self.masters.get_mut(name).unwrap();
                        for msg in msgs.into_iter() {
                            master.apply(msg.cmd, &mut effects);
                        }
                    }
                    Some(StoreSink::Clone(name)) => {
                        let clone = self.clones.get_mut(name).unwrap();
                        for msg in msgs.into_iter() {
                            clone.apply(msg.cmd);
                        }
                    }
                    None => {
                        error!("{} store batch for unknown slot:{}", self.prefix, slot);
                        continue;
                    }
                }
                progress = true;
                self.transport.out.stores.grant_credit(slot, count);
            }

            if !effects.is_empty() {
                progress = true;
                self.apply_effects(effects);
            }

            self.transport.emit_peer_batches();

            if !progress {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod endpoint_test;
