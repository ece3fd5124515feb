//! Single-threaded scheduler driving a set of in-process endpoints.
//!
//! The overlay owns the endpoints, routes wire envelopes between them in
//! FIFO order and delivers monitor-death notifications. [Overlay::run] loops
//! until no envelope is in flight, which with eager endpoint pumping means
//! the whole overlay is quiescent.

use log::{debug, info};

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::mpsc;

use crate::broker::endpoint::{Endpoint, Subscriber};
use crate::broker::message::InternalCommand;
use crate::broker::transport::{Envelope, Status, WireMessage};
use crate::broker::Config;
use crate::{Data, EndpointId, Error, ErrorKind, Filter, Result, Topic};

/// The external scheduler of an in-process overlay.
pub struct Overlay {
    prefix: String,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    queue: VecDeque<Envelope>,
    /// target endpoint -> endpoints watching it for death.
    monitors: BTreeMap<EndpointId, BTreeSet<EndpointId>>,
}

impl Overlay {
    pub fn new(name: &str) -> Overlay {
        Overlay {
            prefix: format!("{}:overlay", name),
            endpoints: BTreeMap::default(),
            queue: VecDeque::default(),
            monitors: BTreeMap::default(),
        }
    }

    /// Create an endpoint from `config` and add it to the overlay.
    pub fn spawn(&mut self, config: Config) -> Result<EndpointId> {
        let ep = Endpoint::from_config(config)?;
        let id = ep.id();
        info!("{} spawned endpoint {} as {}", self.prefix, ep.name, id);
        self.endpoints.insert(id, ep);
        Ok(id)
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    /// Remove an endpoint abruptly, firing `Down` at its monitors.
    pub fn remove(&mut self, id: EndpointId, reason: ErrorKind) {
        if self.endpoints.remove(&id).is_none() {
            return;
        }
        info!("{} removed endpoint {}", self.prefix, id);
        if let Some(watchers) = self.monitors.remove(&id) {
            for watcher in watchers.into_iter() {
                let msg = WireMessage::Down { reason };
                self.queue.push_back(Envelope { from: id, to: watcher, msg });
            }
        }
        self.run();
    }

    /// Collect outbound work and monitor requests from endpoint `id`.
    fn drain(&mut self, id: EndpointId) {
        let ep = match self.endpoints.get_mut(&id) {
            Some(ep) => ep,
            None => return,
        };
        self.queue.extend(ep.take_outbox());
        let reqs = ep.take_monitor_requests();
        let exited = ep.is_exited();
        for target in reqs.into_iter() {
            if self.endpoints.contains_key(&target) {
                self.monitors.entry(target).or_default().insert(id);
            } else {
                let msg = WireMessage::Down { reason: ErrorKind::PeerUnavailable };
                self.queue.push_back(Envelope { from: target, to: id, msg });
            }
        }
        if exited {
            self.remove(id, ErrorKind::Disconnected);
        }
    }

    /// Deliver envelopes until the overlay is quiescent.
    pub fn run(&mut self) {
        while let Some(env) = self.queue.pop_front() {
            let to = env.to;
            match self.endpoints.get_mut(&to) {
                Some(ep) => {
                    ep.handle_wire(env);
                    self.drain(to);
                }
                None => {
                    debug!("{} dropped envelope for unknown endpoint {}", self.prefix, to)
                }
            }
        }
    }
}

// convenience wrappers: perform one operation, then drive to quiescence.
impl Overlay {
    fn with<T, F>(&mut self, id: EndpointId, op: F) -> Result<T>
    where
        F: FnOnce(&mut Endpoint) -> Result<T>,
    {
        let ep = match self.endpoints.get_mut(&id) {
            Some(ep) => ep,
            None => err!(InvalidInput, desc: "{} no endpoint {}", self.prefix, id)?,
        };
        let val = op(ep)?;
        self.drain(id);
        self.run();
        Ok(val)
    }

    /// Peer `a` with `b`, running the overlay until the handshake settles.
    pub fn peer(&mut self, a: EndpointId, b: EndpointId) -> Result<()> {
        let rx: mpsc::Receiver<Result<()>> =
            self.with(a, |ep| Ok(ep.start_peering(b)))?;
        match rx.try_recv() {
            Ok(resp) => resp,
            Err(_) => err!(
                IPCFail,
                desc: "{} peering {} with {} did not settle", self.prefix, a, b
            ),
        }
    }

    pub fn unpeer(&mut self, a: EndpointId, b: EndpointId) -> Result<()> {
        self.with(a, |ep| {
            ep.unpeer(b);
            Ok(())
        })
    }

    pub fn subscribe(&mut self, id: EndpointId, filter: Filter) -> Result<Subscriber> {
        self.with(id, |ep| ep.subscribe(filter))
    }

    pub fn publish(&mut self, id: EndpointId, topic: Topic, data: Data) -> Result<()> {
        self.with(id, |ep| {
            ep.publish(topic, data);
            Ok(())
        })
    }

    pub fn publish_command(
        &mut self,
        id: EndpointId,
        topic: Topic,
        cmd: InternalCommand,
    ) -> Result<()> {
        self.with(id, |ep| {
            ep.publish_command(topic, cmd);
            Ok(())
        })
    }

    pub fn attach_master(&mut self, id: EndpointId, name: &str) -> Result<()> {
        self.with(id, |ep| ep.attach_master(name))
    }

    pub fn attach_clone(&mut self, id: EndpointId, name: &str) -> Result<()> {
        self.with(id, |ep| ep.attach_clone(name))
    }

    pub fn put(
        &mut self,
        id: EndpointId,
        store: &str,
        key: Data,
        value: Data,
    ) -> Result<()> {
        self.with(id, |ep| ep.put(store, key, value, None))
    }

    pub fn erase(&mut self, id: EndpointId, store: &str, key: Data) -> Result<()> {
        self.with(id, |ep| ep.erase(store, key))
    }

    pub fn clear(&mut self, id: EndpointId, store: &str) -> Result<()> {
        self.with(id, |ep| ep.clear(store))
    }

    pub fn get(&self, id: EndpointId, store: &str, key: &Data) -> Result<Data> {
        match self.endpoints.get(&id) {
            Some(ep) => ep.get(store, key),
            None => err!(InvalidInput, desc: "{} no endpoint {}", self.prefix, id),
        }
    }

    pub fn block_peer(&mut self, id: EndpointId, peer: EndpointId) -> Result<()> {
        self.with(id, |ep| {
            ep.block_peer(peer);
            Ok(())
        })
    }

    pub fn unblock_peer(&mut self, id: EndpointId, peer: EndpointId) -> Result<()> {
        self.with(id, |ep| {
            ep.unblock_peer(peer);
            Ok(())
        })
    }

    pub fn shutdown(&mut self, id: EndpointId) -> Result<()> {
        self.with(id, |ep| {
            ep.shutdown();
            Ok(())
        })
    }

    pub fn take_statuses(&mut self, id: EndpointId) -> Vec<Status> {
        match self.endpoints.get_mut(&id) {
            Some(ep) => ep.take_statuses(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "overlay_test.rs"]
mod overlay_test;
