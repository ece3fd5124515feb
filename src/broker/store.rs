//! Master/clone key-value stores and the store-event emission.
//!
//! Mutation commands travel on `<name>/master`, replication traffic on
//! `<name>/clone`. Every mutation applied by a master is observed on the
//! well-known store-events topic as a positional tuple, the only place where
//! command semantics cross into the data plane.

use log::debug;

use std::collections::BTreeMap;
use std::{fmt, result, time};

use crate::broker::message::{CommandMessage, DataMessage, InternalCommand};
use crate::{Data, EndpointId, EntityId, Error, ErrorKind, Result, Topic};

/// Work produced by a store applying a command, published by the hosting
/// endpoint.
pub enum Effect {
    PublishData(DataMessage),
    PublishCommand(CommandMessage),
}

/// In-memory key-value backend. Expiry is stored but not enforced, the core
/// carries no timers.
#[derive(Default)]
pub struct MemoryBackend {
    entries: BTreeMap<Data, (Data, Option<time::Duration>)>,
}

impl MemoryBackend {
    pub fn get(&self, key: &Data) -> Option<&Data> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert `key`, returning the replaced value if any.
    pub fn insert(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<time::Duration>,
    ) -> Option<Data> {
        self.entries.insert(key, (value, expiry)).map(|(value, _)| value)
    }

    pub fn remove(&mut self, key: &Data) -> Option<Data> {
        self.entries.remove(key).map(|(value, _)| value)
    }

    /// Drop all entries, returning the erased keys.
    pub fn clear(&mut self) -> Vec<Data> {
        let keys: Vec<Data> = self.entries.keys().cloned().collect();
        self.entries.clear();
        keys
    }

    pub fn snapshot(&self) -> Vec<(Data, Data)> {
        self.entries.iter().map(|(k, (v, _))| (k.clone(), v.clone())).collect()
    }

    /// Replace the whole contents with `entries`.
    pub fn restore(&mut self, entries: Vec<(Data, Data)>) {
        self.entries.clear();
        for (key, value) in entries.into_iter() {
            self.entries.insert(key, (value, None));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Data-plane observation of a store mutation.
///
/// Encoding is positional, readers parse by position. Entity-id serialization
/// occupies two slots (endpoint, object); an invalid entity emits two nils.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Insert {
        store: String,
        key: Data,
        value: Data,
        expiry: Option<time::Duration>,
        publisher: EntityId,
    },
    Update {
        store: String,
        key: Data,
        old: Data,
        value: Data,
        expiry: Option<time::Duration>,
        publisher: EntityId,
    },
    Erase {
        store: String,
        key: Data,
        publisher: EntityId,
    },
}

fn append_expiry(xs: &mut Vec<Data>, expiry: &Option<time::Duration>) {
    match expiry {
        Some(expiry) => xs.push(Data::Count(expiry.as_millis() as u64)),
        None => xs.push(Data::Nil),
    }
}

fn append_entity(xs: &mut Vec<Data>, entity: &EntityId) {
    if entity.is_valid() {
        xs.push(Data::Text(entity.endpoint.to_string()));
        xs.push(Data::Count(entity.object));
    } else {
        xs.push(Data::Nil);
        xs.push(Data::Nil);
    }
}

fn take_expiry(x: &Data) -> Option<time::Duration> {
    match x {
        Data::Count(millis) => Some(time::Duration::from_millis(*millis)),
        _ => None,
    }
}

fn take_entity(endpoint: &Data, object: &Data) -> EntityId {
    match (endpoint, object) {
        (Data::Text(s), Data::Count(object)) => match EndpointId::parse(s) {
            Some(endpoint) => EntityId::new(endpoint, *object),
            None => EntityId::invalid(),
        },
        _ => EntityId::invalid(),
    }
}

impl StoreEvent {
    pub fn to_data(&self) -> Data {
        let mut xs = Vec::with_capacity(8);
        match self {
            StoreEvent::Insert { store, key, value, expiry, publisher } => {
                xs.push("insert".into());
                xs.push(Data::Text(store.clone()));
                xs.push(key.clone());
                xs.push(value.clone());
                append_expiry(&mut xs, expiry);
                append_entity(&mut xs, publisher);
            }
            StoreEvent::Update { store, key, old, value, expiry, publisher } => {
                xs.push("update".into());
                xs.push(Data::Text(store.clone()));
                xs.push(key.clone());
                xs.push(old.clone());
                xs.push(value.clone());
                append_expiry(&mut xs, expiry);
                append_entity(&mut xs, publisher);
            }
            StoreEvent::Erase { store, key, publisher } => {
                xs.push("erase".into());
                xs.push(Data::Text(store.clone()));
                xs.push(key.clone());
                append_entity(&mut xs, publisher);
            }
        }
        Data::Vector(xs)
    }

    /// Parse a store-event tuple back, by position.
    pub fn from_data(data: &Data) -> Option<StoreEvent> {
        let xs = match data {
            Data::Vector(xs) => xs,
            _ => return None,
        };
        let store = match xs.get(1) {
            Some(Data::Text(store)) => store.clone(),
            _ => return None,
        };
        match xs.first() {
            Some(Data::Text(kind)) if kind == "insert" && xs.len() == 7 => {
                Some(StoreEvent::Insert {
                    store,
                    key: xs[2].clone(),
                    value: xs[3].clone(),
                    expiry: take_expiry(&xs[4]),
                    publisher: take_entity(&xs[5], &xs[6]),
                })
            }
            Some(Data::Text(kind)) if kind == "update" && xs.len() == 8 => {
                Some(StoreEvent::Update {
                    store,
                    key: xs[2].clone(),
                    old: xs[3].clone(),
                    value: xs[4].clone(),
                    expiry: take_expiry(&xs[5]),
                    publisher: take_entity(&xs[6], &xs[7]),
                })
            }
            Some(Data::Text(kind)) if kind == "erase" && xs.len() == 5 => {
                Some(StoreEvent::Erase {
                    store,
                    key: xs[2].clone(),
                    publisher: take_entity(&xs[3], &xs[4]),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let entity = |e: &EntityId| match e.is_valid() {
            true => e.to_string(),
            false => "none".to_string(),
        };
        let exp = |x: &Option<time::Duration>| match x {
            Some(expiry) => format!("{:?}", expiry),
            None => "none".to_string(),
        };
        match self {
            StoreEvent::Insert { store, key, value, expiry, publisher } => {
                let (e, p) = (exp(expiry), entity(publisher));
                write!(f, "insert({}, {}, {}, {}, {})", store, key, value, e, p)
            }
            StoreEvent::Update { store, key, old, value, expiry, publisher } => {
                let (e, p) = (exp(expiry), entity(publisher));
                write!(f, "update({}, {}, {}, {}, {}, {})", store, key, old, value, e, p)
            }
            StoreEvent::Erase { store, key, publisher } => {
                write!(f, "erase({}, {}, {})", store, key, entity(publisher))
            }
        }
    }
}

/// Authoritative copy of a named store.
///
/// Consumes commands from `<name>/master`, replicates applied mutations on
/// `<name>/clone` and emits store events for each of them.
pub struct MasterStore {
    pub name: String,
    prefix: String,
    id: EntityId,
    backend: MemoryBackend,
}

impl MasterStore {
    pub fn new(name: &str, prefix: &str, id: EntityId) -> MasterStore {
        MasterStore {
            name: name.to_string(),
            prefix: format!("{}:master:{}", prefix, name),
            id,
            backend: MemoryBackend::default(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn get(&self, key: &Data) -> Result<Data> {
        match self.backend.get(key) {
            Some(value) => Ok(value.clone()),
            None => err!(NoSuchKey, desc: "{} no such key {}", self.prefix, key),
        }
    }

    pub fn apply(&mut self, cmd: InternalCommand, effects: &mut Vec<Effect>) {
        match cmd {
            InternalCommand::Put { key, value, expiry, publisher } => {
                let old = self.backend.insert(key.clone(), value.clone(), expiry);
                let event = match old {
                    Some(old) => StoreEvent::Update {
                        store: self.name.clone(),
                        key: key.clone(),
                        old,
                        value: value.clone(),
                        expiry,
                        publisher,
                    },
                    None => StoreEvent::Insert {
                        store: self.name.clone(),
                        key: key.clone(),
                        value: value.clone(),
                        expiry,
                        publisher,
                    },
                };
                self.emit(event, effects);
                let cmd = InternalCommand::Put { key, value, expiry, publisher };
                self.replicate(cmd, effects);
            }
            InternalCommand::Erase { key, publisher } => match self.backend.remove(&key) {
                Some(_) => {
                    let event = StoreEvent::Erase {
                        store: self.name.clone(),
                        key: key.clone(),
                        publisher,
                    };
                    self.emit(event, effects);
                    self.replicate(InternalCommand::Erase { key, publisher }, effects);
                }
                None => debug!("{} erase on missing key {}", self.prefix, key),
            },
            InternalCommand::Clear { publisher } => {
                for key in self.backend.clear().into_iter() {
                    let event =
                        StoreEvent::Erase { store: self.name.clone(), key, publisher };
                    self.emit(event, effects);
                }
                self.replicate(InternalCommand::Clear { publisher }, effects);
            }
            InternalCommand::SnapshotRequest { requester } => {
                debug!("{} snapshot requested by {}", self.prefix, requester);
                let cmd = InternalCommand::SnapshotResponse {
                    entries: self.backend.snapshot(),
                };
                self.replicate(cmd, effects);
            }
            InternalCommand::SnapshotResponse { .. } => {
                debug!("{} ignoring snapshot-response", self.prefix);
            }
        }
    }

    fn emit(&self, event: StoreEvent, effects: &mut Vec<Effect>) {
        let msg = DataMessage::new(Topic::store_events(), event.to_data());
        effects.push(Effect::PublishData(msg));
    }

    fn replicate(&self, cmd: InternalCommand, effects: &mut Vec<Effect>) {
        let msg = CommandMessage::new(Topic::clone_for(&self.name), cmd);
        effects.push(Effect::PublishCommand(msg));
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }
}

/// Follower copy of a named store, fed from `<name>/clone`.
pub struct CloneStore {
    pub name: String,
    prefix: String,
    id: EntityId,
    backend: MemoryBackend,
}

impl CloneStore {
    pub fn new(name: &str, prefix: &str, id: EntityId) -> CloneStore {
        CloneStore {
            name: name.to_string(),
            prefix: format!("{}:clone:{}", prefix, name),
            id,
            backend: MemoryBackend::default(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn get(&self, key: &Data) -> Result<Data> {
        match self.backend.get(key) {
            Some(value) => Ok(value.clone()),
            None => err!(NoSuchKey, desc: "{} no such key {}", self.prefix, key),
        }
    }

    pub fn apply(&mut self, cmd: InternalCommand) {
        match cmd {
            InternalCommand::Put { key, value, expiry, .. } => {
                self.backend.insert(key, value, expiry);
            }
            InternalCommand::Erase { key, .. } => {
                self.backend.remove(&key);
            }
            InternalCommand::Clear { .. } => {
                self.backend.clear();
            }
            InternalCommand::SnapshotResponse { entries } => {
                debug!("{} restoring {} entries", self.prefix, entries.len());
                self.backend.restore(entries);
            }
            InternalCommand::SnapshotRequest { .. } => {
                debug!("{} ignoring snapshot-request", self.prefix);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
