//! Broker implementation: the per-endpoint stream transport and everything
//! around it.
//!
//! The overlay machinery is layered bottom-up:
//!
//! * [route] matches topics against subscriber filters.
//! * [message] defines the data/command messages and the node-message
//!   envelope used on peer channels.
//! * [paths] books inbound and outbound stream slots per peer.
//! * [fanout] duplicates pushed elements into per-path outbound batches
//!   according to per-path filters and credit.
//! * [transport] runs the peering handshake, dispatches inbound batches and
//!   enforces the TTL-bounded forwarding policy.
//! * [store] implements master/clone replicas and store events.
//! * [endpoint] hosts one transport with its subscribers, stores and
//!   recorder; [overlay] schedules many endpoints in one thread.

mod config;
mod endpoint;
mod fanout;
mod flare;
mod message;
mod overlay;
mod paths;
mod recorder;
mod route;
mod store;
mod transport;

pub use config::Config;
pub use endpoint::{Endpoint, Subscriber};
pub use fanout::{BroadcastManager, FusedManagers, ManagerKind};
pub use fanout::{PeerSelector, PrefixSelector, Routable, Selector};
pub use flare::Flare;
pub use message::{Batch, CommandMessage, Content, DataMessage};
pub use message::{InternalCommand, NodeMessage};
pub use overlay::Overlay;
pub use paths::{PathTable, Slot, INVALID_SLOT};
pub use recorder::Recorder;
pub use route::{matches, peer_matches, prefix_match, PeerFilter};
pub use store::{CloneStore, Effect, MasterStore, MemoryBackend, StoreEvent};
pub use transport::{Envelope, PendingConnection, ReplyTx, Status};
pub use transport::{StreamTransport, WireMessage};
