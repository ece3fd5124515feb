//! Package implement a publish/subscribe overlay of cooperating endpoints.
//!
//! Endpoints exchange opaque data events and store commands on slash separated
//! topics. Every endpoint is at once producer, consumer and forwarder: a message
//! published anywhere in the overlay reaches every endpoint whose subscriber
//! filter matches the topic, crossing intermediate forwarders when needed.
//! Refer to [broker] module for the overlay machinery, master/clone stores and
//! the endpoint facade.

#[macro_use]
mod error;
mod types;

pub mod broker;

pub use error::{Error, ErrorKind};
pub use types::{Data, EndpointId, EntityId, QueueStatus};
pub use types::{Filter, Topic, TopicKind};

/// Result returned by methods and functions defined in this package.
pub type Result<T> = std::result::Result<T, Error>;

/// Trait to iterate over the `/` separated segments of topics and filters.
pub trait IterTopicPath<'a> {
    type Iter: Iterator<Item = &'a str> + Clone;

    fn iter_topic_path(&'a self) -> Self::Iter;
}
