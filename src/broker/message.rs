#[cfg(any(feature = "fuzzy", test))]
use arbitrary::{Arbitrary, Error as ArbitraryError, Unstructured};

use std::{fmt, result, time};

use crate::{Data, EndpointId, EntityId, Topic};

/// Opaque data event carried on a topic, consumed by local subscribers.
#[derive(Clone, Eq, PartialEq)]
pub struct DataMessage {
    pub topic: Topic,
    pub data: Data,
}

impl DataMessage {
    pub fn new(topic: Topic, data: Data) -> DataMessage {
        DataMessage { topic, data }
    }
}

impl fmt::Debug for DataMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "DataMessage<{},{}>", self.topic, self.data)
    }
}

#[cfg(any(feature = "fuzzy", test))]
impl<'a> Arbitrary<'a> for DataMessage {
    fn arbitrary(uns: &mut Unstructured<'a>) -> result::Result<Self, ArbitraryError> {
        Ok(DataMessage { topic: uns.arbitrary()?, data: uns.arbitrary()? })
    }
}

/// Store command carried on a topic, consumed by replicated key-value stores.
#[derive(Clone, Eq, PartialEq)]
pub struct CommandMessage {
    pub topic: Topic,
    pub cmd: InternalCommand,
}

impl CommandMessage {
    pub fn new(topic: Topic, cmd: InternalCommand) -> CommandMessage {
        CommandMessage { topic, cmd }
    }
}

impl fmt::Debug for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "CommandMessage<{},{:?}>", self.topic, self.cmd)
    }
}

/// Commands understood by master and clone stores. The transport treats these
/// as opaque except for the topic they travel on.
#[derive(Clone, Eq, PartialEq)]
pub enum InternalCommand {
    Put {
        key: Data,
        value: Data,
        expiry: Option<time::Duration>,
        publisher: EntityId,
    },
    Erase {
        key: Data,
        publisher: EntityId,
    },
    Clear {
        publisher: EntityId,
    },
    SnapshotRequest {
        requester: EntityId,
    },
    SnapshotResponse {
        entries: Vec<(Data, Data)>,
    },
}

impl fmt::Debug for InternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            InternalCommand::Put { key, .. } => write!(f, "Put<{}>", key),
            InternalCommand::Erase { key, .. } => write!(f, "Erase<{}>", key),
            InternalCommand::Clear { .. } => write!(f, "Clear"),
            InternalCommand::SnapshotRequest { .. } => write!(f, "SnapshotRequest"),
            InternalCommand::SnapshotResponse { entries } => {
                write!(f, "SnapshotResponse<{}>", entries.len())
            }
        }
    }
}

/// Either a data message or a command message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Content {
    Data(DataMessage),
    Command(CommandMessage),
}

impl From<DataMessage> for Content {
    fn from(val: DataMessage) -> Content {
        Content::Data(val)
    }
}

impl From<CommandMessage> for Content {
    fn from(val: CommandMessage) -> Content {
        Content::Command(val)
    }
}

impl Content {
    pub fn as_topic(&self) -> &Topic {
        match self {
            Content::Data(msg) => &msg.topic,
            Content::Command(msg) => &msg.topic,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Content::Data(_))
    }
}

/// Envelope used on peer channels: content plus a hop budget and the identity
/// of the immediate upstream peer, used for fan-out exclusion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeMessage {
    pub content: Content,
    pub ttl: u16,
    pub sender: EndpointId,
}

impl NodeMessage {
    /// Wrap a locally originated content message. `ttl` comes from endpoint
    /// configuration and `sender` is the publishing endpoint's own address.
    pub fn new<C>(content: C, ttl: u16, sender: EndpointId) -> NodeMessage
    where
        C: Into<Content>,
    {
        NodeMessage { content: content.into(), ttl, sender }
    }

    pub fn as_topic(&self) -> &Topic {
        self.content.as_topic()
    }
}

/// A unit of inbound work: a vector of homogeneous elements from one path.
///
/// Peer channels carry node-messages, local channels carry plain data or
/// command elements. `Var` carries mixed content from sources producing both.
#[derive(Clone, Eq, PartialEq)]
pub enum Batch {
    Peer(Vec<NodeMessage>),
    Worker(Vec<DataMessage>),
    Store(Vec<CommandMessage>),
    Var(Vec<Content>),
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Batch::Peer(xs) => write!(f, "Batch::Peer<{}>", xs.len()),
            Batch::Worker(xs) => write!(f, "Batch::Worker<{}>", xs.len()),
            Batch::Store(xs) => write!(f, "Batch::Store<{}>", xs.len()),
            Batch::Var(xs) => write!(f, "Batch::Var<{}>", xs.len()),
        }
    }
}

impl Batch {
    pub fn len(&self) -> usize {
        match self {
            Batch::Peer(xs) => xs.len(),
            Batch::Worker(xs) => xs.len(),
            Batch::Store(xs) => xs.len(),
            Batch::Var(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;
