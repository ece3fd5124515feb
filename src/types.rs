#[cfg(any(feature = "fuzzy", test))]
use arbitrary::{Arbitrary, Error as ArbitraryError, Unstructured};
use std::result;

use std::ops::{Deref, DerefMut};
use std::{cmp, fmt};

use crate::IterTopicPath;

/// Type implement a topic, a `/` separated sequence of path segments.
///
/// Equality is byte-equal, comparison is lexical. The two well-known suffixes
/// `…/master` and `…/clone` are surfaced as [TopicKind] tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(String);

impl Deref for Topic {
    type Target = String;

    fn deref(&self) -> &String {
        &self.0
    }
}

impl DerefMut for Topic {
    fn deref_mut(&mut self) -> &mut String {
        &mut self.0
    }
}

impl From<String> for Topic {
    fn from(val: String) -> Topic {
        Topic(val)
    }
}

impl From<&str> for Topic {
    fn from(val: &str) -> Topic {
        Topic(val.to_string())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl<'a> IterTopicPath<'a> for Topic {
    type Iter = std::str::Split<'a, char>;

    fn iter_topic_path(&'a self) -> Self::Iter {
        self.0.split('/')
    }
}

#[cfg(any(feature = "fuzzy", test))]
impl<'a> Arbitrary<'a> for Topic {
    fn arbitrary(uns: &mut Unstructured<'a>) -> result::Result<Self, ArbitraryError> {
        let string_choice: Vec<String> = vec!["a", "ab", "abc", "master", "clone"]
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let c = uns.arbitrary::<u8>()?;
        let mut levels = vec![];
        for _ in 0..((c % 5) + 1) {
            levels.push(uns.choose(&string_choice)?.to_string());
        }

        Ok(levels.join("/").into())
    }
}

impl Topic {
    /// Last segment naming mutation traffic for the primary copy of a store.
    pub const MASTER_SUFFIX: &'static str = "master";
    /// Last segment naming replica-local traffic, never forwarded across peers.
    pub const CLONE_SUFFIX: &'static str = "clone";

    /// Well known topic carrying data-plane observations of store mutations.
    pub fn store_events() -> Topic {
        Topic("store/events".to_string())
    }

    /// Topic carrying mutation commands for the master copy of store `name`.
    pub fn master_for(name: &str) -> Topic {
        Topic(format!("{}/{}", name, Self::MASTER_SUFFIX))
    }

    /// Topic carrying replication traffic for clones of store `name`.
    pub fn clone_for(name: &str) -> Topic {
        Topic(format!("{}/{}", name, Self::CLONE_SUFFIX))
    }

    pub fn kind(&self) -> TopicKind {
        match self.0.rsplit('/').next() {
            Some(Self::MASTER_SUFFIX) => TopicKind::Master,
            Some(Self::CLONE_SUFFIX) => TopicKind::Clone,
            Some(_) | None => TopicKind::Plain,
        }
    }
}

/// Tag computed from a topic's last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Plain,
    Master,
    Clone,
}

/// Type implement a subscriber filter, an unordered set of topic prefixes.
///
/// A topic matches the filter iff some member is a segment-aligned prefix of
/// the topic. Empty filter matches nothing, a filter holding the empty topic
/// matches everything. Members are kept sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter(Vec<Topic>);

impl From<Vec<Topic>> for Filter {
    fn from(mut val: Vec<Topic>) -> Filter {
        val.sort();
        val.dedup();
        Filter(val)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let names: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

#[cfg(any(feature = "fuzzy", test))]
impl<'a> Arbitrary<'a> for Filter {
    fn arbitrary(uns: &mut Unstructured<'a>) -> result::Result<Self, ArbitraryError> {
        let n = uns.arbitrary::<u8>()? % 4;
        let mut topics = vec![];
        for _ in 0..n {
            topics.push(uns.arbitrary::<Topic>()?);
        }

        Ok(topics.into())
    }
}

impl Filter {
    pub fn add(&mut self, topic: Topic) -> bool {
        match self.0.binary_search(&topic) {
            Ok(_) => false,
            Err(off) => {
                self.0.insert(off, topic);
                true
            }
        }
    }

    /// Fold `other` into this filter, return whether this filter grew.
    pub fn merge(&mut self, other: &Filter) -> bool {
        let mut grew = false;
        for topic in other.0.iter() {
            grew = self.add(topic.clone()) || grew;
        }
        grew
    }

    pub fn iter(&self) -> std::slice::Iter<Topic> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Type uniquely identify an endpoint in the overlay.
///
/// The nil value is reserved to mean "invalid".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(uuid::Uuid);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0.as_simple())
    }
}

impl EndpointId {
    pub fn generate() -> EndpointId {
        EndpointId(uuid::Uuid::new_v4())
    }

    pub fn nil() -> EndpointId {
        EndpointId(uuid::Uuid::nil())
    }

    pub fn parse(s: &str) -> Option<EndpointId> {
        uuid::Uuid::parse_str(s).ok().map(EndpointId)
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

/// Type uniquely identify a publisher, like a store or the endpoint itself.
///
/// Object 0 is the endpoint's self reference. An entity with nil endpoint-id
/// is invalid. Two entity-ids compare by lexicographic pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub endpoint: EndpointId,
    pub object: u64,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}:{}", self.endpoint, self.object)
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &EntityId) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &EntityId) -> cmp::Ordering {
        (self.endpoint, self.object).cmp(&(other.endpoint, other.object))
    }
}

impl EntityId {
    pub fn new(endpoint: EndpointId, object: u64) -> EntityId {
        EntityId { endpoint, object }
    }

    /// Self reference of endpoint `id`.
    pub fn endpoint(id: EndpointId) -> EntityId {
        EntityId { endpoint: id, object: 0 }
    }

    pub fn invalid() -> EntityId {
        EntityId { endpoint: EndpointId::nil(), object: 0 }
    }

    pub fn is_valid(&self) -> bool {
        !self.endpoint.is_nil()
    }
}

/// Self-describing value, used for payloads, store keys/values and the
/// positional store-event tuples.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Data {
    Nil,
    Bool(bool),
    Count(u64),
    Integer(i64),
    Text(String),
    Binary(Vec<u8>),
    Vector(Vec<Data>),
}

impl Default for Data {
    fn default() -> Data {
        Data::Nil
    }
}

impl From<bool> for Data {
    fn from(val: bool) -> Data {
        Data::Bool(val)
    }
}

impl From<u64> for Data {
    fn from(val: u64) -> Data {
        Data::Count(val)
    }
}

impl From<i64> for Data {
    fn from(val: i64) -> Data {
        Data::Integer(val)
    }
}

impl From<&str> for Data {
    fn from(val: &str) -> Data {
        Data::Text(val.to_string())
    }
}

impl From<String> for Data {
    fn from(val: String) -> Data {
        Data::Text(val)
    }
}

impl From<Vec<Data>> for Data {
    fn from(val: Vec<Data>) -> Data {
        Data::Vector(val)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Data::Nil => write!(f, "none"),
            Data::Bool(val) => write!(f, "{}", val),
            Data::Count(val) => write!(f, "{}", val),
            Data::Integer(val) => write!(f, "{}", val),
            Data::Text(val) => write!(f, "{}", val),
            Data::Binary(val) => write!(f, "{:?}", val),
            Data::Vector(vals) => {
                let items: Vec<String> = vals.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
        }
    }
}

#[cfg(any(feature = "fuzzy", test))]
impl<'a> Arbitrary<'a> for Data {
    fn arbitrary(uns: &mut Unstructured<'a>) -> result::Result<Self, ArbitraryError> {
        let val = match uns.arbitrary::<u8>()? % 5 {
            0 => Data::Nil,
            1 => Data::Bool(uns.arbitrary()?),
            2 => Data::Count(uns.arbitrary()?),
            3 => Data::Integer(uns.arbitrary()?),
            4 => Data::Text(uns.arbitrary::<String>()?),
            _ => unreachable!(),
        };

        Ok(val)
    }
}

/// Uniform return shape for credit-aware emission and channel draining.
///
/// Carries leftover values that could not make progress.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum QueueStatus<T> {
    Ok(Vec<T>),
    Block(Vec<T>),
    Disconnected(Vec<T>),
}

impl<T> QueueStatus<T> {
    pub fn take_values(&mut self) -> Vec<T> {
        use std::mem;

        let values = match self {
            QueueStatus::Ok(values) => values,
            QueueStatus::Block(values) => values,
            QueueStatus::Disconnected(values) => values,
        };

        mem::replace(values, Vec::new())
    }

    pub fn replace<U>(self, values: Vec<U>) -> QueueStatus<U> {
        match self {
            QueueStatus::Ok(_) => QueueStatus::Ok(values),
            QueueStatus::Block(_) => QueueStatus::Block(values),
            QueueStatus::Disconnected(_) => QueueStatus::Disconnected(values),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, QueueStatus::Disconnected(_))
    }
}
