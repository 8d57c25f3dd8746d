use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, Attributes, EventStoreError};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-aggregate sequence number, used for optimistic concurrency control.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event on an aggregate. Version 0 means "no events yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The closed set of product event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ProductCreated")]
    Created,
    #[serde(rename = "ProductUpdated")]
    Updated,
    #[serde(rename = "ProductDeleted")]
    Deleted,
}

impl EventKind {
    /// Returns the stored/wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "ProductCreated",
            EventKind::Updated => "ProductUpdated",
            EventKind::Deleted => "ProductDeleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ProductCreated" => Ok(EventKind::Created),
            "ProductUpdated" => Ok(EventKind::Updated),
            "ProductDeleted" => Ok(EventKind::Deleted),
            other => Err(EventStoreError::UnknownEventType(other.to_string())),
        }
    }
}

/// An event that has not been appended yet.
///
/// The store assigns the id, version and timestamp on append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub aggregate_id: AggregateId,
    pub event_type: EventKind,
    pub payload: Attributes,
}

impl NewEvent {
    /// A creation event carrying the full initial attribute set.
    pub fn created(aggregate_id: AggregateId, payload: Attributes) -> Self {
        Self {
            aggregate_id,
            event_type: EventKind::Created,
            payload,
        }
    }

    /// An update event carrying only the changed fields.
    pub fn updated(aggregate_id: AggregateId, payload: Attributes) -> Self {
        Self {
            aggregate_id,
            event_type: EventKind::Updated,
            payload,
        }
    }

    /// A deletion event. Its payload is always empty.
    pub fn deleted(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id,
            event_type: EventKind::Deleted,
            payload: Attributes::new(),
        }
    }

    /// Turns this into a committed event with store-assigned fields.
    pub fn commit(self, version: Version, created_at: DateTime<Utc>) -> Event {
        Event {
            event_id: EventId::new(),
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            version,
            payload: self.payload,
            created_at,
        }
    }
}

/// An immutable, committed product event.
///
/// This is also the message body published to the broker, so the field
/// names are part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The product this event concerns.
    pub aggregate_id: AggregateId,

    /// What happened to the product.
    pub event_type: EventKind,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// Full snapshot for Created, changed fields for Updated, empty for Deleted.
    pub payload: Attributes,

    /// When the store committed the event.
    pub created_at: DateTime<Utc>,
}
