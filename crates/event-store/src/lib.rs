//! Append-only event store for product aggregates.
//!
//! The store is the source of truth of the write side. Every append also
//! stages an outbox entry in the same transaction so that events whose
//! broker publish failed can be relayed later.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{AggregateId, Attributes};
pub use error::{EventStoreError, Result};
pub use event::{Event, EventId, EventKind, NewEvent, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStream};
