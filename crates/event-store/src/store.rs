use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, Event, EventId, EventQuery, NewEvent, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the aggregate for optimistic concurrency control.
    /// If None, no version check is performed and the event is appended
    /// after whatever is currently stored.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the aggregate to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the aggregate to not exist (new aggregate).
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Core trait for event store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event.
    ///
    /// The event and its outbox entry are committed atomically: either both
    /// are durable when this returns `Ok`, or nothing was written. The store
    /// assigns the event id, the next per-aggregate version and the commit
    /// timestamp.
    async fn append(&self, event: NewEvent, options: AppendOptions) -> Result<Event>;

    /// Retrieves all events for a specific aggregate, oldest first.
    async fn get_events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>>;

    /// Retrieves events matching a query, in append order.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>>;

    /// Streams all events in the store in append order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of an aggregate.
    ///
    /// Returns None if the aggregate has no events.
    async fn get_aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>>;

    /// Returns up to `limit` events still waiting to be published, in append order.
    async fn pending_publications(&self, limit: usize) -> Result<Vec<Event>>;

    /// Removes the outbox entries of the given events. Unknown ids are ignored.
    async fn mark_published(&self, event_ids: &[EventId]) -> Result<()>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn append(&self, event: NewEvent, options: AppendOptions) -> Result<Event> {
        (**self).append(event, options).await
    }

    async fn get_events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>> {
        (**self).get_events_for_aggregate(aggregate_id).await
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>> {
        (**self).query_events(query).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }

    async fn get_aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>> {
        (**self).get_aggregate_version(aggregate_id).await
    }

    async fn pending_publications(&self, limit: usize) -> Result<Vec<Event>> {
        (**self).pending_publications(limit).await
    }

    async fn mark_published(&self, event_ids: &[EventId]) -> Result<()> {
        (**self).mark_published(event_ids).await
    }
}
