use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::{
    AggregateId, Event, EventId, EventQuery, EventStoreError, NewEvent, Result, Version,
    store::{AppendOptions, EventStore, EventStream},
};

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    outbox: VecDeque<EventId>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn current_version(&self, aggregate_id: &AggregateId) -> Version {
        self.events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial())
    }

    /// Commit timestamps never go backwards, even if the wall clock does.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }
}

/// In-memory event store implementation.
///
/// Used by tests and by single-process deployments. Events and outbox
/// entries live behind one lock so an append is atomic.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns the number of events still waiting to be published.
    pub async fn pending_count(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    /// Makes subsequent appends fail with [`EventStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Clears all events and outbox entries.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.events.clear();
        state.outbox.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: NewEvent, options: AppendOptions) -> Result<Event> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let current_version = state.current_version(&event.aggregate_id);

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id,
                expected,
                actual: current_version,
            });
        }

        let created_at = state.next_timestamp();
        let committed = event.commit(current_version.next(), created_at);
        state.outbox.push_back(committed.event_id);
        state.events.push(committed.clone());

        Ok(committed)
    }

    async fn get_events_for_aggregate(&self, aggregate_id: &AggregateId) -> Result<Vec<Event>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>> {
        let state = self.state.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(state
            .events
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.state.read().await.events.clone();
        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn get_aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>> {
        let state = self.state.read().await;
        let version = state
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn pending_publications(&self, limit: usize) -> Result<Vec<Event>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .take(limit)
            .filter_map(|id| state.events.iter().find(|e| &e.event_id == id))
            .cloned()
            .collect())
    }

    async fn mark_published(&self, event_ids: &[EventId]) -> Result<()> {
        let mut state = self.state.write().await;
        state.outbox.retain(|id| !event_ids.contains(id));
        Ok(())
    }
}
