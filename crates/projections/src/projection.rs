//! Projection contract shared by replay and live consumption.

use async_trait::async_trait;
use event_store::{Event, EventId};

use crate::Result;

/// How far into the global event stream a projection has been fed.
///
/// `events_seen` counts events in stream order, so replay can skip the
/// prefix a projection already handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub events_seen: u64,
    pub last_event: Option<EventId>,
}

impl ProjectionPosition {
    /// Nothing seen yet.
    pub fn start() -> Self {
        Self::default()
    }

    /// The position after handling `event`.
    pub fn after(&self, event: &Event) -> Self {
        Self {
            events_seen: self.events_seen + 1,
            last_event: Some(event.event_id),
        }
    }

    /// True if the `index`-th event of the stream (1-based) was already handled.
    pub fn has_seen(&self, index: u64) -> bool {
        index <= self.events_seen
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last_event {
            Some(id) => write!(f, "{} events, last {id}", self.events_seen),
            None => f.write_str("0 events"),
        }
    }
}

/// Folds events into a read model.
///
/// Handling must be idempotent per event: the broker delivers at least
/// once, and a replay may overlap with live delivery.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops everything the projection has built so far.
    async fn reset(&self) -> Result<()>;
}
