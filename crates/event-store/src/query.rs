use chrono::{DateTime, Utc};

use crate::{AggregateId, Event, EventKind};

/// Filter over the event log.
///
/// Results are always returned in append order; `offset` and `limit` are
/// applied after filtering.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by aggregate ID.
    pub aggregate_id: Option<AggregateId>,

    /// Filter by event kinds (any of these).
    pub event_types: Option<Vec<EventKind>>,

    /// Filter by events at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Filter by events at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip.
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific aggregate.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    /// Creates a query for events of a specific kind.
    pub fn for_event_type(kind: EventKind) -> Self {
        Self {
            event_types: Some(vec![kind]),
            ..Default::default()
        }
    }

    /// Filters by aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Filters by a single event kind.
    pub fn event_type(mut self, kind: EventKind) -> Self {
        self.event_types = Some(vec![kind]);
        self
    }

    /// Filters by multiple event kinds (any of these).
    pub fn event_types(mut self, kinds: Vec<EventKind>) -> Self {
        self.event_types = Some(kinds);
        self
    }

    /// Filters to events after this timestamp (inclusive).
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters to events before this timestamp (inclusive).
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many events before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the event passes every filter of this query.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref id) = self.aggregate_id
            && &event.aggregate_id != id
        {
            return false;
        }
        if let Some(ref kinds) = self.event_types
            && !kinds.contains(&event.event_type)
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && event.created_at < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && event.created_at > to
        {
            return false;
        }
        true
    }
}
