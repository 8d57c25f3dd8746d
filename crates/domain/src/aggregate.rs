//! Core aggregate trait.

use common::AggregateId;
use event_store::{Event, Version};

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate is never stored directly. It is rebuilt by replaying its
/// committed events in version order, and that replay must be pure:
/// - Given the same state and event, it must always produce the same new state
/// - It must not have side effects
/// - It must not fail (events represent facts that have happened)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// Returns the aggregate type name, used in errors and logs.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before its first event.
    fn id(&self) -> Option<&AggregateId>;

    /// Returns the version of the last applied event (0 when none).
    fn version(&self) -> Version;

    /// Applies one committed event.
    fn apply(&mut self, event: &Event);

    /// Applies multiple events in sequence.
    fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
