//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, Event, EventStore, NewEvent, Version};

use crate::aggregate::Aggregate;
use crate::error::Result;

/// Outcome of a command that may legitimately do nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// An event was appended.
    Applied(Event),
    /// Nothing to do; no event was appended or published.
    NoOp,
}

impl CommandOutcome {
    pub fn event(&self) -> Option<&Event> {
        match self {
            CommandOutcome::Applied(event) => Some(event),
            CommandOutcome::NoOp => None,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            CommandOutcome::Applied(event) => Some(event),
            CommandOutcome::NoOp => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, CommandOutcome::NoOp)
    }
}

/// Loads aggregates from the event store and appends new events.
///
/// The handler is responsible for:
/// 1. Rebuilding the aggregate by replaying its events
/// 2. Appending a new event guarded by the version the caller observed
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate has no events, returns a default instance.
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<A> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        aggregate.apply_events(&events);
        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it has no events.
    pub async fn load_existing(&self, aggregate_id: &AggregateId) -> Result<Option<A>> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Appends an event, failing with a concurrency conflict unless the
    /// aggregate is still at `expected`.
    pub async fn append(&self, event: NewEvent, expected: Version) -> Result<Event> {
        let options = if expected == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(expected)
        };

        Ok(self.store.append(event, options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainError;
    use common::Attributes;
    use event_store::InMemoryEventStore;

    #[derive(Debug, Default)]
    struct Tally {
        id: Option<AggregateId>,
        version: Version,
        seen: usize,
    }

    impl Aggregate for Tally {
        fn aggregate_type() -> &'static str {
            "Tally"
        }

        fn id(&self) -> Option<&AggregateId> {
            self.id.as_ref()
        }

        fn version(&self) -> Version {
            self.version
        }

        fn apply(&mut self, event: &Event) {
            self.id.get_or_insert_with(|| event.aggregate_id.clone());
            self.version = event.version;
            self.seen += 1;
        }
    }

    #[tokio::test]
    async fn test_append_then_load() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let first = handler
            .append(
                NewEvent::created(id.clone(), Attributes::new()),
                Version::initial(),
            )
            .await
            .unwrap();
        assert_eq!(first.version, Version::first());

        handler
            .append(NewEvent::updated(id.clone(), Attributes::new()), first.version)
            .await
            .unwrap();

        let tally = handler.load(&id).await.unwrap();
        assert_eq!(tally.version(), Version::new(2));
        assert_eq!(tally.seen, 2);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        handler
            .append(
                NewEvent::created(id.clone(), Attributes::new()),
                Version::initial(),
            )
            .await
            .unwrap();

        let err = handler
            .append(
                NewEvent::created(id.clone(), Attributes::new()),
                Version::initial(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(err, DomainError::EventStore(_)));
    }

    #[tokio::test]
    async fn test_load_existing_returns_none_for_new() {
        let handler: CommandHandler<_, Tally> = CommandHandler::new(InMemoryEventStore::new());

        let result = handler.load_existing(&AggregateId::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_outcome_accessors() {
        let event = NewEvent::deleted(AggregateId::from("p-1"))
            .commit(Version::first(), chrono::Utc::now());
        let applied = CommandOutcome::Applied(event.clone());

        assert_eq!(applied.event(), Some(&event));
        assert!(!applied.is_noop());
        assert_eq!(applied.into_event(), Some(event));
        assert!(CommandOutcome::NoOp.is_noop());
        assert_eq!(CommandOutcome::NoOp.event(), None);
    }
}
