use std::sync::Arc;
use std::time::Duration;

use event_store::{EventId, EventStore};
use tokio::sync::watch;

use crate::{EventPublisher, wait_for_shutdown};

/// Default number of outbox entries handled per pass.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause between passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Republishes events whose immediate publish did not go through.
///
/// Every append leaves an outbox entry behind until the event has reached
/// the broker. The relay drains those entries in append order, so an event
/// is published at least once even if the broker was down at write time.
pub struct OutboxRelay<S> {
    store: S,
    publisher: Arc<EventPublisher>,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S: EventStore> OutboxRelay<S> {
    pub fn new(store: S, publisher: Arc<EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Publishes one batch of pending events and returns how many went out.
    ///
    /// Stops at the first publish failure so later events never overtake
    /// an earlier one. Store errors are returned.
    pub async fn run_once(&self) -> event_store::Result<usize> {
        let pending = self.store.pending_publications(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published: Vec<EventId> = Vec::with_capacity(pending.len());
        for event in &pending {
            if let Err(e) = self.publisher.publish(event).await {
                tracing::debug!(
                    event_id = %event.event_id,
                    error = %e,
                    "outbox relay paused until the broker is reachable"
                );
                break;
            }
            published.push(event.event_id);
        }

        if !published.is_empty() {
            self.store.mark_published(&published).await?;
            metrics::counter!("outbox_events_relayed_total").increment(published.len() as u64);
        }

        Ok(published.len())
    }

    /// Runs passes every poll interval until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(relayed) => {
                            tracing::info!(relayed, "outbox relay published pending events")
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "outbox relay failed to read the event store"
                            )
                        }
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        tracing::info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Broker, InMemoryBroker, QueueOptions, codec::decode_event};
    use common::{AggregateId, Attributes};
    use event_store::{AppendOptions, InMemoryEventStore, NewEvent};

    const EXCHANGE: &str = "product_events";

    async fn inspect_queue(broker: &InMemoryBroker) -> Box<dyn crate::Channel> {
        let channel = broker.connect().await.unwrap();
        channel.declare_fanout(EXCHANGE).await.unwrap();
        channel
            .declare_queue(QueueOptions::durable("inspect"))
            .await
            .unwrap();
        channel.bind_queue("inspect", EXCHANGE).await.unwrap();
        channel
    }

    async fn append_created(store: &InMemoryEventStore) -> event_store::Event {
        store
            .append(
                NewEvent::created(AggregateId::new(), Attributes::new()),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn relays_pending_events_in_append_order() {
        let broker = InMemoryBroker::new();
        let _inspector = inspect_queue(&broker).await;
        let store = InMemoryEventStore::new();
        let first = append_created(&store).await;
        let second = append_created(&store).await;

        let publisher = Arc::new(EventPublisher::new(Arc::new(broker.clone()), EXCHANGE));
        let relay = OutboxRelay::new(store.clone(), publisher);

        assert_eq!(relay.run_once().await.unwrap(), 2);
        assert_eq!(store.pending_count().await, 0);

        let ids: Vec<_> = broker
            .drain_queue("inspect")
            .iter()
            .map(|body| decode_event(body).unwrap().event_id)
            .collect();
        assert_eq!(ids, vec![first.event_id, second.event_id]);

        assert_eq!(relay.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keeps_entries_while_broker_is_down() {
        let broker = InMemoryBroker::new();
        let store = InMemoryEventStore::new();
        append_created(&store).await;

        let publisher = Arc::new(EventPublisher::new(Arc::new(broker.clone()), EXCHANGE));
        let relay = OutboxRelay::new(store.clone(), publisher);

        broker.set_available(false);
        assert_eq!(relay.run_once().await.unwrap(), 0);
        assert_eq!(store.pending_count().await, 1);

        broker.set_available(true);
        assert_eq!(relay.run_once().await.unwrap(), 1);
        assert_eq!(store.pending_count().await, 0);
        assert_eq!(broker.published_count(EXCHANGE), 1);
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let broker = InMemoryBroker::new();
        let store = InMemoryEventStore::new();
        for _ in 0..5 {
            append_created(&store).await;
        }

        let publisher = Arc::new(EventPublisher::new(Arc::new(broker.clone()), EXCHANGE));
        let relay = OutboxRelay::new(store.clone(), publisher).with_batch_size(2);

        assert_eq!(relay.run_once().await.unwrap(), 2);
        assert_eq!(store.pending_count().await, 3);
    }

    #[tokio::test]
    async fn store_failure_is_returned() {
        let broker = InMemoryBroker::new();
        let store = InMemoryEventStore::new();
        store.set_unavailable(true);

        let publisher = Arc::new(EventPublisher::new(Arc::new(broker), EXCHANGE));
        let relay = OutboxRelay::new(store, publisher);

        assert!(relay.run_once().await.is_err());
    }

    #[tokio::test]
    async fn run_drains_in_background_and_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let store = InMemoryEventStore::new();
        append_created(&store).await;

        let publisher = Arc::new(EventPublisher::new(Arc::new(broker.clone()), EXCHANGE));
        let relay = Arc::new(
            OutboxRelay::new(store.clone(), publisher)
                .with_poll_interval(Duration::from_millis(10)),
        );

        let (tx, rx) = watch::channel(false);
        let task = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.run(rx).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while store.pending_count().await > 0 {
            assert!(tokio::time::Instant::now() < deadline, "relay never drained the outbox");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
