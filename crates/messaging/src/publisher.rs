use std::sync::Arc;

use event_store::Event;
use tokio::sync::Mutex;

use crate::{
    BrokerError, Result,
    broker::{Broker, Channel, OutgoingMessage},
    codec::encode_event,
};

/// Publishes committed events to the product fanout topic.
///
/// Owns one broker channel, opened lazily on the first publish and
/// replaced whenever it is found closed or a publish on it fails. The
/// channel is never shared with consumers.
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
    channel: Mutex<Option<Box<dyn Channel>>>,
}

impl EventPublisher {
    /// Creates a publisher for the given exchange. Does not connect.
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            channel: Mutex::new(None),
        }
    }

    /// The exchange events are published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Returns true if the publisher currently holds an open channel.
    pub async fn is_connected(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    /// Publishes one event as a persistent message keyed by its aggregate id.
    ///
    /// Failures are logged and returned; they never touch the event store.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type
        )
    )]
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let body = encode_event(event)?;
        let message = OutgoingMessage::persistent(body, event.aggregate_id.as_str());

        let mut slot = self.channel.lock().await;
        match self.publish_on(&mut slot, message).await {
            Ok(()) => {
                metrics::counter!("products_events_published_total").increment(1);
                tracing::debug!(exchange = %self.exchange, "event published");
                Ok(())
            }
            Err(e) => {
                // Start over with a fresh connection on the next publish
                *slot = None;
                metrics::counter!("products_publish_failures_total").increment(1);
                tracing::warn!(exchange = %self.exchange, error = %e, "failed to publish event");
                Err(e)
            }
        }
    }

    async fn publish_on(
        &self,
        slot: &mut Option<Box<dyn Channel>>,
        message: OutgoingMessage,
    ) -> Result<()> {
        if !slot.as_ref().is_some_and(|c| c.is_open()) {
            *slot = None;
            let channel = self.broker.connect().await?;
            channel.declare_fanout(&self.exchange).await?;
            tracing::info!(exchange = %self.exchange, "publisher channel established");
            *slot = Some(channel);
        }

        let channel = slot.as_ref().ok_or(BrokerError::ConnectionClosed)?;
        channel.publish(&self.exchange, message).await
    }

    /// Closes the owned channel, if any. A later publish reconnects.
    pub async fn close(&self) -> Result<()> {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await?;
            tracing::info!(exchange = %self.exchange, "publisher channel closed");
        }
        Ok(())
    }
}
