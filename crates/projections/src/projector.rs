//! Broker-driven projector.
//!
//! Subscribes to the product events exchange through an exclusive queue and
//! folds every delivery into the read model. Each delivery is acked once the
//! read model accepted it and nacked without requeue otherwise, so a poison
//! message ends up on the dead-letter exchange instead of looping.
//!
//! The subscription is a small state machine:
//!
//! ```text
//! Disconnected --connect/declare/bind/consume--> Consuming
//! Consuming --connection lost--> Disconnected (retry after a delay)
//! any --shutdown--> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use messaging::codec::decode_event;
use messaging::{Broker, BrokerError, Channel, Consumer, Delivery, QueueOptions, wait_for_shutdown};
use tokio::sync::watch;

use crate::Result;
use crate::read_model::ReadModelStore;
use crate::views::{ProductProjection, ProjectionOutcome};

/// Default pause before reconnecting after the broker went away.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Where the projector subscribes and how it recovers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Fanout exchange carrying product events.
    pub exchange: String,
    /// Exchange receiving rejected deliveries. A durable queue of the same
    /// name is bound to it so dead letters can be inspected.
    pub dead_letter_exchange: Option<String>,
    pub retry_delay: Duration,
}

impl ProjectorConfig {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            dead_letter_exchange: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Lifecycle of the projector's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectorState {
    Disconnected,
    Consuming,
    Stopped,
}

impl ProjectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectorState::Disconnected => "disconnected",
            ProjectorState::Consuming => "consuming",
            ProjectorState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ProjectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a consuming session ended.
enum SessionEnd {
    Shutdown,
    ConnectionLost(BrokerError),
}

/// Consumes product events from the broker into a read model.
pub struct Projector<R> {
    broker: Arc<dyn Broker>,
    projection: ProductProjection<R>,
    config: ProjectorConfig,
    state: watch::Sender<ProjectorState>,
}

impl<R: ReadModelStore> Projector<R> {
    pub fn new(
        broker: Arc<dyn Broker>,
        projection: ProductProjection<R>,
        config: ProjectorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ProjectorState::Disconnected);
        Self {
            broker,
            projection,
            config,
            state,
        }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    pub fn projection(&self) -> &ProductProjection<R> {
        &self.projection
    }

    /// Current subscription state.
    pub fn state(&self) -> ProjectorState {
        *self.state.borrow()
    }

    /// Watches subscription state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ProjectorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ProjectorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "projector state changed");
        }
    }

    /// Consumes until `shutdown` turns true, reconnecting whenever the
    /// connection is lost.
    #[tracing::instrument(skip(self, shutdown), fields(exchange = %self.config.exchange))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_state(ProjectorState::Disconnected);

            let session = tokio::select! {
                session = self.open_session() => session,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match session {
                Ok((channel, mut consumer, queue)) => {
                    self.set_state(ProjectorState::Consuming);
                    tracing::info!(%queue, "projector subscribed");

                    let end = self.consume(consumer.as_mut(), &mut shutdown).await;
                    drop(consumer);
                    match end {
                        SessionEnd::Shutdown => {
                            if let Err(e) = channel.close().await {
                                tracing::debug!(error = %e, "closing projector channel failed");
                            }
                            break;
                        }
                        SessionEnd::ConnectionLost(e) => {
                            tracing::warn!(error = %e, "projector lost its broker connection");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.config.retry_delay.as_millis() as u64,
                        "projector could not subscribe"
                    );
                }
            }

            self.set_state(ProjectorState::Disconnected);
            metrics::counter!("projector_reconnects_total").increment(1);

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.set_state(ProjectorState::Stopped);
        tracing::info!("projector stopped");
    }

    /// Connects, declares the topology and starts consuming.
    async fn open_session(
        &self,
    ) -> messaging::Result<(Box<dyn Channel>, Box<dyn Consumer>, String)> {
        let channel = self.broker.connect().await?;
        channel.declare_fanout(&self.config.exchange).await?;

        let mut options = QueueOptions::exclusive_subscription();
        if let Some(dlx) = &self.config.dead_letter_exchange {
            channel.declare_fanout(dlx).await?;
            channel.declare_queue(QueueOptions::durable(dlx)).await?;
            channel.bind_queue(dlx, dlx).await?;
            options = options.with_dead_letter_exchange(dlx);
        }

        let queue = channel.declare_queue(options).await?;
        channel.bind_queue(&queue, &self.config.exchange).await?;
        let consumer = channel.consume(&queue).await?;
        Ok((channel, consumer, queue))
    }

    async fn consume(
        &self,
        consumer: &mut dyn Consumer,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let delivery = tokio::select! {
                delivery = consumer.next_delivery() => delivery,
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
            };
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => return SessionEnd::ConnectionLost(e),
            };

            if let Err(e) = self.settle(consumer, delivery).await {
                return SessionEnd::ConnectionLost(e);
            }
        }
    }

    /// Applies one delivery and acks or dead-letters it.
    async fn settle(
        &self,
        consumer: &mut dyn Consumer,
        delivery: Delivery,
    ) -> messaging::Result<()> {
        match self.handle(&delivery.body).await {
            Ok(outcome) => {
                metrics::counter!(
                    "projector_events_applied_total",
                    "source" => "broker",
                    "outcome" => outcome.as_str()
                )
                .increment(1);
                consumer.ack(delivery.tag).await
            }
            Err(e) => {
                tracing::error!(
                    tag = delivery.tag,
                    redelivered = delivery.redelivered,
                    error = %e,
                    "rejecting delivery"
                );
                metrics::counter!("projector_events_rejected_total").increment(1);
                consumer.nack(delivery.tag, false).await
            }
        }
    }

    async fn handle(&self, body: &[u8]) -> Result<ProjectionOutcome> {
        let event = decode_event(body)?;
        self.projection.apply(&event).await
    }
}
