//! The broker contract shared by the publisher and the projector.
//!
//! It mirrors the AMQP model the products pipeline was designed around:
//! a connection yields a [`Channel`]; channels declare durable fanout
//! exchanges, declare and bind queues, publish and start consumers; a
//! [`Consumer`] yields deliveries which must be acked or nacked.

use async_trait::async_trait;

use crate::Result;

/// Per-consumer delivery identifier used for ack/nack.
pub type DeliveryTag = u64;

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Opaque body bytes.
    pub body: Vec<u8>,
    /// Routing key. Fanout exchanges ignore it; partitioned brokers use it as a key.
    pub routing_key: String,
    /// Survive a broker restart.
    pub persistent: bool,
}

impl OutgoingMessage {
    /// A persistent message with the given routing key.
    pub fn persistent(body: Vec<u8>, routing_key: impl Into<String>) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            persistent: true,
        }
    }
}

/// A message handed to a consumer, pending acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub body: Vec<u8>,
    /// True if this message was delivered before and requeued.
    pub redelivered: bool,
}

/// Queue declaration options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue name; `None` lets the broker pick a unique name.
    pub name: Option<String>,
    /// Survive a broker restart.
    pub durable: bool,
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
    /// Exchange that receives messages rejected without requeue.
    pub dead_letter_exchange: Option<String>,
}

impl QueueOptions {
    /// An exclusive, durable, broker-named queue: one projector subscription.
    pub fn exclusive_subscription() -> Self {
        Self {
            name: None,
            durable: true,
            exclusive: true,
            dead_letter_exchange: None,
        }
    }

    /// A named durable queue shared across connections.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            durable: true,
            exclusive: false,
            dead_letter_exchange: None,
        }
    }

    /// Routes rejected messages to the given exchange.
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

/// Entry point to a broker: opens connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Opens a new connection and returns a channel on it.
    ///
    /// Every call yields an independent connection; nothing is shared
    /// between callers.
    async fn connect(&self) -> Result<Box<dyn Channel>>;
}

/// A channel on one broker connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Returns false once the underlying connection is gone.
    fn is_open(&self) -> bool;

    /// Declares a durable fanout exchange. Idempotent.
    async fn declare_fanout(&self, exchange: &str) -> Result<()>;

    /// Publishes a message to an exchange.
    async fn publish(&self, exchange: &str, message: OutgoingMessage) -> Result<()>;

    /// Declares a queue and returns its (possibly generated) name.
    async fn declare_queue(&self, options: QueueOptions) -> Result<String>;

    /// Binds a queue to an exchange.
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Starts consuming a queue with manual acknowledgment.
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>>;

    /// Closes the connection. Exclusive queues it owns are deleted.
    async fn close(&self) -> Result<()>;
}

/// A manual-ack consumer on one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Waits for the next delivery.
    ///
    /// Returns an error once the connection is lost; the consumer is
    /// unusable afterwards.
    async fn next_delivery(&mut self) -> Result<Delivery>;

    /// Acknowledges a delivery, removing it from the broker.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<()>;

    /// Rejects a delivery. With `requeue == false` the message is
    /// dead-lettered if the queue has a dead-letter exchange, else dropped.
    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<()>;
}
