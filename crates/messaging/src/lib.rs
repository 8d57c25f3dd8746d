//! Broker plumbing for the products pipeline.
//!
//! - [`Broker`], [`Channel`] and [`Consumer`] describe the AMQP-like contract:
//!   durable fanout topics, exclusive auto-named queues, ack/nack
//! - [`InMemoryBroker`] implements it in-process
//! - `KafkaBroker` (feature `kafka`) maps it onto a Kafka-compatible cluster
//! - [`EventPublisher`] publishes committed events over an owned channel
//! - [`OutboxRelay`] republishes events whose immediate publish failed
//! - [`wait_for_shutdown`] is the stop signal shared by the long-running tasks

pub mod broker;
pub mod codec;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod outbox;
pub mod publisher;
pub mod shutdown;

pub use broker::{Broker, Channel, Consumer, Delivery, DeliveryTag, OutgoingMessage, QueueOptions};
pub use error::{BrokerError, Result};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::InMemoryBroker;
pub use outbox::OutboxRelay;
pub use publisher::EventPublisher;
pub use shutdown::wait_for_shutdown;
