//! Kafka-compatible broker adapter (Kafka, Redpanda, MSK, ...).
//!
//! Maps the AMQP-shaped contract onto Kafka primitives:
//!
//! | contract            | Kafka                                                 |
//! |---------------------|-------------------------------------------------------|
//! | fanout exchange     | single-partition topic                                |
//! | exclusive queue     | fresh consumer group starting at the log end          |
//! | named durable queue | stable consumer group starting at the earliest offset |
//! | ack                 | commit `offset + 1`                                   |
//! | nack, requeue       | seek back to the message                              |
//! | nack, no requeue    | produce to the dead-letter topic, then commit         |
//!
//! One partition per topic keeps a single global order, which is what the
//! fanout topology promises.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use uuid::Uuid;

use crate::broker::{
    Broker, Channel, Consumer, Delivery, DeliveryTag, OutgoingMessage, QueueOptions,
};
use crate::{BrokerError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker backed by a Kafka-compatible cluster.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    brokers: String,
    timeout: Duration,
}

impl KafkaBroker {
    /// `brokers` is a comma-separated `host:port` list.
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Timeout for metadata probes, admin calls and produce acknowledgments.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn connect(&self) -> Result<Box<dyn Channel>> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        // librdkafka connects lazily; probe the cluster so an outage shows up here
        let probe = producer.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout))
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        tracing::info!(brokers = %self.brokers, "connected to kafka cluster");

        Ok(Box::new(KafkaChannel {
            brokers: self.brokers.clone(),
            timeout: self.timeout,
            producer,
            open: Arc::new(AtomicBool::new(true)),
            queues: Mutex::new(HashMap::new()),
        }))
    }
}

#[derive(Debug, Clone, Default)]
struct QueueBinding {
    topics: Vec<String>,
    exclusive: bool,
    dead_letter_topic: Option<String>,
}

struct KafkaChannel {
    brokers: String,
    timeout: Duration,
    producer: FutureProducer,
    open: Arc<AtomicBool>,
    queues: Mutex<HashMap<String, QueueBinding>>,
}

impl KafkaChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }

    fn queue(&self, name: &str) -> Result<QueueBinding> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }
}

/// Where a consumer group starts when it has no committed offset.
fn offset_reset(exclusive: bool) -> &'static str {
    if exclusive { "latest" } else { "earliest" }
}

#[async_trait]
impl Channel for KafkaChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let topic = NewTopic::new(exchange, 1, TopicReplication::Fixed(1));
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = admin
            .create_topics([&topic], &options)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BrokerError::Transport(format!(
                        "failed to create topic {name}: {code}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: OutgoingMessage) -> Result<()> {
        self.ensure_open()?;
        let record = FutureRecord::to(exchange)
            .payload(&message.body)
            .key(&message.routing_key);

        match self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
        {
            Ok(delivery) => {
                tracing::trace!(topic = %exchange, ?delivery, "kafka produce acknowledged");
                Ok(())
            }
            Err((e, _)) => Err(BrokerError::PublishFailed {
                exchange: exchange.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn declare_queue(&self, options: QueueOptions) -> Result<String> {
        self.ensure_open()?;
        let name = options
            .name
            .unwrap_or_else(|| format!("products-subscription-{}", Uuid::new_v4().simple()));

        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.clone())
            .or_insert_with(|| QueueBinding {
                topics: Vec::new(),
                exclusive: options.exclusive,
                dead_letter_topic: options.dead_letter_exchange,
            });
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let binding = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        if !binding.topics.iter().any(|t| t == exchange) {
            binding.topics.push(exchange.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        self.ensure_open()?;
        let binding = self.queue(queue)?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", queue)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset(binding.exclusive))
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::Transport(format!("failed to create consumer: {e}")))?;

        let topics: Vec<&str> = binding.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| BrokerError::Transport(format!("failed to subscribe: {e}")))?;

        tracing::info!(group = %queue, topics = ?binding.topics, "kafka consumer subscribed");

        Ok(Box::new(KafkaConsumer {
            consumer,
            producer: self.producer.clone(),
            timeout: self.timeout,
            dead_letter_topic: binding.dead_letter_topic,
            open: Arc::clone(&self.open),
            next_tag: 0,
            pending: HashMap::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
    producer: FutureProducer,
    timeout: Duration,
    dead_letter_topic: Option<String>,
    open: Arc<AtomicBool>,
    next_tag: DeliveryTag,
    pending: HashMap<DeliveryTag, OwnedMessage>,
}

impl KafkaConsumer {
    fn take(&mut self, tag: DeliveryTag) -> Result<OwnedMessage> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        self.pending
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    fn commit_past(&self, message: &OwnedMessage) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                message.topic(),
                message.partition(),
                Offset::Offset(message.offset() + 1),
            )
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn next_delivery(&mut self) -> Result<Delivery> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }

        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?
            .detach();

        self.next_tag += 1;
        let tag = self.next_tag;
        let delivery = Delivery {
            tag,
            body: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            redelivered: false,
        };
        self.pending.insert(tag, message);
        Ok(delivery)
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<()> {
        let message = self.take(tag)?;
        self.commit_past(&message)
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        let message = self.take(tag)?;

        if requeue {
            return self
                .consumer
                .seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    self.timeout,
                )
                .map_err(|e| BrokerError::Transport(e.to_string()));
        }

        if let Some(topic) = &self.dead_letter_topic {
            let body = message.payload().unwrap_or_default();
            let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic).payload(body);
            if let Some(key) = message.key() {
                record = record.key(key);
            }
            self.producer
                .send(record, Timeout::After(self.timeout))
                .await
                .map_err(|(e, _)| BrokerError::PublishFailed {
                    exchange: topic.clone(),
                    reason: e.to_string(),
                })?;
        }

        self.commit_past(&message)
    }
}
