//! In-process broker with AMQP fanout semantics.
//!
//! Used by tests and by single-process deployments where the publisher and
//! the projector share one address space. It models the behaviours the
//! pipeline depends on: fanout copies per bound queue, exclusive queues that
//! vanish with their connection, manual acks, requeue and dead-lettering,
//! and broker outages.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::broker::{
    Broker, Channel, Consumer, Delivery, DeliveryTag, OutgoingMessage, QueueOptions,
};
use crate::{BrokerError, Result};

type ConnectionId = u64;

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

struct Queue {
    owner: Option<ConnectionId>,
    dead_letter_exchange: Option<String>,
    ready: VecDeque<StoredMessage>,
    waiters: Vec<Arc<Notify>>,
}

impl Queue {
    fn push(&mut self, message: StoredMessage) {
        self.ready.push_back(message);
        self.wake();
    }

    fn wake(&self) {
        for waiter in &self.waiters {
            waiter.notify_one();
        }
    }
}

struct State {
    available: bool,
    exchanges: HashMap<String, Vec<String>>,
    queues: HashMap<String, Queue>,
    connections: HashMap<ConnectionId, Arc<AtomicBool>>,
    next_connection: ConnectionId,
    published: HashMap<String, usize>,
    total_connects: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            available: true,
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            connections: HashMap::new(),
            next_connection: 0,
            published: HashMap::new(),
            total_connects: 0,
        }
    }
}

impl State {
    /// Copies a message into every queue bound to the exchange.
    fn route(&mut self, exchange: &str, message: StoredMessage) -> Result<()> {
        let bindings = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .clone();

        for queue_name in bindings {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.push(message.clone());
            }
        }
        Ok(())
    }

    fn close_connection(&mut self, id: ConnectionId) {
        let Some(flag) = self.connections.remove(&id) else {
            return;
        };
        flag.store(false, Ordering::SeqCst);

        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(id))
            .map(|(name, _)| name.clone())
            .collect();

        for name in owned {
            if let Some(queue) = self.queues.remove(&name) {
                queue.wake();
            }
            for bindings in self.exchanges.values_mut() {
                bindings.retain(|b| b != &name);
            }
        }

        // Consumers of this connection on shared queues must notice the close too
        for queue in self.queues.values() {
            queue.wake();
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id);
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory AMQP-style broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    /// Creates an empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage (`false`) or recovery (`true`).
    ///
    /// Going down closes every open connection and refuses new ones.
    pub fn set_available(&self, available: bool) {
        let mut state = lock(&self.state);
        state.available = available;
        if !available {
            state.close_all();
        }
        tracing::debug!(available, "in-memory broker availability changed");
    }

    /// Closes every open connection while staying reachable (a network blip).
    pub fn drop_connections(&self) {
        lock(&self.state).close_all();
    }

    /// Number of messages ever published to an exchange.
    pub fn published_count(&self, exchange: &str) -> usize {
        lock(&self.state)
            .published
            .get(exchange)
            .copied()
            .unwrap_or(0)
    }

    /// Number of currently open connections.
    pub fn open_connections(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// Number of connections ever opened.
    pub fn total_connects(&self) -> usize {
        lock(&self.state).total_connects
    }

    /// Number of queues currently bound to an exchange.
    pub fn binding_count(&self, exchange: &str) -> usize {
        lock(&self.state)
            .exchanges
            .get(exchange)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Removes and returns every ready message of a queue.
    pub fn drain_queue(&self, queue: &str) -> Vec<Vec<u8>> {
        lock(&self.state)
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Channel>> {
        let mut state = lock(&self.state);
        if !state.available {
            return Err(BrokerError::ConnectionFailed(
                "in-memory broker is unavailable".to_string(),
            ));
        }

        state.next_connection += 1;
        state.total_connects += 1;
        let id = state.next_connection;
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, Arc::clone(&open));

        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            id,
            open,
        }))
    }
}

struct MemoryChannel {
    state: Arc<Mutex<State>>,
    id: ConnectionId,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        lock(&self.state)
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, exchange: &str, message: OutgoingMessage) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        state.route(
            exchange,
            StoredMessage {
                body: message.body,
                redelivered: false,
            },
        )?;
        *state.published.entry(exchange.to_string()).or_default() += 1;
        Ok(())
    }

    async fn declare_queue(&self, options: QueueOptions) -> Result<String> {
        self.ensure_open()?;
        let name = options
            .name
            .unwrap_or_else(|| format!("amq.gen-{}", Uuid::new_v4().simple()));

        let mut state = lock(&self.state);
        if let Some(existing) = state.queues.get(&name) {
            return match existing.owner {
                Some(owner) if owner != self.id => Err(BrokerError::UnknownQueue(name)),
                _ => Ok(name),
            };
        }

        state.queues.insert(
            name.clone(),
            Queue {
                owner: options.exclusive.then_some(self.id),
                dead_letter_exchange: options.dead_letter_exchange,
                ready: VecDeque::new(),
                waiters: Vec::new(),
            },
        );
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        if !bindings.iter().any(|b| b == queue) {
            bindings.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        self.ensure_open()?;
        let notify = Arc::new(Notify::new());
        {
            let mut state = lock(&self.state);
            let q = state
                .queues
                .get_mut(queue)
                .filter(|q| q.owner.is_none_or(|owner| owner == self.id))
                .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
            q.waiters.push(Arc::clone(&notify));
            // Messages may already be waiting
            notify.notify_one();
        }

        Ok(Box::new(MemoryConsumer {
            state: Arc::clone(&self.state),
            queue: queue.to_string(),
            open: Arc::clone(&self.open),
            notify,
            next_tag: 0,
            unacked: BTreeMap::new(),
        }))
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).close_connection(self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        lock(&self.state).close_connection(self.id);
    }
}

struct MemoryConsumer {
    state: Arc<Mutex<State>>,
    queue: String,
    open: Arc<AtomicBool>,
    notify: Arc<Notify>,
    next_tag: DeliveryTag,
    unacked: BTreeMap<DeliveryTag, StoredMessage>,
}

impl MemoryConsumer {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next_delivery(&mut self) -> Result<Delivery> {
        loop {
            {
                self.ensure_open()?;
                let mut state = lock(&self.state);
                let queue = state
                    .queues
                    .get_mut(&self.queue)
                    .ok_or(BrokerError::ConnectionClosed)?;

                if let Some(message) = queue.ready.pop_front() {
                    self.next_tag += 1;
                    let tag = self.next_tag;
                    let delivery = Delivery {
                        tag,
                        body: message.body.clone(),
                        redelivered: message.redelivered,
                    };
                    self.unacked.insert(tag, message);
                    return Ok(delivery);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<()> {
        self.ensure_open()?;
        self.unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.ensure_open()?;
        let mut message = self
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

        let mut state = lock(&self.state);
        if requeue {
            message.redelivered = true;
            if let Some(queue) = state.queues.get_mut(&self.queue) {
                queue.ready.push_front(message);
                queue.wake();
            }
            return Ok(());
        }

        let dead_letter = state
            .queues
            .get(&self.queue)
            .and_then(|q| q.dead_letter_exchange.clone());
        if let Some(exchange) = dead_letter {
            // An undeclared dead-letter exchange drops the message, as AMQP does
            if let Err(e) = state.route(&exchange, message) {
                tracing::debug!(error = %e, "dead-letter exchange missing, message dropped");
            }
        }
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(queue) = state.queues.get_mut(&self.queue) {
            queue.waiters.retain(|w| !Arc::ptr_eq(w, &self.notify));
            // Unacknowledged messages go back to a surviving queue
            for (_, mut message) in std::mem::take(&mut self.unacked).into_iter().rev() {
                message.redelivered = true;
                queue.ready.push_front(message);
            }
            queue.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const EXCHANGE: &str = "product_events";

    fn message(body: &str) -> OutgoingMessage {
        OutgoingMessage::persistent(body.as_bytes().to_vec(), "key")
    }

    async fn subscribe(broker: &InMemoryBroker) -> (Box<dyn Channel>, Box<dyn Consumer>) {
        let channel = broker.connect().await.unwrap();
        channel.declare_fanout(EXCHANGE).await.unwrap();
        let queue = channel
            .declare_queue(QueueOptions::exclusive_subscription())
            .await
            .unwrap();
        channel.bind_queue(&queue, EXCHANGE).await.unwrap();
        let consumer = channel.consume(&queue).await.unwrap();
        (channel, consumer)
    }

    async fn next(consumer: &mut Box<dyn Consumer>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), consumer.next_delivery())
            .await
            .expect("delivery timed out")
            .unwrap()
    }

    #[tokio::test]
    async fn fanout_delivers_a_copy_to_every_queue() {
        let broker = InMemoryBroker::new();
        let (_c1, mut first) = subscribe(&broker).await;
        let (_c2, mut second) = subscribe(&broker).await;

        let publisher = broker.connect().await.unwrap();
        publisher.publish(EXCHANGE, message("a")).await.unwrap();

        assert_eq!(next(&mut first).await.body, b"a");
        assert_eq!(next(&mut second).await.body, b"a");
        assert_eq!(broker.published_count(EXCHANGE), 1);
    }

    #[tokio::test]
    async fn deliveries_are_fifo_per_queue() {
        let broker = InMemoryBroker::new();
        let (_channel, mut consumer) = subscribe(&broker).await;
        let publisher = broker.connect().await.unwrap();

        for body in ["1", "2", "3"] {
            publisher.publish(EXCHANGE, message(body)).await.unwrap();
        }

        for expected in ["1", "2", "3"] {
            let delivery = next(&mut consumer).await;
            assert_eq!(delivery.body, expected.as_bytes());
            consumer.ack(delivery.tag).await.unwrap();
        }
    }

    #[tokio::test]
    async fn publish_to_undeclared_exchange_fails() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();

        let result = channel.publish("nowhere", message("x")).await;
        assert!(matches!(result, Err(BrokerError::UnknownExchange(_))));
        assert_eq!(broker.published_count("nowhere"), 0);
    }

    #[tokio::test]
    async fn exclusive_queue_disappears_with_its_connection() {
        let broker = InMemoryBroker::new();
        let (channel, _consumer) = subscribe(&broker).await;
        assert_eq!(broker.binding_count(EXCHANGE), 1);

        channel.close().await.unwrap();

        assert!(!channel.is_open());
        assert_eq!(broker.binding_count(EXCHANGE), 0);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn unavailable_broker_refuses_connections_and_drops_open_ones() {
        let broker = InMemoryBroker::new();
        let (channel, mut consumer) = subscribe(&broker).await;

        broker.set_available(false);

        assert!(!channel.is_open());
        assert!(matches!(
            consumer.next_delivery().await,
            Err(BrokerError::ConnectionClosed)
        ));
        assert!(matches!(
            broker.connect().await,
            Err(BrokerError::ConnectionFailed(_))
        ));

        broker.set_available(true);
        assert!(broker.connect().await.is_ok());
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_connection_loss() {
        let broker = InMemoryBroker::new();
        let (_channel, mut consumer) = subscribe(&broker).await;

        let waiter = tokio::spawn(async move { consumer.next_delivery().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.drop_connections();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BrokerError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn nack_without_requeue_dead_letters() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_fanout(EXCHANGE).await.unwrap();
        channel.declare_fanout("dead_letters").await.unwrap();
        let dlq = channel
            .declare_queue(QueueOptions::durable("dead_letters.inspect"))
            .await
            .unwrap();
        channel.bind_queue(&dlq, "dead_letters").await.unwrap();

        let queue = channel
            .declare_queue(
                QueueOptions::exclusive_subscription().with_dead_letter_exchange("dead_letters"),
            )
            .await
            .unwrap();
        channel.bind_queue(&queue, EXCHANGE).await.unwrap();
        let mut consumer = channel.consume(&queue).await.unwrap();

        channel.publish(EXCHANGE, message("poison")).await.unwrap();
        let delivery = next(&mut consumer).await;
        consumer.nack(delivery.tag, false).await.unwrap();

        assert_eq!(broker.drain_queue(&dlq), vec![b"poison".to_vec()]);
        assert!(matches!(
            consumer.ack(delivery.tag).await,
            Err(BrokerError::UnknownDeliveryTag(_))
        ));
    }

    #[tokio::test]
    async fn nack_without_dead_letter_exchange_drops() {
        let broker = InMemoryBroker::new();
        let (channel, mut consumer) = subscribe(&broker).await;

        channel.publish(EXCHANGE, message("poison")).await.unwrap();
        channel.publish(EXCHANGE, message("next")).await.unwrap();

        let delivery = next(&mut consumer).await;
        consumer.nack(delivery.tag, false).await.unwrap();

        let delivery = next(&mut consumer).await;
        assert_eq!(delivery.body, b"next");
        assert!(!delivery.redelivered);
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_first() {
        let broker = InMemoryBroker::new();
        let (channel, mut consumer) = subscribe(&broker).await;

        channel.publish(EXCHANGE, message("a")).await.unwrap();
        channel.publish(EXCHANGE, message("b")).await.unwrap();

        let delivery = next(&mut consumer).await;
        consumer.nack(delivery.tag, true).await.unwrap();

        let again = next(&mut consumer).await;
        assert_eq!(again.body, b"a");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn unacked_messages_return_to_shared_queue_when_consumer_drops() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel.declare_fanout(EXCHANGE).await.unwrap();
        let queue = channel
            .declare_queue(QueueOptions::durable("shared"))
            .await
            .unwrap();
        channel.bind_queue(&queue, EXCHANGE).await.unwrap();

        let mut consumer = channel.consume(&queue).await.unwrap();
        channel.publish(EXCHANGE, message("a")).await.unwrap();
        let _ = next(&mut consumer).await;
        drop(consumer);

        let mut consumer = channel.consume(&queue).await.unwrap();
        let delivery = next(&mut consumer).await;
        assert_eq!(delivery.body, b"a");
        assert!(delivery.redelivered);
    }

    #[tokio::test]
    async fn exclusive_queue_is_private_to_its_connection() {
        let broker = InMemoryBroker::new();
        let owner = broker.connect().await.unwrap();
        let queue = owner
            .declare_queue(QueueOptions::exclusive_subscription())
            .await
            .unwrap();

        let other = broker.connect().await.unwrap();
        assert!(matches!(
            other.consume(&queue).await,
            Err(BrokerError::UnknownQueue(_))
        ));
    }
}
