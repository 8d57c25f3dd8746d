//! The products service: write side, projector and outbox relay in one process.
//!
//! Backends are chosen by URL scheme from [`Config`]; everything below the
//! wiring only sees the `EventStore`, `ReadModelStore` and `Broker` traits.

pub mod config;
pub mod error;

use std::sync::Arc;

use domain::ProductCommandService;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use messaging::{Broker, EventPublisher, InMemoryBroker, OutboxRelay};
use projections::{
    InMemoryReadModel, PostgresReadModel, ProductProjection, ProductQueryService,
    ProjectionProcessor, Projector, ProjectorConfig, ReadModelStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use config::{BrokerUrl, Config, ConfigError, LogFormat, StorageUrl};
pub use error::{Result, ServiceError};

pub type SharedEventStore = Arc<dyn EventStore>;
pub type SharedReadModel = Arc<dyn ReadModelStore>;

/// Fully wired products pipeline.
pub struct Service {
    config: Config,
    store: SharedEventStore,
    publisher: Arc<EventPublisher>,
    commands: ProductCommandService<SharedEventStore>,
    queries: ProductQueryService<SharedReadModel>,
    projector: Arc<Projector<SharedReadModel>>,
    relay: Arc<OutboxRelay<SharedEventStore>>,
    read_model: SharedReadModel,
}

impl Service {
    /// Connects every backend named in `config`, running migrations where needed.
    pub async fn build(config: Config) -> Result<Self> {
        let store = connect_event_store(&config.event_store_url).await?;
        let read_model = connect_read_model(&config.read_model_url).await?;
        let broker = connect_broker(&config.broker_url)?;
        Ok(Self::assemble(config, store, read_model, broker))
    }

    /// Wires already-constructed backends together.
    pub fn assemble(
        config: Config,
        store: SharedEventStore,
        read_model: SharedReadModel,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::new(
            Arc::clone(&broker),
            config.broker_topic.clone(),
        ));
        let commands = ProductCommandService::new(Arc::clone(&store), Arc::clone(&publisher))
            .with_policy(config.existence_policy);
        let queries = ProductQueryService::new(Arc::clone(&read_model));

        let mut projector_config = ProjectorConfig::new(config.broker_topic.clone())
            .with_retry_delay(config.projector_retry);
        if let Some(dlx) = &config.dead_letter_topic {
            projector_config = projector_config.with_dead_letter_exchange(dlx.clone());
        }
        let projector = Arc::new(Projector::new(
            broker,
            ProductProjection::new(Arc::clone(&read_model)),
            projector_config,
        ));

        let relay = Arc::new(
            OutboxRelay::new(Arc::clone(&store), Arc::clone(&publisher))
                .with_batch_size(config.outbox_batch_size)
                .with_poll_interval(config.outbox_poll_interval),
        );

        Self {
            config,
            store,
            publisher,
            commands,
            queries,
            projector,
            relay,
            read_model,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn commands(&self) -> &ProductCommandService<SharedEventStore> {
        &self.commands
    }

    pub fn queries(&self) -> &ProductQueryService<SharedReadModel> {
        &self.queries
    }

    pub fn projector(&self) -> &Arc<Projector<SharedReadModel>> {
        &self.projector
    }

    pub fn relay(&self) -> &Arc<OutboxRelay<SharedEventStore>> {
        &self.relay
    }

    /// Clears the read model and replays the whole event store into it.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_read_model(&self) -> Result<u64> {
        let mut processor = ProjectionProcessor::new(Arc::clone(&self.store));
        processor.register(Box::new(ProductProjection::new(Arc::clone(&self.read_model))));
        let replayed = processor.rebuild_all().await?;
        tracing::info!(replayed, "read model rebuilt from the event store");
        Ok(replayed)
    }

    /// Starts the projector and the outbox relay, rebuilding the read model
    /// first when configured. Both tasks stop once `shutdown` turns true.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        if self.config.rebuild_on_start {
            self.rebuild_read_model().await?;
        }

        let projector = Arc::clone(&self.projector);
        let projector_shutdown = shutdown.clone();
        let relay = Arc::clone(&self.relay);

        Ok(vec![
            tokio::spawn(async move { projector.run(projector_shutdown).await }),
            tokio::spawn(async move { relay.run(shutdown).await }),
        ])
    }

    /// Releases the publisher's broker channel.
    pub async fn close(&self) -> Result<()> {
        self.publisher.close().await?;
        Ok(())
    }
}

async fn connect_event_store(url: &StorageUrl) -> Result<SharedEventStore> {
    match url {
        StorageUrl::Memory => {
            tracing::info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StorageUrl::Postgres(url) => {
            let store = PostgresEventStore::connect(url).await?;
            store.run_migrations().await?;
            tracing::info!("connected to postgres event store");
            Ok(Arc::new(store))
        }
    }
}

async fn connect_read_model(url: &StorageUrl) -> Result<SharedReadModel> {
    match url {
        StorageUrl::Memory => {
            tracing::info!("using in-memory read model");
            Ok(Arc::new(InMemoryReadModel::new()))
        }
        StorageUrl::Postgres(url) => {
            let read_model = PostgresReadModel::connect(url).await?;
            read_model.run_migrations().await?;
            tracing::info!("connected to postgres read model");
            Ok(Arc::new(read_model))
        }
    }
}

fn connect_broker(url: &BrokerUrl) -> Result<Arc<dyn Broker>> {
    match url {
        BrokerUrl::Memory => {
            tracing::info!("using in-process broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
        #[cfg(feature = "kafka")]
        BrokerUrl::Kafka(brokers) => {
            tracing::info!(%brokers, "using kafka broker");
            Ok(Arc::new(messaging::KafkaBroker::new(brokers.clone())))
        }
        #[cfg(not(feature = "kafka"))]
        BrokerUrl::Kafka(_) => Err(ServiceError::KafkaDisabled),
    }
}

/// Registers descriptions for the counters the pipeline emits.
pub fn describe_metrics() {
    metrics::describe_counter!("products_commands_total", "Commands handled, by command");
    metrics::describe_counter!(
        "products_events_published_total",
        "Events published to the broker"
    );
    metrics::describe_counter!(
        "products_publish_failures_total",
        "Publish attempts that failed and were left to the outbox relay"
    );
    metrics::describe_counter!(
        "products_publish_deferred_total",
        "Events left to the outbox relay because older events were still pending"
    );
    metrics::describe_counter!(
        "projector_events_applied_total",
        "Events applied to the read model, by source"
    );
    metrics::describe_counter!(
        "projector_events_rejected_total",
        "Deliveries rejected to the dead-letter exchange"
    );
    metrics::describe_counter!(
        "projector_reconnects_total",
        "Projector subscription attempts after a lost or failed connection"
    );
    metrics::describe_counter!(
        "outbox_events_relayed_total",
        "Events published by the outbox relay"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_in_memory_by_default() {
        let service = Service::build(Config::default()).await.unwrap();
        assert_eq!(service.config().broker_topic, "product_events");
        assert_eq!(
            service.projector().config().dead_letter_exchange.as_deref(),
            Some("product_events.dead_letter")
        );
        assert_eq!(service.queries().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn projector_follows_config() {
        let config = Config {
            dead_letter_topic: None,
            projector_retry: std::time::Duration::from_secs(1),
            ..Config::default()
        };
        let service = Service::build(config).await.unwrap();
        let projector_config = service.projector().config();
        assert_eq!(projector_config.dead_letter_exchange, None);
        assert_eq!(projector_config.retry_delay, std::time::Duration::from_secs(1));
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn kafka_requires_the_feature() {
        let config = Config {
            broker_url: BrokerUrl::Kafka("localhost:9092".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            Service::build(config).await,
            Err(ServiceError::KafkaDisabled)
        ));
    }
}
