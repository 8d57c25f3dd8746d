//! Service-level error type.

use thiserror::Error;

use crate::config::ConfigError;

/// Failures while starting or running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("Read model error: {0}")]
    Projection(#[from] projections::ProjectionError),

    #[error("Broker error: {0}")]
    Broker(#[from] messaging::BrokerError),

    /// `kafka://` was configured but the binary was built without the `kafka` feature.
    #[error("Kafka support is not compiled in; rebuild with --features kafka")]
    KafkaDisabled,

    #[error("Metrics exporter error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
