//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An error occurred talking to the broker.
    #[error("Broker error: {0}")]
    Broker(#[from] messaging::BrokerError),

    /// A read-model database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Read-model migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to deserialize an event payload or a stored document.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The read model rejected the operation.
    #[error("Read model unavailable: {0}")]
    Unavailable(String),

    /// A projection-specific error.
    #[error("Projection error: {0}")]
    Projection(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
