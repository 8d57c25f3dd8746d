use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when appending an event.
    /// The expected version did not match the actual version.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A stored event carries an event type outside the known set.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The store cannot accept writes right now.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
