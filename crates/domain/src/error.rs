//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::product::ProductError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The command carried invalid product attributes.
    #[error("Product error: {0}")]
    Product(#[from] ProductError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True if another writer appended to the aggregate first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::EventStore(EventStoreError::ConcurrencyConflict { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::AggregateNotFound { .. })
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
