//! Broker error types.

use thiserror::Error;

/// Errors raised by broker connections, channels and consumers.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection or channel was closed underneath us.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The named exchange/topic has not been declared.
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// The named queue does not exist (or belongs to another connection).
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Publishing a message failed.
    #[error("Publish to {exchange} failed: {reason}")]
    PublishFailed { exchange: String, reason: String },

    /// Acknowledging or rejecting a delivery failed.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    /// Any other transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A message body could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BrokerError {
    /// Returns true if the error means the connection is gone and must be re-established.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_)
                | BrokerError::ConnectionClosed
                | BrokerError::Transport(_)
        )
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
