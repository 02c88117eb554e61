//! Queue harness error types.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-related errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Cannot reach, or lost the connection to, the broker.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// A send was attempted on a broken channel.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Consuming or acknowledging a delivery failed.
    #[error("Consume failed: {0}")]
    Consume(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The loop was cancelled cooperatively.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Returns true if this error may clear up on its own and a later
    /// attempt with the same inputs could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, QueueError::Connection(_) | QueueError::Publish(_))
    }

    /// Returns true if the underlying broker connection is gone and a
    /// full reconnect is required.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            QueueError::Connection(err.to_string())
        } else {
            QueueError::Internal(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        QueueError::Connection(err.to_string())
    }
}

impl From<courier_core::CourierError> for QueueError {
    fn from(err: courier_core::CourierError) -> Self {
        use courier_core::CourierError;
        match err {
            CourierError::Connection(msg) => QueueError::Connection(msg),
            CourierError::Publish(msg) => QueueError::Publish(msg),
            CourierError::Serialization(e) => QueueError::Serialization(e),
            CourierError::Configuration(msg) => QueueError::Configuration(msg),
            CourierError::Cancelled => QueueError::Cancelled,
            other => QueueError::Internal(other.to_string()),
        }
    }
}
