//! Unified error types for the Courier client harnesses.

use thiserror::Error;

/// Unified error type for Courier operations.
///
/// Covers the failure modes shared by the queue and cache harnesses:
/// connectivity, publishing, payload decoding, and configuration, plus
/// the subscription and cancellation cases layered on top of them.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Cannot reach, or lost the connection to, the broker or cache.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A send was attempted on a broken channel.
    #[error("Publish error: {0}")]
    Publish(String),

    /// A payload could not be decoded as the requested type.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Subscription management failure (duplicate subscribe, closed channel).
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Missing or invalid endpoint configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation was cancelled cooperatively.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CourierError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Subscription(_) => "SUBSCRIPTION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection<T: Into<String>>(message: T) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a publish error.
    #[must_use]
    pub fn publish<T: Into<String>>(message: T) -> Self {
        Self::Publish(message.into())
    }

    /// Creates a subscription error.
    #[must_use]
    pub fn subscription<T: Into<String>>(message: T) -> Self {
        Self::Subscription(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is worth retrying with the same inputs.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Publish(_) | Self::Timeout(_)
        )
    }
}
