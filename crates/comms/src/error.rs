//! Error types for the comms crate.

use thiserror::Error;

use tether_store::StoreError;

/// Result type alias for comms operations.
pub type Result<T> = std::result::Result<T, CommsError>;

/// Comms error types.
#[derive(Debug, Error, Clone)]
pub enum CommsError {
    /// A message failed validation; the send was aborted before any side effect.
    #[error("validation failed on '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// A channel lookup required existence and missed.
    #[error("channel '{channel_id}' not found")]
    ChannelNotFound { channel_id: String },

    /// A subscription lookup required existence and missed.
    #[error("subscription '{subscription_id}' not found")]
    SubscriptionNotFound { subscription_id: String },

    /// A subscriber handler failed during delivery.
    #[error("handler error: {reason}")]
    Handler { reason: String },

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An entity could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl CommsError {
    /// Create a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a channel not found error.
    pub fn channel_not_found(channel_id: impl std::fmt::Display) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.to_string(),
        }
    }

    /// Create a subscription not found error.
    pub fn subscription_not_found(subscription_id: impl std::fmt::Display) -> Self {
        Self::SubscriptionNotFound {
            subscription_id: subscription_id.to_string(),
        }
    }

    /// Create a handler error.
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the backing store (the only class the
    /// protocol layer retries).
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommsError::validation("payload", "too large");
        assert!(err.to_string().contains("payload"));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_store_error_classification() {
        let err = CommsError::from(StoreError::unavailable("get", "down"));
        assert!(err.is_store_error());
        assert!(!CommsError::handler("boom").is_store_error());
    }
}
