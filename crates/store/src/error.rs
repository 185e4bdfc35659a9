//! Error types for the store crate.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("store operation '{operation}' unavailable: {reason}")]
    Unavailable { operation: String, reason: String },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// A subscribe pattern failed to parse.
    #[error("invalid subscribe pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The subscription feed was closed by the backend.
    #[error("store subscription closed")]
    SubscriptionClosed,
}

impl StoreError {
    /// Create an unavailable error.
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::unavailable("set", "connection refused");
        assert!(err.to_string().contains("set"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_invalid_pattern_display() {
        let err = StoreError::invalid_pattern("[bad", "unclosed character class");
        assert!(err.to_string().contains("[bad"));
    }
}
