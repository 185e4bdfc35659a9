//! Error types for the state crate.

use thiserror::Error;

use tether_store::StoreError;

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// State error types.
#[derive(Debug, Error, Clone)]
pub enum StateError {
    /// A value failed schema validation; no mutation occurred.
    #[error("validation failed for state '{key}': {reason}")]
    Validation { key: String, reason: String },

    /// A snapshot lookup required existence and missed.
    #[error("snapshot '{snapshot_id}' not found")]
    SnapshotNotFound { snapshot_id: String },

    /// A state key required existence and missed.
    #[error("state '{key}' not found")]
    StateNotFound { key: String },

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An entity could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl StateError {
    /// Create a validation error.
    pub fn validation(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a snapshot not found error.
    pub fn snapshot_not_found(snapshot_id: impl std::fmt::Display) -> Self {
        Self::SnapshotNotFound {
            snapshot_id: snapshot_id.to_string(),
        }
    }

    /// Create a state not found error.
    pub fn state_not_found(key: impl Into<String>) -> Self {
        Self::StateNotFound { key: key.into() }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StateError::validation("cart-1", "expected object");
        assert!(err.to_string().contains("cart-1"));
        assert!(err.to_string().contains("expected object"));
    }

    #[test]
    fn test_store_error_conversion() {
        let err = StateError::from(StoreError::unavailable("set", "down"));
        assert!(err.to_string().contains("down"));
    }
}
