//! Core types for the state crate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(Ulid);

impl SnapshotId {
    /// Create a new random snapshot ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Ulid);

impl ObserverId {
    /// Create a new random observer ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A versioned state value.
///
/// `version` is the write timestamp; later writes always carry a later
/// version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub value: serde_json::Value,
    pub version: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StateValue {
    /// Wrap a value with a fresh version stamp.
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            version: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

/// A named point-in-time capture of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// What a transaction record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateAction {
    Create,
    Update,
    Delete,
}

/// Audit record appended whenever state mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransaction {
    pub state_id: String,
    pub action: StateAction,
    pub timestamp: DateTime<Utc>,
}

/// Events emitted by the state manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateEvent {
    /// A key was written.
    Updated {
        key: String,
        value: StateValue,
        timestamp: DateTime<Utc>,
    },
    /// A key was removed.
    Deleted {
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// A snapshot was captured.
    SnapshotCreated {
        key: String,
        snapshot_id: SnapshotId,
        timestamp: DateTime<Utc>,
    },
    /// A snapshot was written back.
    SnapshotRestored {
        key: String,
        snapshot_id: SnapshotId,
        timestamp: DateTime<Utc>,
    },
}

impl StateEvent {
    /// Event type label for filtering and logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::SnapshotCreated { .. } => "snapshot_created",
            Self::SnapshotRestored { .. } => "snapshot_restored",
        }
    }

    /// The state key this event concerns.
    pub fn key(&self) -> &str {
        match self {
            Self::Updated { key, .. }
            | Self::Deleted { key, .. }
            | Self::SnapshotCreated { key, .. }
            | Self::SnapshotRestored { key, .. } => key,
        }
    }
}
