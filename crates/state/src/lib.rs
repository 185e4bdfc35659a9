//! Versioned shared state for agent coordination.
//!
//! This crate provides the state-snapshot facility of the substrate:
//!
//! - **[`StateManager`]**: schema-validated key/value state over the shared
//!   store, with optimistic timestamp versioning
//! - **Observers**: local subscribers notified synchronously on every change,
//!   plus store pub/sub fan-out for other processes
//! - **Snapshots**: bounded per-key point-in-time captures with restore
//! - **Transactions**: an audit log of every mutation, pruned by age
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use tether_state::StateManager;
//! use tether_store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> tether_state::Result<()> {
//!     let state = StateManager::new(Arc::new(MemoryStore::new()));
//!
//!     state.set("cart-1", json!({"items": ["a"], "total": 5})).await?;
//!     let snapshot = state.snapshot("cart-1").await?;
//!
//!     state.set("cart-1", json!({"items": [], "total": 0})).await?;
//!     state.restore_snapshot("cart-1", snapshot.id).await?;
//!
//!     let value = state.get("cart-1").await?;
//!     println!("{value:?}"); // the pre-mutation cart
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod error;
pub mod manager;
pub mod schema;
pub mod types;

// Re-export main types
pub use error::{Result, StateError};
pub use manager::{StateEventFeed, StateManager, StateManagerConfig, StateObserver};
pub use schema::{JsonKind, Schema, TypeSchema};
pub use types::{
    ObserverId, SnapshotId, StateAction, StateEvent, StateSnapshot, StateTransaction, StateValue,
};
