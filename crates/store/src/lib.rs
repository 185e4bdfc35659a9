//! Key-value/pub-sub store adapter for the tether substrate.
//!
//! This crate wraps the shared backing store behind one trait so the
//! messaging and state layers stay backend-agnostic:
//!
//! - **[`StoreAdapter`]**: get/set/delete, hash fields, FIFO lists, publish,
//!   and glob-pattern subscribe
//! - **[`MemoryStore`]**: in-process reference backend for tests and
//!   single-process deployments
//! - **`RedisStore`**: remote backend behind the `redis-backend` feature
//! - **[`keys`]**: the keyspace naming conventions shared by all components
//!
//! The adapter performs no retry and surfaces connection trouble as
//! [`StoreError::Unavailable`]; retry policy belongs to the layers above.
//!
//! # Example
//!
//! ```ignore
//! use tether_store::{MemoryStore, StoreAdapter};
//!
//! #[tokio::main]
//! async fn main() -> tether_store::Result<()> {
//!     let store = MemoryStore::new();
//!     let mut feed = store.subscribe("channel:feed:*").await?;
//!
//!     store.set("channel:c1", "orders").await?;
//!     store.publish("channel:feed:c1", "hello").await?;
//!
//!     let (channel, payload) = feed.recv().await?;
//!     println!("{channel}: {payload}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod adapter;
pub mod error;
pub mod keys;
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use adapter::{StoreAdapter, StoreMessage, StoreSubscription};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;

#[cfg(feature = "redis-backend")]
pub use crate::redis::RedisStore;
