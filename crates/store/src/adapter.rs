//! Store adapter trait and subscription feed.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::{Result, StoreError};

/// A message received from a pattern subscription: `(channel, payload)`.
pub type StoreMessage = (String, String);

/// Trait for key-value/pub-sub storage backends.
///
/// All operations are asynchronous and may fail with
/// [`StoreError::Unavailable`]. The adapter performs no retry itself; retry is
/// a caller concern. Ordering is guaranteed only within a single key (list
/// pushes to one key are FIFO), never across independent keys.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`. Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Set a single field of the hash stored under `key`.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Get all fields of the hash stored under `key`.
    ///
    /// Returns an empty map when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Append a value to the tail of the list stored under `key`.
    ///
    /// Returns the new list length. Pushes to one key are FIFO.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;

    /// Read a range of the list stored under `key`.
    ///
    /// `start` and `stop` are inclusive and may be negative to index from the
    /// tail (`-1` is the last element).
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Publish `payload` on `channel`. Returns the number of live receivers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to all channels matching the glob `pattern`.
    async fn subscribe(&self, pattern: &str) -> Result<StoreSubscription>;

    /// List all keys matching the glob `pattern`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Subscription handle yielding `(channel, payload)` pairs.
pub struct StoreSubscription {
    receiver: mpsc::Receiver<StoreMessage>,
}

impl StoreSubscription {
    /// Create a subscription from a receiving channel.
    ///
    /// Backends spawn a forwarding task that feeds the sender side.
    pub(crate) fn new(receiver: mpsc::Receiver<StoreMessage>) -> Self {
        Self { receiver }
    }

    /// Receive the next message, waiting until one arrives.
    pub async fn recv(&mut self) -> Result<StoreMessage> {
        self.receiver
            .recv()
            .await
            .ok_or(StoreError::SubscriptionClosed)
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Option<StoreMessage> {
        self.receiver.try_recv().ok()
    }

    /// Convert the subscription into a stream of messages.
    pub fn into_stream(self) -> impl Stream<Item = StoreMessage> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.ok().map(|msg| (msg, sub))
        })
    }
}

/// Parse a glob pattern, mapping parse failures to [`StoreError::InvalidPattern`].
pub(crate) fn parse_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| StoreError::invalid_pattern(pattern, e.to_string()))
}
