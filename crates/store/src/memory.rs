//! In-memory store backend.
//!
//! The reference backend for tests and single-process deployments. Pub/sub
//! fan-out rides a tokio broadcast channel; a forwarding task per subscription
//! applies the glob pattern filter.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use crate::adapter::{parse_pattern, StoreAdapter, StoreMessage, StoreSubscription};
use crate::error::Result;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// In-memory key-value/pub-sub store.
pub struct MemoryStore {
    kv: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
    pubsub: broadcast::Sender<StoreMessage>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory store with a custom pub/sub buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (pubsub, _) = broadcast::channel(capacity);
        debug!(capacity, "memory store ready");
        Self {
            kv: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
            pubsub,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize inclusive, possibly-negative list range bounds.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { len + start } else { start }.max(0);
    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let kv = self.kv.read().await;
        Ok(kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut kv = self.kv.write().await;
        kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed_kv = self.kv.write().await.remove(key).is_some();
        let removed_hash = self.hashes.write().await.remove(key).is_some();
        let removed_list = self.lists.write().await.remove(key).is_some();
        Ok(removed_kv || removed_hash || removed_list)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut hashes = self.hashes.write().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let hashes = self.hashes.read().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let mut lists = self.lists.write().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let lists = self.lists.read().await;
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        match normalize_range(list.len(), start, stop) {
            Some((start, stop)) => Ok(list[start..=stop].to_vec()),
            None => Ok(Vec::new()),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let receivers = self
            .pubsub
            .send((channel.to_string(), payload.to_string()))
            .unwrap_or(0);
        Ok(receivers)
    }

    async fn subscribe(&self, pattern: &str) -> Result<StoreSubscription> {
        let matcher = parse_pattern(pattern)?;
        let mut feed = self.pubsub.subscribe();
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok((channel, payload)) => {
                        if matcher.matches(&channel) && tx.send((channel, payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(pattern = %pattern, skipped, "subscription lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(StoreSubscription::new(rx))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = parse_pattern(pattern)?;
        let mut matched = BTreeSet::new();
        for key in self.kv.read().await.keys() {
            if matcher.matches(key) {
                matched.insert(key.clone());
            }
        }
        for key in self.hashes.read().await.keys() {
            if matcher.matches(key) {
                matched.insert(key.clone());
            }
        }
        for key in self.lists.read().await.keys() {
            if matcher.matches(key) {
                matched.insert(key.clone());
            }
        }
        Ok(matched.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        store.hash_set("h", "a", "1").await.unwrap();
        store.hash_set("h", "b", "2").await.unwrap();

        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a"), Some(&"1".to_string()));

        let missing = store.hash_get_all("nope").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_list_push_is_fifo() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let len = store.list_push("l", &i.to_string()).await.unwrap();
            assert_eq!(len, i + 1);
        }
        let all = store.list_range("l", 0, -1).await.unwrap();
        assert_eq!(all, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_list_range_bounds() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c", "d"] {
            store.list_push("l", v).await.unwrap();
        }
        assert_eq!(store.list_range("l", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.list_range("l", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert!(store.list_range("l", 5, 10).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_subscribe_pattern() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("channel:feed:*").await.unwrap();

        store.publish("channel:feed:orders", "m1").await.unwrap();
        store.publish("state:feed:cart", "ignored").await.unwrap();
        store.publish("channel:feed:billing", "m2").await.unwrap();

        let (channel, payload) = sub.recv().await.unwrap();
        assert_eq!(channel, "channel:feed:orders");
        assert_eq!(payload, "m1");

        let (channel, _) = sub.recv().await.unwrap();
        assert_eq!(channel, "channel:feed:billing");
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let store = MemoryStore::new();
        let result = store.subscribe("[bad").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_keys_scan() {
        let store = MemoryStore::new();
        store.set("message:1", "{}").await.unwrap();
        store.set("message:2", "{}").await.unwrap();
        store.hash_set("channel:c1", "name", "orders").await.unwrap();

        let messages = store.keys("message:*").await.unwrap();
        assert_eq!(messages, vec!["message:1", "message:2"]);

        let channels = store.keys("channel:*").await.unwrap();
        assert_eq!(channels, vec!["channel:c1"]);
    }
}
