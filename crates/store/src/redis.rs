//! Redis store backend.
//!
//! Wraps a Redis deployment behind [`StoreAdapter`]. Commands ride a
//! multiplexed [`ConnectionManager`] that reconnects on its own; pattern
//! subscriptions hold a dedicated pub/sub connection each.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapter::{StoreAdapter, StoreSubscription};
use crate::error::{Result, StoreError};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// Redis-backed key-value/pub-sub store.
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            Client::open(url).map_err(|e| StoreError::unavailable("connect", e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::unavailable("connect", e.to_string()))?;
        info!(url, "connected to redis");
        Ok(Self { client, manager })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn op_err(operation: &'static str) -> impl Fn(redis::RedisError) -> StoreError {
    move |e| StoreError::unavailable(operation, e.to_string())
}

#[async_trait]
impl StoreAdapter for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.connection();
        con.get(key).await.map_err(op_err("get"))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.connection();
        con.set(key, value).await.map_err(op_err("set"))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut con = self.connection();
        let removed: i64 = con.del(key).await.map_err(op_err("delete"))?;
        Ok(removed > 0)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut con = self.connection();
        con.hset(key, field, value).await.map_err(op_err("hash_set"))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut con = self.connection();
        con.hgetall(key).await.map_err(op_err("hash_get_all"))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let mut con = self.connection();
        let len: i64 = con.rpush(key, value).await.map_err(op_err("list_push"))?;
        Ok(len as usize)
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut con = self.connection();
        con.lrange(key, start as isize, stop as isize)
            .await
            .map_err(op_err("list_range"))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut con = self.connection();
        let receivers: i64 = con
            .publish(channel, payload)
            .await
            .map_err(op_err("publish"))?;
        Ok(receivers as usize)
    }

    async fn subscribe(&self, pattern: &str) -> Result<StoreSubscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(op_err("subscribe"))?;
        pubsub
            .psubscribe(pattern)
            .await
            .map_err(op_err("subscribe"))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pattern = pattern.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(pattern = %pattern, channel = %channel, error = %e, "dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send((channel, payload)).await.is_err() {
                    break;
                }
            }
            info!(pattern = %pattern, "pub/sub feed closed");
        });
        Ok(StoreSubscription::new(rx))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut con = self.connection();
        let mut keys: Vec<String> = con.keys(pattern).await.map_err(op_err("keys"))?;
        keys.sort();
        Ok(keys)
    }
}
