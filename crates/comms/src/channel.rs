//! Channel lifecycle, subscription bookkeeping, and delivery-with-retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use tether_store::{keys, StoreAdapter};

use crate::error::{CommsError, Result};
use crate::events::{CommsEvent, EventEmitter};
use crate::handler::MessageHandler;
use crate::retry::RetryPolicy;
use crate::types::{
    Channel, ChannelId, ChannelKind, ChannelMetadata, ChannelOptions, Message, MessageError,
    MessageFilters, MessageStatus, QosLevel, Subscription, SubscriptionId,
};

/// Channel manager configuration.
#[derive(Debug, Clone)]
pub struct ChannelManagerConfig {
    /// Channel cache capacity.
    pub cache_capacity: u64,
    /// Channel cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Deadline for a single handler invocation.
    pub handler_timeout: Duration,
    /// Retry policy for channels without their own.
    pub retry: RetryPolicy,
}

impl Default for ChannelManagerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(300),
            handler_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// In-memory handler binding, keyed by subscription id so unsubscribe is an
/// exact delete even when several handlers share a channel.
struct HandlerEntry {
    handler: Arc<dyn MessageHandler>,
    filters: Option<MessageFilters>,
}

/// Outcome of one handler's delivery chain.
struct DeliveryOutcome {
    attempts: u32,
    result: std::result::Result<(), MessageError>,
}

/// Owns channel identity, the subscription registry, and per-message
/// delivery-with-retry.
///
/// The handler registry and channel cache are owned exclusively by this
/// component; all access goes through its methods. The store remains the
/// source of truth for subscriber counts, with the cache as a best-effort
/// accelerator.
pub struct ChannelManager {
    store: Arc<dyn StoreAdapter>,
    events: Arc<EventEmitter>,
    cache: Cache<ChannelId, Channel>,
    handlers: RwLock<HashMap<ChannelId, HashMap<SubscriptionId, HandlerEntry>>>,
    options: RwLock<HashMap<ChannelId, ChannelOptions>>,
    config: ChannelManagerConfig,
}

impl ChannelManager {
    /// Create a channel manager with the default configuration.
    pub fn new(store: Arc<dyn StoreAdapter>, events: Arc<EventEmitter>) -> Self {
        Self::with_config(store, events, ChannelManagerConfig::default())
    }

    /// Create a channel manager with a custom configuration.
    pub fn with_config(
        store: Arc<dyn StoreAdapter>,
        events: Arc<EventEmitter>,
        config: ChannelManagerConfig,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            store,
            events,
            cache,
            handlers: RwLock::new(HashMap::new()),
            options: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a channel, persisting its metadata to the store.
    ///
    /// Creating an address that already exists returns the existing channel
    /// unchanged; channel ids are immutable once created.
    pub async fn create_channel(
        &self,
        name: &str,
        kind: ChannelKind,
        options: ChannelOptions,
    ) -> Result<Channel> {
        let id = ChannelId::from_address(name);
        if let Some(existing) = self.channel(id).await? {
            debug!(channel_id = %id, name, "channel already exists");
            return Ok(existing);
        }

        let channel = Channel {
            id,
            name: name.to_string(),
            kind,
            pattern: (kind == ChannelKind::Topic).then(|| name.to_string()),
            created_at: Utc::now(),
            metadata: ChannelMetadata::default(),
        };
        self.persist_channel(&channel).await?;
        self.options.write().await.insert(id, options);
        self.cache.insert(id, channel.clone()).await;

        info!(channel_id = %id, name, kind = kind.as_str(), "channel created");
        self.events
            .emit(CommsEvent::channel_created(id, name, kind));
        Ok(channel)
    }

    /// Look up a channel: cache first, store fallback, caches on hit.
    pub async fn channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        if let Some(channel) = self.cache.get(&id).await {
            return Ok(Some(channel));
        }
        let fields = self.store.hash_get_all(&keys::channel(&id.to_string())).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let channel = Channel::from_fields(&fields)?;
        self.cache.insert(id, channel.clone()).await;
        Ok(Some(channel))
    }

    /// Bind a handler to a channel.
    ///
    /// Persists a [`Subscription`] record and updates the subscriber count
    /// transactionally with the in-memory registry.
    pub async fn subscribe(
        &self,
        channel_id: ChannelId,
        subscriber_id: &str,
        handler: Arc<dyn MessageHandler>,
        filters: Option<MessageFilters>,
    ) -> Result<Subscription> {
        let channel = self
            .channel(channel_id)
            .await?
            .ok_or_else(|| CommsError::channel_not_found(channel_id))?;

        let subscription = Subscription {
            id: SubscriptionId::new(),
            channel_id,
            subscriber_id: subscriber_id.to_string(),
            pattern: channel.pattern.clone(),
            filters: filters.clone(),
            created_at: Utc::now(),
        };
        let record = serde_json::to_string(&subscription)
            .map_err(|e| CommsError::serialization(e.to_string()))?;
        self.store
            .set(&keys::subscription(&subscription.id.to_string()), &record)
            .await?;

        // The registry write lock is held across the count persist so the
        // stored count never races a concurrent subscribe/unsubscribe.
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(channel_id)
            .or_default()
            .insert(subscription.id, HandlerEntry { handler, filters });
        let count = handlers.get(&channel_id).map_or(0, HashMap::len) as u64;
        self.persist_subscriber_count(&channel, count).await?;
        drop(handlers);

        debug!(
            subscription_id = %subscription.id,
            channel_id = %channel_id,
            subscriber_id,
            "handler subscribed"
        );
        self.events
            .emit(CommsEvent::subscribed(subscription.id, channel_id));
        Ok(subscription)
    }

    /// Remove a handler binding by subscription id.
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        let key = keys::subscription(&subscription_id.to_string());
        let record = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| CommsError::subscription_not_found(subscription_id))?;
        let subscription: Subscription = serde_json::from_str(&record)
            .map_err(|e| CommsError::serialization(e.to_string()))?;
        let channel = self
            .channel(subscription.channel_id)
            .await?
            .ok_or_else(|| CommsError::channel_not_found(subscription.channel_id))?;

        let mut handlers = self.handlers.write().await;
        if let Some(channel_handlers) = handlers.get_mut(&subscription.channel_id) {
            channel_handlers.remove(&subscription_id);
        }
        let count = handlers
            .get(&subscription.channel_id)
            .map_or(0, HashMap::len) as u64;
        self.store.delete(&key).await?;
        self.persist_subscriber_count(&channel, count).await?;
        drop(handlers);

        debug!(
            subscription_id = %subscription_id,
            channel_id = %subscription.channel_id,
            "handler unsubscribed"
        );
        self.events
            .emit(CommsEvent::unsubscribed(subscription_id, subscription.channel_id));
        Ok(())
    }

    /// Live handler-set size for a channel.
    pub async fn subscriber_count(&self, channel_id: ChannelId) -> usize {
        self.handlers
            .read()
            .await
            .get(&channel_id)
            .map_or(0, HashMap::len)
    }

    /// Publish a message to every subscribed handler of its channel.
    ///
    /// Handlers run concurrently; each handler's retries are sequential with
    /// backoff. Returns the message with its terminal status and retry count
    /// recorded. A channel with zero matching handlers drops the message
    /// without error and leaves it `Pending`.
    pub async fn publish(&self, mut message: Message) -> Result<Message> {
        let channel_id = message.channel_id;
        if self.channel(channel_id).await?.is_none() {
            return Err(CommsError::channel_not_found(channel_id));
        }

        // Snapshot matching handlers so no lock is held while delivering.
        let targeted: Vec<(SubscriptionId, Arc<dyn MessageHandler>)> = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&channel_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|(_, entry)| {
                            entry
                                .filters
                                .as_ref()
                                .map_or(true, |filters| filters.matches(&message))
                        })
                        .map(|(id, entry)| (*id, entry.handler.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        if targeted.is_empty() {
            warn!(
                channel_id = %channel_id,
                message_id = %message.id,
                "No subscribers for channel, dropping message"
            );
            return Ok(message);
        }

        let policy = self.delivery_policy(channel_id).await;

        // Cross-process fan-out rides the store pub/sub; local delivery does
        // not depend on it, so store trouble here is logged and skipped.
        match serde_json::to_string(&message) {
            Ok(encoded) => {
                if let Err(e) = self
                    .store
                    .publish(&keys::channel_feed(&channel_id.to_string()), &encoded)
                    .await
                {
                    warn!(channel_id = %channel_id, error = %e, "channel feed publish failed");
                }
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "message not encodable for fan-out");
            }
        }

        let deliveries = targeted
            .into_iter()
            .map(|(subscription_id, handler)| {
                self.deliver(subscription_id, handler, &message, &policy)
            });
        let outcomes = futures::future::join_all(deliveries).await;

        let retries_used = outcomes
            .iter()
            .map(|outcome| outcome.attempts.saturating_sub(1))
            .max()
            .unwrap_or(0);
        message.metadata.retries = retries_used.min(message.metadata.max_retries);

        let first_failure = outcomes
            .into_iter()
            .find_map(|outcome| outcome.result.err());
        match first_failure {
            Some(error) => {
                message.status = MessageStatus::Failed;
                message.error = Some(error);
            }
            None => {
                message.status = MessageStatus::Delivered;
                message.error = None;
            }
        }
        Ok(message)
    }

    /// Deliver one message to one handler: attempts `0..=max_retries`, each
    /// bounded by the handler deadline, with backoff sleeps between attempts.
    async fn deliver(
        &self,
        subscription_id: SubscriptionId,
        handler: Arc<dyn MessageHandler>,
        message: &Message,
        policy: &RetryPolicy,
    ) -> DeliveryOutcome {
        let mut attempt = 0u32;
        loop {
            let error = match timeout(self.config.handler_timeout, handler.handle(message)).await {
                Ok(Ok(())) => {
                    debug!(
                        message_id = %message.id,
                        subscription_id = %subscription_id,
                        attempt,
                        "message processed"
                    );
                    self.events.emit(CommsEvent::message_processed(
                        message.id,
                        message.channel_id,
                        subscription_id,
                    ));
                    return DeliveryOutcome {
                        attempts: attempt.saturating_add(1),
                        result: Ok(()),
                    };
                }
                Ok(Err(e)) => MessageError::handler_error(e.to_string()),
                Err(_) => MessageError::handler_timeout(format!(
                    "handler '{}' exceeded {:?} deadline",
                    handler.name(),
                    self.config.handler_timeout
                )),
            };

            if attempt >= policy.max_retries {
                warn!(
                    message_id = %message.id,
                    subscription_id = %subscription_id,
                    attempts = attempt + 1,
                    error = %error.message,
                    "delivery failed, retries exhausted"
                );
                self.events.emit(CommsEvent::message_failed(
                    message.id,
                    message.channel_id,
                    error.clone(),
                    true,
                ));
                return DeliveryOutcome {
                    attempts: attempt.saturating_add(1),
                    result: Err(error),
                };
            }

            let delay = policy.delay(attempt);
            warn!(
                message_id = %message.id,
                subscription_id = %subscription_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "delivery attempt failed, retrying"
            );
            sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Effective retry policy for a channel: its registered options, QoS
    /// permitting, else the manager default.
    async fn delivery_policy(&self, channel_id: ChannelId) -> RetryPolicy {
        let options = self.options.read().await.get(&channel_id).cloned();
        match options {
            Some(options) if options.qos == QosLevel::AtMostOnce => RetryPolicy::none(),
            Some(options) => options.retry,
            None => self.config.retry.clone(),
        }
    }

    async fn persist_channel(&self, channel: &Channel) -> Result<()> {
        let key = keys::channel(&channel.id.to_string());
        for (field, value) in channel.to_fields() {
            self.store.hash_set(&key, field, &value).await?;
        }
        Ok(())
    }

    async fn persist_subscriber_count(&self, channel: &Channel, count: u64) -> Result<()> {
        self.store
            .hash_set(
                &keys::channel(&channel.id.to_string()),
                "subscriber_count",
                &count.to_string(),
            )
            .await?;
        let mut updated = channel.clone();
        updated.metadata.subscriber_count = count;
        self.cache.insert(channel.id, updated).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use crate::retry::BackoffKind;
    use crate::types::{MessageId, MessageMetadata, TraceSpan};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_store::MemoryStore;

    fn setup() -> ChannelManager {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventEmitter::new());
        // Fast retries so exhaustion paths stay quick under test.
        let config = ChannelManagerConfig {
            retry: RetryPolicy::new(3, BackoffKind::Fixed, 1),
            handler_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        ChannelManager::with_config(store, events, config)
    }

    fn pending_message(channel_id: ChannelId) -> Message {
        Message {
            id: MessageId::new(),
            channel_id,
            payload: json!({"sku": "X1"}),
            priority: Default::default(),
            status: MessageStatus::Pending,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                retries: 0,
                max_retries: 3,
                source: None,
                tags: Vec::new(),
                trace: TraceSpan::start_now(),
            },
            error: None,
        }
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        Arc::new(FnHandler::new("counting", move |_msg| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }))
    }

    fn failing_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        Arc::new(FnHandler::new("failing", move |_msg| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CommsError::handler("always fails"))
            })
        }))
    }

    #[tokio::test]
    async fn test_create_channel_is_idempotent() {
        let manager = setup();
        let first = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();
        let second = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.pattern.as_deref(), Some("orders"));
    }

    #[tokio::test]
    async fn test_channel_survives_cache_miss() {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventEmitter::new());
        let manager = ChannelManager::new(store.clone(), events.clone());
        let created = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        // A second manager over the same store has a cold cache.
        let fresh = ChannelManager::new(store, events);
        let loaded = fresh.channel(created.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.name, "orders");
    }

    #[tokio::test]
    async fn test_subscribe_requires_channel() {
        let manager = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let missing = ChannelId::from_address("missing");
        let result = manager
            .subscribe(missing, "agent-1", counting_handler(calls), None)
            .await;
        assert!(matches!(result, Err(CommsError::ChannelNotFound { .. })));
    }

    #[tokio::test]
    async fn test_subscriber_count_tracks_registry() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let first = manager
            .subscribe(channel.id, "agent-1", counting_handler(calls.clone()), None)
            .await
            .unwrap();
        let _second = manager
            .subscribe(channel.id, "agent-2", counting_handler(calls), None)
            .await
            .unwrap();

        assert_eq!(manager.subscriber_count(channel.id).await, 2);
        let loaded = manager.channel(channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.metadata.subscriber_count, 2);

        manager.unsubscribe(first.id).await.unwrap();
        assert_eq!(manager.subscriber_count(channel.id).await, 1);
        let loaded = manager.channel(channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.metadata.subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_only_target_handler() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let kept_calls = Arc::new(AtomicUsize::new(0));
        let dropped_calls = Arc::new(AtomicUsize::new(0));
        let _kept = manager
            .subscribe(channel.id, "agent-1", counting_handler(kept_calls.clone()), None)
            .await
            .unwrap();
        let dropped = manager
            .subscribe(channel.id, "agent-2", counting_handler(dropped_calls.clone()), None)
            .await
            .unwrap();

        manager.unsubscribe(dropped.id).await.unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(kept_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dropped_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_subscription_fails() {
        let manager = setup();
        let result = manager.unsubscribe(SubscriptionId::new()).await;
        assert!(matches!(
            result,
            Err(CommsError::SubscriptionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_drops_message() {
        let manager = setup();
        let channel = manager
            .create_channel("silent", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert!(message.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_handler_gets_exactly_max_retries_plus_one_attempts() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        manager
            .subscribe(channel.id, "agent-1", failing_handler(calls.clone()), None)
            .await
            .unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4); // max_retries=3 → 4 attempts
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.metadata.retries, 3);
        let error = message.error.unwrap();
        assert_eq!(error.code, "HANDLER_ERROR");
    }

    #[tokio::test]
    async fn test_mixed_outcomes_mark_message_failed() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let ok_calls = Arc::new(AtomicUsize::new(0));
        let bad_calls = Arc::new(AtomicUsize::new(0));
        manager
            .subscribe(channel.id, "agent-1", counting_handler(ok_calls.clone()), None)
            .await
            .unwrap();
        manager
            .subscribe(channel.id, "agent-2", failing_handler(bad_calls), None)
            .await
            .unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_handler_times_out_onto_retry_path() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new("hung", move |_msg| {
            Box::pin(async move {
                // Far beyond the 200ms test deadline.
                sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        }));
        manager
            .subscribe(channel.id, "agent-1", handler, None)
            .await
            .unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        let error = message.error.unwrap();
        assert_eq!(error.code, "HANDLER_TIMEOUT");
    }

    #[tokio::test]
    async fn test_filters_skip_non_matching_subscription() {
        let manager = setup();
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, ChannelOptions::default())
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let filters = MessageFilters {
            priorities: vec![crate::types::MessagePriority::Critical],
            sources: Vec::new(),
            tags: Vec::new(),
        };
        manager
            .subscribe(channel.id, "agent-1", counting_handler(calls.clone()), Some(filters))
            .await
            .unwrap();

        // Normal priority does not match the Critical-only filter; with no
        // matching handler the message is dropped, not failed.
        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_at_most_once_channel_never_retries() {
        let manager = setup();
        let options = ChannelOptions {
            qos: QosLevel::AtMostOnce,
            ..Default::default()
        };
        let channel = manager
            .create_channel("orders", ChannelKind::Topic, options)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        manager
            .subscribe(channel.id, "agent-1", failing_handler(calls.clone()), None)
            .await
            .unwrap();

        let message = manager
            .publish(pending_message(channel.id))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.metadata.retries, 0);
    }
}
