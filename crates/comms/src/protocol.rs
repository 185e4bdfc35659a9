//! Public send/subscribe facade.
//!
//! The protocol assigns message identity and tracing metadata, validates
//! payloads, and delegates routing and delivery. Its own retry loop covers
//! only store/routing failures; handler-business failures are the channel
//! manager's concern and are never retried a second time here.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, warn};

use tether_store::StoreAdapter;

use crate::channel::{ChannelManager, ChannelManagerConfig};
use crate::error::{CommsError, Result};
use crate::events::{CommsEvent, EventEmitter, EventFeed};
use crate::handler::MessageHandler;
use crate::retry::RetryPolicy;
use crate::router::{Address, MessageRouter};
use crate::types::{
    Message, MessageDraft, MessageError, MessageFilters, MessageId, MessageMetadata,
    MessageStatus, Subscription, SubscriptionId, TraceSpan,
};

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_RETRIES_CAP: u32 = 10;
const DEFAULT_CLOCK_SKEW_SECS: i64 = 5;

/// Pluggable message validation.
///
/// Validation runs before any side effect; a failure aborts the send with no
/// channel lookup and no persistence.
pub trait MessageValidator: Send + Sync {
    /// Validate a fully-stamped message.
    fn validate(&self, message: &Message) -> Result<()>;
}

/// Default validation rules.
#[derive(Debug, Clone)]
pub struct DefaultMessageValidator {
    /// Maximum serialized payload size.
    pub max_payload_bytes: usize,
    /// System-wide cap on a message's retry budget.
    pub max_retries_cap: u32,
    /// Tolerated clock skew for the accept timestamp.
    pub max_clock_skew: chrono::Duration,
}

impl Default for DefaultMessageValidator {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_retries_cap: DEFAULT_MAX_RETRIES_CAP,
            max_clock_skew: chrono::Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
        }
    }
}

impl MessageValidator for DefaultMessageValidator {
    fn validate(&self, message: &Message) -> Result<()> {
        let payload_size = serde_json::to_vec(&message.payload)
            .map_err(|e| CommsError::validation("payload", e.to_string()))?
            .len();
        if payload_size > self.max_payload_bytes {
            return Err(CommsError::validation(
                "payload",
                format!(
                    "payload size {payload_size} exceeds maximum {}",
                    self.max_payload_bytes
                ),
            ));
        }
        if message.metadata.retries > message.metadata.max_retries {
            return Err(CommsError::validation(
                "metadata.retries",
                format!(
                    "retry count {} exceeds budget {}",
                    message.metadata.retries, message.metadata.max_retries
                ),
            ));
        }
        if message.metadata.max_retries > self.max_retries_cap {
            return Err(CommsError::validation(
                "metadata.max_retries",
                format!(
                    "retry budget {} exceeds system cap {}",
                    message.metadata.max_retries, self.max_retries_cap
                ),
            ));
        }
        if message.metadata.timestamp > Utc::now() + self.max_clock_skew {
            return Err(CommsError::validation(
                "metadata.timestamp",
                "timestamp cannot be in the future",
            ));
        }
        Ok(())
    }
}

/// Decrements the in-flight counter when a send resolves, on every path.
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Communication protocol facade.
///
/// `send` resolves once validation passed, the message is persisted, and all
/// handler deliveries finished (success or failure). Handler failures are
/// recorded on the message and emitted as events, never returned as errors —
/// the at-least-once, fire-and-confirm contract.
pub struct CommsProtocol {
    channels: Arc<ChannelManager>,
    router: Arc<MessageRouter>,
    validator: Arc<dyn MessageValidator>,
    events: Arc<EventEmitter>,
    retry: RetryPolicy,
    in_flight: AtomicUsize,
}

impl CommsProtocol {
    /// Create a protocol over a store with default configuration.
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        CommsProtocolBuilder::new().assemble(store)
    }

    /// Start building a protocol.
    pub fn builder() -> CommsProtocolBuilder {
        CommsProtocolBuilder::new()
    }

    /// Send a message: validate, route, persist, deliver, record.
    pub async fn send(&self, draft: MessageDraft) -> Result<Message> {
        let address = Address::parse(&draft.address);
        let message = Message {
            id: draft.id.unwrap_or_else(MessageId::new),
            channel_id: address.channel_id(),
            payload: draft.payload,
            priority: draft.priority,
            status: MessageStatus::Pending,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                retries: 0,
                max_retries: draft.max_retries.unwrap_or(self.retry.max_retries),
                source: draft.source,
                tags: draft.tags,
                trace: TraceSpan::start_now(),
            },
            error: None,
        };

        // Aborts before any side effect: no channel lookup, no persistence.
        self.validator.validate(&message)?;

        let _guard = InFlightGuard::new(&self.in_flight);
        debug!(message_id = %message.id, address = %address.canonical, "sending message");

        let channel = self
            .with_store_retry("route", || {
                self.router.find_or_create_channel(&address.canonical)
            })
            .await?;
        self.with_store_retry("persist", || self.router.save_message(&message))
            .await?;
        if let Err(e) = self.router.enqueue(&message).await {
            warn!(message_id = %message.id, error = %e, "priority enqueue failed");
        }

        let publish_result = self
            .with_store_retry("publish", || self.channels.publish(message.clone()))
            .await;
        let mut message = match publish_result {
            Ok(delivered) => delivered,
            Err(e) => {
                // Accepted but undeliverable through the store; record and
                // report through events rather than failing the send.
                warn!(message_id = %message.id, error = %e, "publish failed after retries");
                let mut undelivered = message;
                let error = MessageError::store_error(e.to_string());
                undelivered.error = Some(error.clone());
                self.events.emit(CommsEvent::message_failed(
                    undelivered.id,
                    channel.id,
                    error,
                    true,
                ));
                undelivered
            }
        };

        message.metadata.trace.end = Some(Utc::now());
        if let Err(e) = self
            .with_store_retry("persist", || self.router.save_message(&message))
            .await
        {
            warn!(message_id = %message.id, error = %e, "final message state not persisted");
        }
        self.events
            .emit(CommsEvent::message_sent(message.id, message.channel_id));
        Ok(message)
    }

    /// Bind a handler to the channel an address pattern resolves to.
    pub async fn subscribe(
        &self,
        pattern: &str,
        subscriber_id: &str,
        handler: Arc<dyn MessageHandler>,
        filters: Option<MessageFilters>,
    ) -> Result<Subscription> {
        let channel = self
            .with_store_retry("route", || self.router.find_or_create_channel(pattern))
            .await?;
        self.channels
            .subscribe(channel.id, subscriber_id, handler, filters)
            .await
    }

    /// Remove a handler binding.
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.channels.unsubscribe(subscription_id).await
    }

    /// Load a message record; store errors are logged and swallowed to `None`.
    pub async fn message(&self, id: MessageId) -> Option<Message> {
        match self.router.message(id).await {
            Ok(message) => message,
            Err(e) => {
                warn!(message_id = %id, error = %e, "message lookup failed");
                None
            }
        }
    }

    /// Delete message records older than `ttl`.
    pub async fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        self.router.purge_expired(ttl).await
    }

    /// Number of sends currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Open a feed of lifecycle events.
    pub fn events(&self) -> EventFeed {
        self.events.subscribe()
    }

    /// The channel manager behind this protocol.
    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    /// The router behind this protocol.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Run a store-touching operation, retrying on store errors only.
    ///
    /// Validation and lookup errors pass through untouched; they are not
    /// transient.
    async fn with_store_retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_store_error() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Builder for [`CommsProtocol`].
pub struct CommsProtocolBuilder {
    store: Option<Arc<dyn StoreAdapter>>,
    validator: Option<Arc<dyn MessageValidator>>,
    retry: RetryPolicy,
    channel_config: ChannelManagerConfig,
    event_capacity: usize,
}

impl CommsProtocolBuilder {
    /// Create a builder with defaults.
    pub fn new() -> Self {
        Self {
            store: None,
            validator: None,
            retry: RetryPolicy::default(),
            channel_config: ChannelManagerConfig::default(),
            event_capacity: 1000,
        }
    }

    /// Set the backing store (required).
    pub fn with_store(mut self, store: Arc<dyn StoreAdapter>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the default validator.
    pub fn with_validator(mut self, validator: Arc<dyn MessageValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Set the retry policy shared by the delivery and protocol layers.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt handler deadline.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.channel_config.handler_timeout = timeout;
        self
    }

    /// Set the lifecycle event buffer capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the protocol.
    pub fn build(mut self) -> Result<CommsProtocol> {
        let store = self
            .store
            .take()
            .ok_or_else(|| CommsError::validation("store", "no store configured"))?;
        Ok(self.assemble(store))
    }

    /// Assemble over a store.
    fn assemble(mut self, store: Arc<dyn StoreAdapter>) -> CommsProtocol {
        // One policy governs both retry layers.
        self.channel_config.retry = self.retry.clone();

        let events = Arc::new(EventEmitter::with_capacity(self.event_capacity));
        let channels = Arc::new(ChannelManager::with_config(
            store.clone(),
            events.clone(),
            self.channel_config,
        ));
        let router = Arc::new(MessageRouter::new(store, channels.clone()));
        CommsProtocol {
            channels,
            router,
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(DefaultMessageValidator::default())),
            events,
            retry: self.retry,
            in_flight: AtomicUsize::new(0),
        }
    }
}

impl Default for CommsProtocolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
