//! Address resolution and message persistence.
//!
//! The router is the sole writer of message records so the protocol facade
//! and the channel manager share one durability path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use tether_store::{keys, StoreAdapter};

use crate::channel::ChannelManager;
use crate::error::{CommsError, Result};
use crate::types::{Channel, ChannelId, ChannelKind, ChannelOptions, Message, MessageId};

/// Logical destination parsed from an address string.
///
/// - `direct:<a>:<b>` — a direct channel; participants are sorted so either
///   order resolves to the same channel
/// - `broadcast:<name>` — a broadcast channel
/// - anything else — a topic whose pattern is the topic name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub canonical: String,
    pub kind: ChannelKind,
}

impl Address {
    /// Parse and canonicalize an address string.
    pub fn parse(address: &str) -> Self {
        if let Some(rest) = address.strip_prefix("direct:") {
            let mut participants: Vec<&str> = rest.split(':').collect();
            participants.sort_unstable();
            return Self {
                canonical: format!("direct:{}", participants.join(":")),
                kind: ChannelKind::Direct,
            };
        }
        if address.strip_prefix("broadcast:").is_some() {
            return Self {
                canonical: address.to_string(),
                kind: ChannelKind::Broadcast,
            };
        }
        Self {
            canonical: address.to_string(),
            kind: ChannelKind::Topic,
        }
    }

    /// The channel id this address resolves to.
    pub fn channel_id(&self) -> ChannelId {
        ChannelId::from_address(&self.canonical)
    }
}

/// Resolves addresses to channels and owns message durability.
pub struct MessageRouter {
    store: Arc<dyn StoreAdapter>,
    channels: Arc<ChannelManager>,
}

impl MessageRouter {
    /// Create a router over the given store and channel manager.
    pub fn new(store: Arc<dyn StoreAdapter>, channels: Arc<ChannelManager>) -> Self {
        Self { store, channels }
    }

    /// Resolve the channel for an address, creating it on first reference.
    ///
    /// Idempotent: the same address always resolves to the same channel id.
    pub async fn find_or_create_channel(&self, address: &str) -> Result<Channel> {
        let address = Address::parse(address);
        if let Some(existing) = self.channels.channel(address.channel_id()).await? {
            debug!(address = %address.canonical, channel_id = %existing.id, "address resolved");
            return Ok(existing);
        }
        let channel = self
            .channels
            .create_channel(&address.canonical, address.kind, ChannelOptions::default())
            .await?;
        debug!(address = %address.canonical, channel_id = %channel.id, "channel created for address");
        Ok(channel)
    }

    /// Persist a message record keyed by its id.
    pub async fn save_message(&self, message: &Message) -> Result<()> {
        let encoded = serde_json::to_string(message)
            .map_err(|e| CommsError::serialization(e.to_string()))?;
        self.store
            .set(&keys::message(&message.id.to_string()), &encoded)
            .await?;
        Ok(())
    }

    /// Push a message id onto its priority queue list.
    ///
    /// Called once per message, at accept time; list pushes within one queue
    /// key are FIFO.
    pub async fn enqueue(&self, message: &Message) -> Result<()> {
        self.store
            .list_push(
                &keys::queue(message.priority.as_str()),
                &message.id.to_string(),
            )
            .await?;
        Ok(())
    }

    /// Load a message record by id.
    pub async fn message(&self, id: MessageId) -> Result<Option<Message>> {
        let Some(encoded) = self.store.get(&keys::message(&id.to_string())).await? else {
            return Ok(None);
        };
        serde_json::from_str(&encoded)
            .map(Some)
            .map_err(|e| CommsError::serialization(e.to_string()))
    }

    /// Delete message records older than `ttl`. Returns the number removed.
    pub async fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CommsError::serialization(format!("ttl out of range: {e}")))?;
        let cutoff = Utc::now() - ttl;
        let mut purged = 0;

        for key in self.store.keys(keys::MESSAGE_PATTERN).await? {
            let Some(encoded) = self.store.get(&key).await? else {
                continue;
            };
            let message: Message = match serde_json::from_str(&encoded) {
                Ok(message) => message,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable message record");
                    continue;
                }
            };
            if message.metadata.timestamp < cutoff && self.store.delete(&key).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "expired message records removed");
        }
        Ok(purged)
    }
}
