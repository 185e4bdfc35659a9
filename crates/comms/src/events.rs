//! Lifecycle events for monitoring collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tokio::sync::broadcast;

use crate::error::{CommsError, Result};
use crate::types::{ChannelId, ChannelKind, MessageError, MessageId, SubscriptionId};

const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Events emitted by the comms layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommsEvent {
    /// A send resolved (all handler deliveries finished, success or failure).
    MessageSent {
        message_id: MessageId,
        channel_id: ChannelId,
        timestamp: DateTime<Utc>,
    },
    /// A handler processed a message.
    MessageProcessed {
        message_id: MessageId,
        channel_id: ChannelId,
        subscription_id: SubscriptionId,
        timestamp: DateTime<Utc>,
    },
    /// A delivery failed; `is_final` marks exhausted retries.
    MessageFailed {
        message_id: MessageId,
        channel_id: ChannelId,
        error: MessageError,
        is_final: bool,
        timestamp: DateTime<Utc>,
    },
    /// A channel was created.
    ChannelCreated {
        channel_id: ChannelId,
        name: String,
        kind: ChannelKind,
        timestamp: DateTime<Utc>,
    },
    /// A handler was bound to a channel.
    Subscribed {
        subscription_id: SubscriptionId,
        channel_id: ChannelId,
        timestamp: DateTime<Utc>,
    },
    /// A handler binding was removed.
    Unsubscribed {
        subscription_id: SubscriptionId,
        channel_id: ChannelId,
        timestamp: DateTime<Utc>,
    },
}

impl CommsEvent {
    /// Create a MessageSent event stamped now.
    pub fn message_sent(message_id: MessageId, channel_id: ChannelId) -> Self {
        Self::MessageSent {
            message_id,
            channel_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a MessageProcessed event stamped now.
    pub fn message_processed(
        message_id: MessageId,
        channel_id: ChannelId,
        subscription_id: SubscriptionId,
    ) -> Self {
        Self::MessageProcessed {
            message_id,
            channel_id,
            subscription_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a MessageFailed event stamped now.
    pub fn message_failed(
        message_id: MessageId,
        channel_id: ChannelId,
        error: MessageError,
        is_final: bool,
    ) -> Self {
        Self::MessageFailed {
            message_id,
            channel_id,
            error,
            is_final,
            timestamp: Utc::now(),
        }
    }

    /// Create a ChannelCreated event stamped now.
    pub fn channel_created(channel_id: ChannelId, name: impl Into<String>, kind: ChannelKind) -> Self {
        Self::ChannelCreated {
            channel_id,
            name: name.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Create a Subscribed event stamped now.
    pub fn subscribed(subscription_id: SubscriptionId, channel_id: ChannelId) -> Self {
        Self::Subscribed {
            subscription_id,
            channel_id,
            timestamp: Utc::now(),
        }
    }

    /// Create an Unsubscribed event stamped now.
    pub fn unsubscribed(subscription_id: SubscriptionId, channel_id: ChannelId) -> Self {
        Self::Unsubscribed {
            subscription_id,
            channel_id,
            timestamp: Utc::now(),
        }
    }

    /// Event type label for filtering and logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message_sent",
            Self::MessageProcessed { .. } => "message_processed",
            Self::MessageFailed { .. } => "message_failed",
            Self::ChannelCreated { .. } => "channel_created",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
        }
    }
}

/// Broadcast emitter for lifecycle events.
///
/// Dropping every feed does not make emission fail; events without listeners
/// are simply discarded.
pub struct EventEmitter {
    sender: broadcast::Sender<CommsEvent>,
}

impl EventEmitter {
    /// Create an emitter with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an emitter with a custom buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all live feeds.
    pub fn emit(&self, event: CommsEvent) {
        let _ = self.sender.send(event);
    }

    /// Open a feed of all subsequent events.
    pub fn subscribe(&self) -> EventFeed {
        EventFeed {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the lifecycle event stream.
pub struct EventFeed {
    receiver: broadcast::Receiver<CommsEvent>,
}

impl EventFeed {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<CommsEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|_| CommsError::serialization("event feed closed"))
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<CommsEvent> {
        self.receiver.try_recv().ok()
    }
}
