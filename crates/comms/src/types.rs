//! Core types for the comms crate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{CommsError, Result};
use crate::retry::RetryPolicy;

/// Namespace for deterministic channel id derivation.
///
/// Channel identity is a UUIDv5 of the canonical address under this
/// namespace, so the same address resolves to the same id in every process.
const CHANNEL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8e, 0x51, 0x3b, 0x02, 0x9c, 0x44, 0x4a, 0x7d, 0xb1, 0x6f, 0x2a, 0xd0, 0x35, 0x7e, 0x91, 0x4c,
]);

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    /// Create a new random message ID.
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

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Ulid);

impl SubscriptionId {
    /// Create a new random subscription ID.
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

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a channel, derived deterministically from its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Derive the channel id for a canonical address.
    pub fn from_address(address: &str) -> Self {
        Self(Uuid::new_v5(&CHANNEL_NAMESPACE, address.as_bytes()))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ChannelId {
    type Err = CommsError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CommsError::serialization(format!("invalid channel id '{s}': {e}")))
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Accepted, delivery not yet resolved.
    Pending,
    /// Terminal: every targeted handler processed the message.
    Delivered,
    /// Terminal: retries exhausted for at least one handler.
    Failed,
}

impl MessageStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Check if transition to the target status is valid.
    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!((self, target), (Pending, Delivered) | (Pending, Failed))
    }
}

/// Routing priority of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl MessagePriority {
    /// Queue key segment for this priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Tracing span recorded on a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    /// Span identifier, fresh per send.
    pub span_id: Ulid,
    /// When the send was accepted.
    pub start: DateTime<Utc>,
    /// When all handler deliveries resolved.
    pub end: Option<DateTime<Utc>>,
}

impl TraceSpan {
    /// Start a new span now.
    pub fn start_now() -> Self {
        Self {
            span_id: Ulid::new(),
            start: Utc::now(),
            end: None,
        }
    }
}

/// Metadata stamped on every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// When the message was accepted.
    pub timestamp: DateTime<Utc>,
    /// Retry rounds actually performed (max across handlers).
    pub retries: u32,
    /// Retry budget; `retries <= max_retries` always holds.
    pub max_retries: u32,
    /// Originating agent, if the producer identified itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form routing tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Tracing span for the send.
    pub trace: TraceSpan,
}

/// Error recorded on a message after a failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    /// Stable error code, e.g. `HANDLER_ERROR`.
    pub code: String,
    /// Human-readable reason.
    pub message: String,
    /// Structured context, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MessageError {
    /// A handler returned an error during delivery.
    pub fn handler_error(message: impl Into<String>) -> Self {
        Self {
            code: "HANDLER_ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// A handler exceeded its delivery deadline.
    pub fn handler_timeout(message: impl Into<String>) -> Self {
        Self {
            code: "HANDLER_TIMEOUT".to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// The backing store rejected an operation.
    pub fn store_error(message: impl Into<String>) -> Self {
        Self {
            code: "STORE_ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured context.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A message routed through a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
}

/// A message draft handed to [`CommsProtocol::send`](crate::CommsProtocol::send).
///
/// The protocol assigns identity and stamps metadata; the draft only names
/// the destination address and the payload.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub address: String,
    pub payload: serde_json::Value,
    pub id: Option<MessageId>,
    pub priority: MessagePriority,
    pub max_retries: Option<u32>,
    pub source: Option<String>,
    pub tags: Vec<String>,
}

impl MessageDraft {
    /// Create a draft for `address` carrying `payload`.
    pub fn new(address: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            address: address.into(),
            payload,
            id: None,
            priority: MessagePriority::default(),
            max_retries: None,
            source: None,
            tags: Vec::new(),
        }
    }

    /// Pin the message id instead of generating one at send time.
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the routing priority.
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the retry budget for this message.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Identify the originating agent.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a routing tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// The shape of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// One fixed pair of participants.
    Direct,
    /// Named topic; `pattern` equals the topic name.
    Topic,
    /// Fan-out to every subscriber.
    Broadcast,
}

impl ChannelKind {
    /// Stable string form used in the persisted hash.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Broadcast => "broadcast",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = CommsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(CommsError::serialization(format!(
                "unknown channel kind '{other}'"
            ))),
        }
    }
}

/// Channel bookkeeping kept alongside the identity fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Live handler-set size; maintained with subscribe/unsubscribe.
    pub subscriber_count: u64,
}

/// A named route through which messages are published and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: ChannelMetadata,
}

impl Channel {
    /// Serialize to the field-per-field hash persisted under `channel:<id>`.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("id", self.id.to_string()),
            ("name", self.name.clone()),
            ("kind", self.kind.as_str().to_string()),
            ("created_at", self.created_at.to_rfc3339()),
            (
                "subscriber_count",
                self.metadata.subscriber_count.to_string(),
            ),
        ];
        if let Some(pattern) = &self.pattern {
            fields.push(("pattern", pattern.clone()));
        }
        fields
    }

    /// Rebuild from the persisted hash. Lossless inverse of [`to_fields`].
    ///
    /// [`to_fields`]: Channel::to_fields
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| -> Result<&String> {
            fields
                .get(name)
                .ok_or_else(|| CommsError::serialization(format!("channel hash missing '{name}'")))
        };
        let created_at = DateTime::parse_from_rfc3339(field("created_at")?)
            .map_err(|e| CommsError::serialization(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        let subscriber_count = field("subscriber_count")?
            .parse::<u64>()
            .map_err(|e| CommsError::serialization(format!("bad subscriber_count: {e}")))?;
        Ok(Self {
            id: field("id")?.parse()?,
            name: field("name")?.clone(),
            kind: field("kind")?.parse()?,
            pattern: fields.get("pattern").cloned(),
            created_at,
            metadata: ChannelMetadata { subscriber_count },
        })
    }
}

/// Quality-of-service level for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    /// Fire and forget; no retry.
    AtMostOnce,
    /// Delivery-with-retry; the default.
    #[default]
    AtLeastOnce,
}

/// Channel-scoped delivery options registered at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Pub/sub buffer size hint for the channel feed.
    pub buffer_size: usize,
    /// Whether messages published here are persisted.
    pub persistent: bool,
    /// Whether payloads are encrypted at rest (enforced by collaborators).
    pub encrypted: bool,
    /// Delivery quality of service.
    pub qos: QosLevel,
    /// Retry policy for handler delivery on this channel.
    pub retry: RetryPolicy,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            persistent: true,
            encrypted: false,
            qos: QosLevel::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-subscription delivery filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageFilters {
    /// Deliver only these priorities (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priorities: Vec<MessagePriority>,
    /// Deliver only messages from these sources (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Deliver only messages carrying all of these tags (empty = all).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl MessageFilters {
    /// Check whether a message passes this filter set.
    pub fn matches(&self, message: &Message) -> bool {
        if !self.priorities.is_empty() && !self.priorities.contains(&message.priority) {
            return false;
        }
        if !self.sources.is_empty() {
            match &message.metadata.source {
                Some(source) if self.sources.contains(source) => {}
                _ => return false,
            }
        }
        if !self.tags.is_empty()
            && !self
                .tags
                .iter()
                .all(|tag| message.metadata.tags.contains(tag))
        {
            return false;
        }
        true
    }
}

/// Durable record of a handler binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel_id: ChannelId,
    pub subscriber_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<MessageFilters>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_id_is_deterministic() {
        let a = ChannelId::from_address("orders");
        let b = ChannelId::from_address("orders");
        let c = ChannelId::from_address("billing");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_status_transitions() {
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Pending.can_transition_to(MessageStatus::Failed));
        assert!(!MessageStatus::Delivered.can_transition_to(MessageStatus::Pending));
        assert!(!MessageStatus::Failed.can_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
    }

    #[test]
    fn test_channel_hash_round_trip() {
        let channel = Channel {
            id: ChannelId::from_address("orders"),
            name: "orders".to_string(),
            kind: ChannelKind::Topic,
            pattern: Some("orders".to_string()),
            created_at: Utc::now(),
            metadata: ChannelMetadata {
                subscriber_count: 3,
            },
        };

        let fields: HashMap<String, String> = channel
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let restored = Channel::from_fields(&fields).unwrap();
        assert_eq!(restored, channel);
    }

    #[test]
    fn test_message_json_round_trip() {
        let message = Message {
            id: MessageId::new(),
            channel_id: ChannelId::from_address("orders"),
            payload: json!({"sku": "X1", "qty": 2}),
            priority: MessagePriority::High,
            status: MessageStatus::Pending,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                retries: 0,
                max_retries: 3,
                source: Some("agent-7".to_string()),
                tags: vec!["fulfillment".to_string()],
                trace: TraceSpan::start_now(),
            },
            error: None,
        };

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_filters_match_priority_and_tags() {
        let mut message = Message {
            id: MessageId::new(),
            channel_id: ChannelId::from_address("orders"),
            payload: json!({}),
            priority: MessagePriority::High,
            status: MessageStatus::Pending,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                retries: 0,
                max_retries: 3,
                source: Some("agent-7".to_string()),
                tags: vec!["a".to_string(), "b".to_string()],
                trace: TraceSpan::start_now(),
            },
            error: None,
        };

        let filters = MessageFilters {
            priorities: vec![MessagePriority::High, MessagePriority::Critical],
            sources: vec!["agent-7".to_string()],
            tags: vec!["a".to_string()],
        };
        assert!(filters.matches(&message));

        message.priority = MessagePriority::Low;
        assert!(!filters.matches(&message));

        message.priority = MessagePriority::High;
        message.metadata.source = None;
        assert!(!filters.matches(&message));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let message = Message {
            id: MessageId::new(),
            channel_id: ChannelId::from_address("orders"),
            payload: json!({}),
            priority: MessagePriority::Low,
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
        };
        assert!(MessageFilters::default().matches(&message));
    }
}
