//! Inter-agent messaging: channels, routing, and delivery-with-retry.
//!
//! This crate is the communication substrate between agents. Key pieces:
//!
//! - **Types**: messages with status/trace metadata, channels, subscriptions
//! - **[`ChannelManager`]**: channel lifecycle, the handler registry, and
//!   per-handler delivery with bounded retries and backoff
//! - **[`MessageRouter`]**: address resolution and the single durability path
//!   for message records
//! - **[`CommsProtocol`]**: the public send/subscribe facade with pluggable
//!   validation and lifecycle events
//!
//! Delivery is at-least-once and fire-and-confirm: `send` resolves once the
//! message is accepted, validated, and every handler delivery has finished;
//! handler failures are recorded on the message and emitted as events rather
//! than returned.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use tether_comms::{CommsProtocol, FnHandler, MessageDraft};
//! use tether_store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> tether_comms::Result<()> {
//!     let protocol = CommsProtocol::new(Arc::new(MemoryStore::new()));
//!
//!     let handler = Arc::new(FnHandler::new("printer", |msg| {
//!         Box::pin(async move {
//!             println!("got {}", msg.payload);
//!             Ok(())
//!         })
//!     }));
//!     protocol.subscribe("orders", "agent-1", handler, None).await?;
//!
//!     let sent = protocol
//!         .send(MessageDraft::new("orders", json!({"sku": "X1"})))
//!         .await?;
//!     println!("status: {:?}", sent.status);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod channel;
pub mod error;
pub mod events;
pub mod handler;
pub mod protocol;
pub mod retry;
pub mod router;
pub mod types;

// Re-export main types
pub use channel::{ChannelManager, ChannelManagerConfig};
pub use error::{CommsError, Result};
pub use events::{CommsEvent, EventEmitter, EventFeed};
pub use handler::{FnHandler, MessageHandler};
pub use protocol::{
    CommsProtocol, CommsProtocolBuilder, DefaultMessageValidator, MessageValidator,
};
pub use retry::{BackoffKind, RetryPolicy};
pub use router::{Address, MessageRouter};
pub use types::{
    Channel, ChannelId, ChannelKind, ChannelMetadata, ChannelOptions, Message, MessageDraft,
    MessageError, MessageFilters, MessageId, MessageMetadata, MessagePriority, MessageStatus,
    QosLevel, Subscription, SubscriptionId, TraceSpan,
};
