//! Message handler trait.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::Message;

/// Trait for message delivery handlers.
///
/// A handler is the processing side of a subscription. Returning an error
/// marks the attempt failed and puts the delivery on the retry path; the
/// caller never sees handler errors directly.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a delivered message.
    async fn handle(&self, message: &Message) -> Result<()>;

    /// Handler name for logging.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler {
    name: String,
    #[allow(clippy::type_complexity)]
    f: Box<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>,
}

impl FnHandler {
    /// Wrap an async closure as a named handler.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl MessageHandler for FnHandler {
    async fn handle(&self, message: &Message) -> Result<()> {
        (self.f)(message.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{
        ChannelId, MessageId, MessageMetadata, MessagePriority, MessageStatus, TraceSpan,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_message() -> Message {
        Message {
            id: MessageId::new(),
            channel_id: ChannelId::from_address("orders"),
            payload: json!({"sku": "X1"}),
            priority: MessagePriority::Normal,
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

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = FnHandler::new("counter", move |_msg| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        handler.handle(&sample_message()).await.unwrap();
        handler.handle(&sample_message()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handler.name(), "counter");
    }
}
