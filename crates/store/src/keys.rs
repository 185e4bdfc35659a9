//! Key naming conventions for the backing store.
//!
//! Every component persists through these formatters so the keyspace stays
//! scannable with one set of glob patterns.

/// Key for a persisted message record.
pub fn message(id: &str) -> String {
    format!("message:{id}")
}

/// Glob matching every message record.
pub const MESSAGE_PATTERN: &str = "message:*";

/// Key for channel metadata (stored field-per-field as a hash).
pub fn channel(id: &str) -> String {
    format!("channel:{id}")
}

/// Key for a subscription record.
pub fn subscription(id: &str) -> String {
    format!("subscription:{id}")
}

/// Key for a state value.
pub fn state(key: &str) -> String {
    format!("state:{key}")
}

/// Pub/sub channel carrying change notifications for a state key.
pub fn state_feed(key: &str) -> String {
    format!("state:feed:{key}")
}

/// Key for a persisted state snapshot.
pub fn state_snapshot(key: &str, snapshot_id: &str) -> String {
    format!("state:snapshot:{key}:{snapshot_id}")
}

/// Key for the transaction log list of a state key.
pub fn state_txlog(key: &str) -> String {
    format!("state:txlog:{key}")
}

/// Key for a priority-routed message id list.
pub fn queue(priority: &str) -> String {
    format!("queue:{priority}")
}

/// Pub/sub channel carrying cross-process fan-out for a message channel.
pub fn channel_feed(channel_id: &str) -> String {
    format!("channel:feed:{channel_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(message("m1"), "message:m1");
        assert_eq!(channel("c1"), "channel:c1");
        assert_eq!(subscription("s1"), "subscription:s1");
        assert_eq!(state("cart-1"), "state:cart-1");
        assert_eq!(state_snapshot("cart-1", "snap"), "state:snapshot:cart-1:snap");
        assert_eq!(state_txlog("cart-1"), "state:txlog:cart-1");
        assert_eq!(queue("high"), "queue:high");
    }
}
