//! Versioned state with observers, snapshots, and an audit log.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use tether_store::{keys, StoreAdapter};

use crate::error::{Result, StateError};
use crate::schema::Schema;
use crate::types::{
    ObserverId, SnapshotId, StateAction, StateEvent, StateSnapshot, StateTransaction, StateValue,
};

/// State manager configuration.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Snapshots retained per key; oldest evicted first past the bound.
    pub max_snapshots: usize,
    /// Transactions older than this are pruned.
    pub transaction_max_age: Duration,
    /// Immediate retries for a failed persist.
    pub set_retries: u32,
    /// Event buffer capacity.
    pub event_capacity: usize,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 10,
            transaction_max_age: Duration::from_secs(24 * 3600),
            set_retries: 3,
            event_capacity: 1000,
        }
    }
}

/// Trait for local state change observers.
///
/// Observers are called synchronously, in registration order, after a
/// mutation persists. A delete passes `None`.
pub trait StateObserver: Send + Sync {
    /// React to a change of `key`.
    fn on_change(&self, key: &str, value: Option<&serde_json::Value>);
}

/// Receiving side of the state event stream.
pub struct StateEventFeed {
    receiver: broadcast::Receiver<StateEvent>,
}

impl StateEventFeed {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<StateEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|_| StateError::serialization("event feed closed"))
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Key/value state store with schema validation, change notification, and
/// point-in-time snapshot/restore.
///
/// Writes are validated before any mutation, persisted with immediate
/// retries, then fanned out: local observers first (synchronously, in
/// registration order), the store pub/sub feed second, the event stream
/// last. `set` resolves once the write persisted; a write that exhausts its
/// retries returns the store error and leaves observers untouched.
pub struct StateManager {
    store: Arc<dyn StoreAdapter>,
    fallback: Option<Arc<dyn StoreAdapter>>,
    schemas: RwLock<HashMap<String, Arc<dyn Schema>>>,
    observers: RwLock<HashMap<String, Vec<(ObserverId, Arc<dyn StateObserver>)>>>,
    snapshots: RwLock<HashMap<String, VecDeque<StateSnapshot>>>,
    transactions: RwLock<HashMap<String, Vec<StateTransaction>>>,
    cache: RwLock<HashMap<String, StateValue>>,
    events: broadcast::Sender<StateEvent>,
    config: StateManagerConfig,
}

impl StateManager {
    /// Create a state manager with the default configuration.
    pub fn new(store: Arc<dyn StoreAdapter>) -> Self {
        Self::with_config(store, StateManagerConfig::default())
    }

    /// Create a state manager with a custom configuration.
    pub fn with_config(store: Arc<dyn StoreAdapter>, config: StateManagerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            store,
            fallback: None,
            schemas: RwLock::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            events,
            config,
        }
    }

    /// Attach a secondary durable store consulted when the primary misses.
    pub fn with_fallback(mut self, fallback: Arc<dyn StoreAdapter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Register a schema for a key; subsequent writes must validate.
    pub async fn register_schema(&self, key: &str, schema: Arc<dyn Schema>) {
        self.schemas.write().await.insert(key.to_string(), schema);
    }

    /// Remove a key's schema.
    pub async fn unregister_schema(&self, key: &str) {
        self.schemas.write().await.remove(key);
    }

    /// Register an observer for a key.
    pub async fn observe(&self, key: &str, observer: Arc<dyn StateObserver>) -> ObserverId {
        let id = ObserverId::new();
        self.observers
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push((id, observer));
        id
    }

    /// Remove an observer. Returns true if it was registered.
    pub async fn unobserve(&self, key: &str, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let Some(entries) = observers.get_mut(key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        before != entries.len()
    }

    /// Open a feed of state events.
    pub fn events(&self) -> StateEventFeed {
        StateEventFeed {
            receiver: self.events.subscribe(),
        }
    }

    /// Write a value.
    ///
    /// Validation failure aborts before any mutation. The persist is retried
    /// up to `set_retries` times immediately; exhaustion returns the store
    /// error with nothing else changed.
    pub async fn set(&self, key: &str, value: serde_json::Value) -> Result<StateValue> {
        if let Some(schema) = self.schemas.read().await.get(key).cloned() {
            schema.validate(key, &value)?;
        }

        let action = if self.cache.read().await.contains_key(key) {
            StateAction::Update
        } else {
            match self.store.get(&keys::state(key)).await {
                Ok(Some(_)) => StateAction::Update,
                _ => StateAction::Create,
            }
        };

        let state_value = StateValue::new(value);
        let record = serde_json::to_string(&state_value)
            .map_err(|e| StateError::serialization(e.to_string()))?;
        self.persist_with_retry(&keys::state(key), &record).await?;
        self.cache
            .write()
            .await
            .insert(key.to_string(), state_value.clone());

        self.notify(key, Some(&state_value.value)).await;
        if let Err(e) = self.store.publish(&keys::state_feed(key), &record).await {
            warn!(key, error = %e, "state feed publish failed");
        }
        let _ = self.events.send(StateEvent::Updated {
            key: key.to_string(),
            value: state_value.clone(),
            timestamp: Utc::now(),
        });
        self.record_transaction(key, action).await;

        debug!(key, version = %state_value.version, "state written");
        Ok(state_value)
    }

    /// Read a value: primary store first, then the fallback store.
    ///
    /// Returns `None` when neither has the key; absence is not an error.
    pub async fn get(&self, key: &str) -> Result<Option<StateValue>> {
        if let Some(record) = self.store.get(&keys::state(key)).await? {
            return Self::decode(&record).map(Some);
        }
        if let Some(fallback) = &self.fallback {
            if let Some(record) = fallback.get(&keys::state(key)).await? {
                return Self::decode(&record).map(Some);
            }
        }
        Ok(None)
    }

    /// Remove a key. Observers are notified with `None`.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.store.delete(&keys::state(key)).await?;
        self.cache.write().await.remove(key);

        self.notify(key, None).await;
        let _ = self.events.send(StateEvent::Deleted {
            key: key.to_string(),
            timestamp: Utc::now(),
        });
        self.record_transaction(key, StateAction::Delete).await;

        debug!(key, existed, "state deleted");
        Ok(existed)
    }

    /// Capture the current value of a key.
    ///
    /// At most `max_snapshots` are retained per key; the oldest is evicted
    /// (memory and store) once the bound is exceeded.
    pub async fn snapshot(&self, key: &str) -> Result<StateSnapshot> {
        let current = self
            .get(key)
            .await?
            .ok_or_else(|| StateError::state_not_found(key))?;

        let snapshot = StateSnapshot {
            id: SnapshotId::new(),
            timestamp: Utc::now(),
            data: HashMap::from([(key.to_string(), current.value)]),
            metadata: HashMap::new(),
        };
        let record = serde_json::to_string(&snapshot)
            .map_err(|e| StateError::serialization(e.to_string()))?;
        self.persist_with_retry(
            &keys::state_snapshot(key, &snapshot.id.to_string()),
            &record,
        )
        .await?;

        let evicted = {
            let mut snapshots = self.snapshots.write().await;
            let entries = snapshots.entry(key.to_string()).or_default();
            entries.push_back(snapshot.clone());
            let mut evicted = Vec::new();
            while entries.len() > self.config.max_snapshots {
                if let Some(oldest) = entries.pop_front() {
                    evicted.push(oldest);
                }
            }
            evicted
        };
        for old in evicted {
            let old_key = keys::state_snapshot(key, &old.id.to_string());
            if let Err(e) = self.store.delete(&old_key).await {
                warn!(key, snapshot_id = %old.id, error = %e, "evicted snapshot not deleted from store");
            }
        }

        info!(key, snapshot_id = %snapshot.id, "snapshot created");
        let _ = self.events.send(StateEvent::SnapshotCreated {
            key: key.to_string(),
            snapshot_id: snapshot.id,
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Write a snapshot's value back to its key.
    ///
    /// Restore is an ordinary [`set`](StateManager::set): the same validation
    /// and retry rules apply.
    pub async fn restore_snapshot(&self, key: &str, snapshot_id: SnapshotId) -> Result<StateValue> {
        let snapshot = self.find_snapshot(key, snapshot_id).await?;
        let value = snapshot.data.get(key).cloned().ok_or_else(|| {
            StateError::validation(key, format!("snapshot '{snapshot_id}' holds no data for key"))
        })?;

        let restored = self.set(key, value).await?;
        info!(key, snapshot_id = %snapshot_id, "snapshot restored");
        let _ = self.events.send(StateEvent::SnapshotRestored {
            key: key.to_string(),
            snapshot_id,
            timestamp: Utc::now(),
        });
        Ok(restored)
    }

    /// Snapshots currently retained for a key, oldest first.
    pub async fn snapshots(&self, key: &str) -> Vec<StateSnapshot> {
        self.snapshots
            .read()
            .await
            .get(key)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Transactions retained for a key, oldest first.
    pub async fn transactions(&self, key: &str) -> Vec<StateTransaction> {
        self.transactions
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn decode(record: &str) -> Result<StateValue> {
        serde_json::from_str(record).map_err(|e| StateError::serialization(e.to_string()))
    }

    /// Persist a record, retrying immediately on store failure.
    async fn persist_with_retry(&self, store_key: &str, record: &str) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.store.set(store_key, record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.set_retries => {
                    warn!(store_key, attempt, error = %e, "state persist failed, retrying");
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    error!(store_key, attempts = attempt + 1, error = %e, "state persist dropped after retries");
                    return Err(e.into());
                }
            }
        }
    }

    /// Call every observer of `key`, synchronously, in registration order.
    async fn notify(&self, key: &str, value: Option<&serde_json::Value>) {
        let observers: Vec<Arc<dyn StateObserver>> = self
            .observers
            .read()
            .await
            .get(key)
            .map(|entries| entries.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default();
        for observer in observers {
            observer.on_change(key, value);
        }
    }

    /// Append an audit record and prune entries past the max age.
    async fn record_transaction(&self, key: &str, action: StateAction) {
        let transaction = StateTransaction {
            state_id: key.to_string(),
            action,
            timestamp: Utc::now(),
        };

        match serde_json::to_string(&transaction) {
            Ok(encoded) => {
                if let Err(e) = self
                    .store
                    .list_push(&keys::state_txlog(key), &encoded)
                    .await
                {
                    warn!(key, error = %e, "transaction log append failed");
                }
            }
            Err(e) => warn!(key, error = %e, "transaction not encodable"),
        }

        let max_age = chrono::Duration::from_std(self.config.transaction_max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - max_age;
        let mut transactions = self.transactions.write().await;
        let entries = transactions.entry(key.to_string()).or_default();
        entries.push(transaction);
        entries.retain(|t| t.timestamp >= cutoff);
    }

    /// Locate a snapshot in memory, then in the store.
    async fn find_snapshot(&self, key: &str, snapshot_id: SnapshotId) -> Result<StateSnapshot> {
        if let Some(snapshot) = self
            .snapshots
            .read()
            .await
            .get(key)
            .and_then(|entries| entries.iter().find(|s| s.id == snapshot_id))
            .cloned()
        {
            return Ok(snapshot);
        }
        if let Some(record) = self
            .store
            .get(&keys::state_snapshot(key, &snapshot_id.to_string()))
            .await?
        {
            return serde_json::from_str(&record)
                .map_err(|e| StateError::serialization(e.to_string()));
        }
        Err(StateError::snapshot_not_found(snapshot_id))
    }
}
