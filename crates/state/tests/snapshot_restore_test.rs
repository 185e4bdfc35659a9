//! End-to-end snapshot/restore scenarios through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use serde_json::json;

use tether_state::{JsonKind, StateError, StateManager, StateManagerConfig, TypeSchema};
use tether_store::MemoryStore;

#[tokio::test]
async fn snapshot_then_mutate_then_restore_recovers_prior_value() {
    let state = StateManager::new(Arc::new(MemoryStore::new()));

    state
        .set("cart-1", json!({"items": ["a", "b"], "total": 12}))
        .await
        .unwrap();
    let snapshot = state.snapshot("cart-1").await.unwrap();

    state
        .set("cart-1", json!({"items": [], "total": 0}))
        .await
        .unwrap();
    assert_eq!(
        state.get("cart-1").await.unwrap().unwrap().value["total"],
        0
    );

    state.restore_snapshot("cart-1", snapshot.id).await.unwrap();

    let recovered = state.get("cart-1").await.unwrap().unwrap();
    assert_eq!(recovered.value["total"], 12);
    assert_eq!(recovered.value["items"], json!(["a", "b"]));
}

#[tokio::test]
async fn snapshot_bound_holds_across_many_captures() {
    let config = StateManagerConfig {
        max_snapshots: 4,
        ..Default::default()
    };
    let state = StateManager::with_config(Arc::new(MemoryStore::new()), config);

    state.set("k", json!(0)).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..10 {
        state.set("k", json!(i)).await.unwrap();
        ids.push(state.snapshot("k").await.unwrap().id);
    }

    let retained = state.snapshots("k").await;
    assert_eq!(retained.len(), 4);
    // The four most recent captures survive, in creation order.
    let retained_ids: Vec<_> = retained.iter().map(|s| s.id).collect();
    assert_eq!(retained_ids, ids[6..].to_vec());

    // Every retained snapshot is still restorable.
    for id in retained_ids {
        state.restore_snapshot("k", id).await.unwrap();
    }
}

#[tokio::test]
async fn schema_bound_key_rejects_bad_restore_and_bad_writes() {
    let state = StateManager::new(Arc::new(MemoryStore::new()));
    state
        .register_schema(
            "config",
            Arc::new(TypeSchema::new(JsonKind::Object).with_required_field("version")),
        )
        .await;

    state
        .set("config", json!({"version": 1, "debug": false}))
        .await
        .unwrap();

    let rejected = state.set("config", json!({"debug": true})).await;
    assert!(matches!(rejected, Err(StateError::Validation { .. })));

    // The failed write left the stored value as it was.
    let current = state.get("config").await.unwrap().unwrap();
    assert_eq!(current.value["version"], 1);
}

#[tokio::test]
async fn state_survives_manager_restart_via_shared_store() {
    let store = Arc::new(MemoryStore::new());

    {
        let state = StateManager::new(store.clone());
        state.set("session", json!({"step": 3})).await.unwrap();
    }

    // A fresh manager over the same store sees the persisted value.
    let state = StateManager::new(store);
    let loaded = state.get("session").await.unwrap().unwrap();
    assert_eq!(loaded.value["step"], 3);
}

#[tokio::test]
async fn restore_from_store_after_restart() {
    let store = Arc::new(MemoryStore::new());

    let snapshot_id = {
        let state = StateManager::new(store.clone());
        state.set("cart-1", json!({"total": 7})).await.unwrap();
        let snapshot = state.snapshot("cart-1").await.unwrap();
        state.set("cart-1", json!({"total": 0})).await.unwrap();
        snapshot.id
    };

    // The in-memory snapshot index is gone; the store copy still restores.
    let state = StateManager::new(store);
    state.restore_snapshot("cart-1", snapshot_id).await.unwrap();
    let recovered = state.get("cart-1").await.unwrap().unwrap();
    assert_eq!(recovered.value["total"], 7);
}
