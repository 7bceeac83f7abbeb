//! Store-contract tests for the in-memory backend.

use std::time::Duration;

use serde_json::json;
use stashbox_backend::Store;
use stashbox_memory::MemoryStore;

#[tokio::test]
async fn put_get_forget_round_trip() {
    let store = MemoryStore::new();
    store
        .put("k", json!({"n": 1}), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"n": 1})));
    assert!(store.has("k").await.unwrap());
    assert!(store.forget("k").await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), None);
    assert!(!store.forget("k").await.unwrap());
}

#[tokio::test]
async fn entries_expire_after_their_ttl() {
    let store = MemoryStore::new();
    store
        .put("short", json!(1), Some(Duration::from_millis(40)))
        .await
        .unwrap();
    store.forever("long", json!(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(70)).await;
    assert_eq!(store.get("short").await.unwrap(), None);
    assert_eq!(store.get("long").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn add_is_only_if_absent() {
    let store = MemoryStore::new();
    assert!(store.add("k", json!(1), None).await.unwrap());
    assert!(!store.add("k", json!(2), None).await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn add_replaces_an_expired_entry() {
    let store = MemoryStore::new();
    store
        .put("k", json!(1), Some(Duration::from_millis(30)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(store.add("k", json!(2), None).await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn increment_and_decrement_track_a_counter() {
    let store = MemoryStore::new();
    assert_eq!(store.increment("n", 5).await.unwrap(), 5);
    assert_eq!(store.increment("n", 2).await.unwrap(), 7);
    assert_eq!(store.decrement("n", 3).await.unwrap(), 4);
    assert_eq!(store.get("n").await.unwrap(), Some(json!(4)));
}

#[tokio::test]
async fn flush_empties_the_store() {
    let store = MemoryStore::new();
    store.forever("a", json!(1)).await.unwrap();
    store.forever("b", json!(2)).await.unwrap();
    assert!(store.flush().await.unwrap());
    assert!(store.is_empty());
    assert_eq!(store.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn driver_name_is_configurable() {
    assert_eq!(MemoryStore::new().driver(), "memory");
    assert_eq!(MemoryStore::with_driver("l1").driver(), "l1");
}
