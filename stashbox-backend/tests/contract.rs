//! Contract tests for the default `Store` methods and trait-object
//! blanket impls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use stashbox_backend::{Store, StoreResult};

/// Minimal store that implements only the required methods, leaving
/// `forever`, `add`, and `decrement` to their defaults.
#[derive(Default)]
struct MapStore {
    entries: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl Store for MapStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value, _ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.lock().unwrap().insert(key.to_owned(), value);
        Ok(())
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().unwrap().remove(key).is_some())
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().unwrap().contains_key(key))
    }

    async fn flush(&self) -> StoreResult<bool> {
        self.entries.lock().unwrap().clear();
        Ok(true)
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut entries = self.entries.lock().unwrap();
        let next = entries.get(key).and_then(Value::as_i64).unwrap_or(0) + by;
        entries.insert(key.to_owned(), Value::from(next));
        Ok(next)
    }
}

#[tokio::test]
async fn default_add_is_has_then_put() {
    let store = MapStore::default();
    assert!(store.add("k", json!(1), None).await.unwrap());
    assert!(!store.add("k", json!(2), None).await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn default_forever_and_decrement_delegate() {
    let store = MapStore::default();
    store.forever("k", json!("v")).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
    assert_eq!(store.decrement("n", 3).await.unwrap(), -3);
}

#[tokio::test]
async fn trait_objects_pass_every_operation_through() {
    let store: Arc<dyn Store> = Arc::new(MapStore::default());
    store.put("k", json!(1), None).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    assert!(store.has("k").await.unwrap());
    assert_eq!(store.increment("n", 2).await.unwrap(), 2);
    assert!(store.forget("k").await.unwrap());
    assert!(store.flush().await.unwrap());
    assert_eq!(store.driver(), "store");

    let boxed: Box<dyn Store> = Box::new(MapStore::default());
    boxed.put("b", json!(true), None).await.unwrap();
    assert_eq!(boxed.get("b").await.unwrap(), Some(json!(true)));
}
