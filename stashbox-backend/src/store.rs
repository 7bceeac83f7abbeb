//! The store contract the engine programs against.
//!
//! [`Store`] is a thin, uniform façade over a chosen backend — it carries
//! no business logic. The engine interposes on every call; backends only
//! move values in and out of storage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use smol_str::SmolStr;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A shared, dynamically dispatched store handle.
pub type SharedStore = Arc<dyn Store>;

/// Minimal uniform contract over a key–value backend.
///
/// `Option<Value>` is the tri-state at this layer: `None` is a miss,
/// `Some(value)` a hit. Stored nulls never reach the backend as
/// `Value::Null` — the engine wraps them in a marker map first — so
/// backends that cannot represent null need no special handling.
///
/// Errors are propagated as is; the engine's circuit breaker decides
/// whether they count as failures.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Writes `value` under `key`. `None` TTL means no expiry.
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Writes `value` under `key` with no expiry.
    async fn forever(&self, key: &str, value: Value) -> StoreResult<()> {
        self.put(key, value, None).await
    }

    /// Removes `key`. Returns `true` when an entry was removed.
    async fn forget(&self, key: &str) -> StoreResult<bool>;

    /// Returns `true` when `key` holds an unexpired entry.
    async fn has(&self, key: &str) -> StoreResult<bool>;

    /// Removes every entry. Returns `true` on success.
    async fn flush(&self) -> StoreResult<bool>;

    /// Writes `value` only if `key` is absent. Returns `true` when the
    /// write happened.
    ///
    /// The default implementation is a non-atomic `has` + `put`; two
    /// concurrent callers can both observe absence and both write.
    /// Backends with a native only-if-absent primitive should override it.
    async fn add(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<bool> {
        if self.has(key).await? {
            return Ok(false);
        }
        self.put(key, value, ttl).await?;
        Ok(true)
    }

    /// Increments the numeric value under `key` by `by`, initializing an
    /// absent key to `by`. Returns the new value.
    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64>;

    /// Decrements the numeric value under `key` by `by`. Returns the new
    /// value.
    async fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.increment(key, -by).await
    }

    /// Driver name used by strategies to enable/disable per backend.
    fn driver(&self) -> SmolStr {
        SmolStr::new_static("store")
    }
}

#[async_trait]
impl Store for Arc<dyn Store> {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).put(key, value, ttl).await
    }

    async fn forever(&self, key: &str, value: Value) -> StoreResult<()> {
        (**self).forever(key, value).await
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        (**self).forget(key).await
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        (**self).has(key).await
    }

    async fn flush(&self) -> StoreResult<bool> {
        (**self).flush().await
    }

    async fn add(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<bool> {
        (**self).add(key, value, ttl).await
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).increment(key, by).await
    }

    async fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).decrement(key, by).await
    }

    fn driver(&self) -> SmolStr {
        (**self).driver()
    }
}

#[async_trait]
impl Store for Box<dyn Store> {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).put(key, value, ttl).await
    }

    async fn forever(&self, key: &str, value: Value) -> StoreResult<()> {
        (**self).forever(key, value).await
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        (**self).forget(key).await
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        (**self).has(key).await
    }

    async fn flush(&self) -> StoreResult<bool> {
        (**self).flush().await
    }

    async fn add(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<bool> {
        (**self).add(key, value, ttl).await
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).increment(key, by).await
    }

    async fn decrement(&self, key: &str, by: i64) -> StoreResult<i64> {
        (**self).decrement(key, by).await
    }

    fn driver(&self) -> SmolStr {
        (**self).driver()
    }
}
