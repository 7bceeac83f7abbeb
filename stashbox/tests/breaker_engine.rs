//! Circuit breaker behavior through the façade.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use stashbox::config::CacheConfig;
use stashbox::{BreakerState, Cache};
use stashbox_backend::{Store, StoreError, StoreResult};
use stashbox_memory::MemoryStore;

/// Store wrapper that can be switched into a failing mode.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::connection(std::io::Error::other(
                "connection refused",
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.forget(key).await
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.has(key).await
    }

    async fn flush(&self) -> StoreResult<bool> {
        self.check()?;
        self.inner.flush().await
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.check()?;
        self.inner.increment(key, by).await
    }

    fn driver(&self) -> smol_str::SmolStr {
        smol_str::SmolStr::new_static("flaky")
    }
}

fn breaker_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout = Duration::from_millis(150);
    config.circuit_breaker.success_threshold = 2;
    config
}

#[tokio::test]
async fn fallback_reads_degrade_to_miss_and_open_the_breaker() {
    let store = FlakyStore::new();
    let cache = Cache::builder(store.clone())
        .config(breaker_config())
        .build();
    let guarded = cache.with_fallback();

    store.failing.store(true, Ordering::SeqCst);

    // Two failing reads trip the breaker.
    assert_eq!(guarded.get("k").await.unwrap(), None);
    assert_eq!(guarded.get("k").await.unwrap(), None);
    assert_eq!(guarded.breaker().state(), BreakerState::Open);

    // While open, the backend is not even called.
    let calls_before = store.calls.load(Ordering::SeqCst);
    assert_eq!(guarded.get("k").await.unwrap(), None);
    assert_eq!(store.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn breaker_recovers_through_half_open_probes() {
    let store = FlakyStore::new();
    let cache = Cache::builder(store.clone())
        .config(breaker_config())
        .build();
    let guarded = cache.with_fallback();

    store.failing.store(true, Ordering::SeqCst);
    guarded.get("k").await.unwrap();
    guarded.get("k").await.unwrap();
    assert_eq!(guarded.breaker().state(), BreakerState::Open);

    // Backend recovers; after the recovery timeout two successful probes
    // close the breaker.
    store.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    guarded.get("k").await.unwrap();
    assert_eq!(guarded.breaker().state(), BreakerState::HalfOpen);
    guarded.get("k").await.unwrap();
    assert_eq!(guarded.breaker().state(), BreakerState::Closed);

    // Normal operation resumed.
    guarded.put("k", json!(1), None).await.unwrap();
    assert_eq!(guarded.get("k").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn without_fallback_backend_errors_propagate() {
    let store = FlakyStore::new();
    let cache = Cache::builder(store.clone())
        .config(breaker_config())
        .build();
    store.failing.store(true, Ordering::SeqCst);

    assert!(cache.get("k").await.is_err());
    assert!(cache.put("k", json!(1), None).await.is_err());
    // Unrouted errors do not move the breaker.
    assert_eq!(cache.breaker().state(), BreakerState::Closed);
}

#[tokio::test]
async fn fallback_writes_are_swallowed_while_open() {
    let store = FlakyStore::new();
    let cache = Cache::builder(store.clone())
        .config(breaker_config())
        .build();
    let guarded = cache.with_fallback();
    store.failing.store(true, Ordering::SeqCst);

    guarded.put("a", json!(1), None).await.unwrap();
    guarded.put("b", json!(2), None).await.unwrap();
    assert_eq!(guarded.breaker().state(), BreakerState::Open);

    // Nothing was written or tracked for the failed writes.
    store.failing.store(false, Ordering::SeqCst);
    assert!(store.inner.is_empty());
    let stats = guarded.get_statistics().await.unwrap();
    assert_eq!(stats.managed_keys, 0);
}
