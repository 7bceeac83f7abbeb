//! The cache façade.
//!
//! [`Cache`] composes the store adapter, strategy chain, sidecar index,
//! circuit breaker, rate limiter, and cost tracker behind one contract.
//! Handles are cheap to clone (everything heavy sits behind `Arc`);
//! per-request state — active namespace, pending tags, jitter — lives on
//! the handle, so `cache.namespace("tenant").tags(["t"])` scopes a single
//! call chain without affecting other holders of the engine.

mod diagnostics;
mod invalidation;
mod swr;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use smol_str::SmolStr;
use tracing::warn;

use stashbox_backend::{SharedStore, Store};
use stashbox_core::envelope::{ChunkManifest, unwrap_null, wrap_null};
use stashbox_core::key::{PERF_METRICS_KEY, namespaced};

use crate::breaker::CircuitBreaker;
use crate::config::CacheConfig;
use crate::cost::CostTracker;
use crate::error::CacheError;
use crate::events::{CacheEvent, EventSink, NoopSink};
use crate::jitter::apply_jitter;
use crate::metrics;
use crate::perf::PerfRecorder;
use crate::rate_limit::RateLimiter;
use crate::sidecar::SidecarIndex;
use crate::strategy::{
    ChunkSizeEstimator, DriverLimitEstimator, Encryptor, LazySequence, StrategyChain,
    StrategyContext, StrategyError,
};

pub use diagnostics::{HealthReport, PerformanceReport, Statistics};

/// Per-store runtime state: one of these exists for every registered
/// backend, so rebinding with [`Cache::store`] switches sidecar, breaker,
/// limiter, and cost tracking along with the storage.
pub(crate) struct StoreRuntime {
    pub(crate) store: SharedStore,
    pub(crate) driver: SmolStr,
    pub(crate) sidecar: SidecarIndex,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) limiter: RateLimiter,
    pub(crate) cost: CostTracker,
    pub(crate) perf: PerfRecorder,
}

impl StoreRuntime {
    fn new(store: SharedStore, config: &CacheConfig) -> Self {
        let driver = store.driver();
        Self {
            sidecar: SidecarIndex::new(store.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            limiter: RateLimiter::new(store.clone(), config.rate_limiter.clone()),
            cost: CostTracker::new(store.clone(), config.cost_aware.enabled),
            perf: PerfRecorder::new(
                config.monitoring.enabled,
                config.monitoring.recent_entries_limit,
            ),
            store,
            driver,
        }
    }
}

pub(crate) struct EngineShared {
    pub(crate) config: CacheConfig,
    pub(crate) chain: StrategyChain,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) runtimes: HashMap<String, Arc<StoreRuntime>>,
}

/// The caching middleware façade.
///
/// # Examples
///
/// ```no_run
/// use serde_json::json;
/// use stashbox::Cache;
/// use stashbox_memory::MemoryStore;
///
/// # async fn example() -> Result<(), stashbox::CacheError> {
/// let cache = Cache::builder(MemoryStore::new()).build();
/// cache.put("greeting", json!("hello"), None).await?;
/// assert_eq!(cache.get("greeting").await?, Some(json!("hello")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Cache {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) runtime: Arc<StoreRuntime>,
    namespace: Option<SmolStr>,
    pending_tags: Arc<StdMutex<Option<Vec<String>>>>,
    jitter: Option<f64>,
    use_fallback: bool,
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
    stores: Vec<(String, SharedStore)>,
    config: CacheConfig,
    events: Arc<dyn EventSink>,
    encryptor: Option<Arc<dyn Encryptor>>,
    estimator: Arc<dyn ChunkSizeEstimator>,
}

impl Cache {
    /// Starts a builder with `store` as the default backend.
    pub fn builder<S>(store: S) -> CacheBuilder
    where
        S: Store + 'static,
    {
        let store: SharedStore = Arc::new(store);
        CacheBuilder {
            stores: vec![("default".to_owned(), store)],
            config: CacheConfig::default(),
            events: Arc::new(NoopSink),
            encryptor: None,
            estimator: Arc::new(DriverLimitEstimator::default()),
        }
    }
}

impl CacheBuilder {
    /// Registers an additional named backend reachable via
    /// [`Cache::store`].
    pub fn named_store<S>(mut self, name: impl Into<String>, store: S) -> Self
    where
        S: Store + 'static,
    {
        let store: SharedStore = Arc::new(store);
        self.stores.push((name.into(), store));
        self
    }

    /// Replaces the default configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs an event sink.
    pub fn event_sink<E>(mut self, sink: E) -> Self
    where
        E: EventSink + 'static,
    {
        self.events = Arc::new(sink);
        self
    }

    /// Installs the encryption primitive, enabling the encryption
    /// strategy for allow-listed keys.
    pub fn encryptor<E>(mut self, encryptor: E) -> Self
    where
        E: Encryptor + 'static,
    {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    /// Replaces the smart-sizing chunk estimator.
    pub fn chunk_size_estimator<E>(mut self, estimator: E) -> Self
    where
        E: ChunkSizeEstimator + 'static,
    {
        self.estimator = Arc::new(estimator);
        self
    }

    /// Builds the engine bound to the default store.
    pub fn build(self) -> Cache {
        let chain = StrategyChain::from_config(&self.config, self.encryptor, self.estimator);
        let runtimes: HashMap<String, Arc<StoreRuntime>> = self
            .stores
            .iter()
            .map(|(name, store)| {
                (
                    name.clone(),
                    Arc::new(StoreRuntime::new(store.clone(), &self.config)),
                )
            })
            .collect();
        let default = self.stores[0].0.clone();
        let runtime = runtimes[&default].clone();
        Cache {
            shared: Arc::new(EngineShared {
                config: self.config,
                chain,
                events: self.events,
                runtimes,
            }),
            runtime,
            namespace: None,
            pending_tags: Arc::new(StdMutex::new(None)),
            jitter: None,
            use_fallback: false,
        }
    }
}

impl Cache {
    // ---- handle scoping ----

    /// Returns a handle with `namespace` active. Every key passed to that
    /// handle is stored and indexed as `<namespace>:<key>`.
    pub fn namespace(&self, namespace: impl AsRef<str>) -> Cache {
        Cache {
            namespace: Some(SmolStr::new(namespace)),
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        }
    }

    /// Returns a handle with no active namespace.
    pub fn without_namespace(&self) -> Cache {
        Cache {
            namespace: None,
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        }
    }

    /// The active namespace, if any.
    pub fn get_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns a handle whose *next write* attaches `tags` to the written
    /// key. The tags are consumed by that write and cleared regardless of
    /// its outcome.
    pub fn tags<I, T>(&self, tags: I) -> Cache
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        Cache {
            pending_tags: Arc::new(StdMutex::new(Some(tags))),
            ..self.clone()
        }
    }

    /// Returns a handle that jitters every TTL by `±percent` (0.0–1.0).
    pub fn with_jitter(&self, percent: f64) -> Cache {
        Cache {
            jitter: Some(percent),
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        }
    }

    /// Returns a handle without TTL jitter.
    pub fn without_jitter(&self) -> Cache {
        Cache {
            jitter: None,
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        }
    }

    /// Returns a handle that routes backend failures through the circuit
    /// breaker instead of propagating them.
    pub fn with_fallback(&self) -> Cache {
        Cache {
            use_fallback: true,
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        }
    }

    /// Returns a handle bound to the named backend, preserving strategies
    /// and runtime configuration. `None` when no such store is registered.
    pub fn store(&self, name: &str) -> Option<Cache> {
        let runtime = self.shared.runtimes.get(name)?.clone();
        Some(Cache {
            runtime,
            pending_tags: Arc::new(StdMutex::new(None)),
            ..self.clone()
        })
    }

    /// The circuit breaker guarding this handle's backend.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.runtime.breaker
    }

    /// Driver name of the bound backend.
    pub fn driver(&self) -> &str {
        self.runtime.driver.as_str()
    }

    // ---- internal plumbing ----

    pub(crate) fn prefixed(&self, key: &str) -> String {
        namespaced(self.namespace.as_deref(), key)
    }

    pub(crate) fn take_tags(&self) -> Vec<String> {
        self.pending_tags
            .lock()
            .expect("tags lock poisoned")
            .take()
            .unwrap_or_default()
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        match (ttl, self.jitter) {
            (Some(ttl), Some(percent)) => Some(apply_jitter(ttl, percent)),
            (ttl, _) => ttl,
        }
    }

    pub(crate) fn ctx<'a>(&'a self, key: &'a str, ttl: Option<Duration>) -> StrategyContext<'a> {
        StrategyContext {
            key,
            ttl,
            driver: self.runtime.driver.as_str(),
            store: self.runtime.store.as_ref(),
            config: &self.shared.config,
            sidecar: &self.runtime.sidecar,
        }
    }

    pub(crate) fn dispatch(&self, event: CacheEvent) {
        if self.shared.config.event_enabled(event.name()) {
            self.shared.events.dispatch(event);
        }
    }

    /// Records an operation timing and persists the metrics snapshot when
    /// one is due. Best-effort: persistence failures only log.
    pub(crate) async fn finish_op(&self, op: &'static str, start: Instant) {
        if self.runtime.perf.record(op, start.elapsed()) {
            let snapshot =
                serde_json::to_value(self.runtime.perf.snapshot()).unwrap_or(Value::Null);
            let ttl = self.shared.config.monitoring.metrics_ttl;
            if let Err(error) = self
                .runtime
                .store
                .put(PERF_METRICS_KEY, snapshot, Some(ttl))
                .await
            {
                warn!(%error, "failed to persist performance metrics snapshot");
            }
        }
    }

    async fn guarded_get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        if self.use_fallback {
            Ok(self
                .runtime
                .breaker
                .execute_with_fallback(|| self.runtime.store.get(key), None)
                .await)
        } else {
            Ok(self.runtime.store.get(key).await?)
        }
    }

    async fn guarded_put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        if self.use_fallback {
            Ok(self
                .runtime
                .breaker
                .execute_with_fallback(
                    || async { self.runtime.store.put(key, value, ttl).await.map(|()| true) },
                    false,
                )
                .await)
        } else {
            self.runtime.store.put(key, value, ttl).await?;
            Ok(true)
        }
    }

    /// The full read path over an already-prefixed key.
    pub(crate) async fn read_prefixed(&self, prefixed: &str) -> Result<Option<Value>, CacheError> {
        let Some(stored) = self.guarded_get(prefixed).await? else {
            self.runtime.perf.record_miss();
            metrics::record_miss(self.driver());
            self.dispatch(CacheEvent::Missed {
                key: prefixed.to_owned(),
            });
            return Ok(None);
        };
        let ctx = self.ctx(prefixed, None);
        let restored = match self.shared.chain.restore(stored.clone(), &ctx).await {
            Ok(value) => value,
            Err(StrategyError::Miss) => {
                self.runtime.perf.record_miss();
                metrics::record_miss(self.driver());
                self.dispatch(CacheEvent::Missed {
                    key: prefixed.to_owned(),
                });
                return Ok(None);
            }
            Err(error) => {
                // Restore failure falls back to the as-stored value.
                warn!(key = prefixed, %error, "restore failed; returning stored form");
                stored
            }
        };
        self.runtime.perf.record_hit();
        metrics::record_hit(self.driver());
        self.runtime.sidecar.bump_frequency(prefixed).await?;
        self.dispatch(CacheEvent::Hit {
            key: prefixed.to_owned(),
        });
        Ok(Some(unwrap_null(restored)))
    }

    /// The full write path over an already-prefixed key.
    pub(crate) async fn write_prefixed(
        &self,
        prefixed: &str,
        value: Value,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) -> Result<bool, CacheError> {
        let wrapped = if value.is_null() { wrap_null() } else { value };
        let ctx = self.ctx(prefixed, ttl);
        let (optimized, strategy) = self.shared.chain.optimize(&wrapped, &ctx).await?;
        let written = self.guarded_put(prefixed, optimized, ttl).await?;
        if written {
            self.runtime.sidecar.track(prefixed).await?;
            if !tags.is_empty() {
                self.runtime.sidecar.tag(prefixed, &tags).await?;
            }
            self.runtime.perf.record_write(strategy.is_some());
            if let Some(strategy) = strategy {
                self.dispatch(CacheEvent::OptimizationApplied {
                    key: prefixed.to_owned(),
                    strategy,
                });
            }
            self.dispatch(CacheEvent::KeyWritten {
                key: prefixed.to_owned(),
                ttl,
            });
        }
        Ok(written)
    }

    // ---- core operations ----

    /// Reads `key`. `Ok(None)` is a miss; a stored null reads back as
    /// `Some(Value::Null)`.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let start = Instant::now();
        let prefixed = self.prefixed(key);
        let result = self.read_prefixed(&prefixed).await;
        self.finish_op("get", start).await;
        result
    }

    /// Reads `key`, returning `default` on a miss. A stored null returns
    /// `Value::Null`, not the default.
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, CacheError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Writes `value` under `key` with an optional TTL.
    pub async fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let start = Instant::now();
        let prefixed = self.prefixed(key);
        let tags = self.take_tags();
        let ttl = self.effective_ttl(ttl);
        let result = self.write_prefixed(&prefixed, value, ttl, tags).await;
        self.finish_op("put", start).await;
        result.map(|_| ())
    }

    /// Alias for [`put`](Self::put).
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.put(key, value, ttl).await
    }

    /// Writes `value` with no expiry.
    pub async fn forever(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.put(key, value, None).await
    }

    /// Writes `value` only if `key` is absent. Returns whether the write
    /// happened. Atomicity follows the backend's `add` support.
    pub async fn add(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let start = Instant::now();
        let prefixed = self.prefixed(key);
        let tags = self.take_tags();
        let ttl = self.effective_ttl(ttl);
        let wrapped = if value.is_null() { wrap_null() } else { value };
        let ctx = self.ctx(&prefixed, ttl);
        let (optimized, strategy) = self.shared.chain.optimize(&wrapped, &ctx).await?;
        let added = self.runtime.store.add(&prefixed, optimized, ttl).await?;
        if added {
            self.runtime.sidecar.track(&prefixed).await?;
            if !tags.is_empty() {
                self.runtime.sidecar.tag(&prefixed, &tags).await?;
            }
            self.runtime.perf.record_write(strategy.is_some());
            self.dispatch(CacheEvent::KeyWritten {
                key: prefixed.clone(),
                ttl,
            });
        }
        self.finish_op("add", start).await;
        Ok(added)
    }

    /// Whether `key` holds a value.
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let prefixed = self.prefixed(key);
        Ok(self.runtime.store.has(&prefixed).await?)
    }

    /// Reads and removes `key` in one call.
    pub async fn pull(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.forget(key).await?;
        }
        Ok(value)
    }

    /// Increments the numeric value under `key`, initializing to `by`.
    pub async fn increment(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        let prefixed = self.prefixed(key);
        let value = self.runtime.store.increment(&prefixed, by).await?;
        self.runtime.sidecar.track(&prefixed).await?;
        Ok(value)
    }

    /// Decrements the numeric value under `key`.
    pub async fn decrement(&self, key: &str, by: i64) -> Result<i64, CacheError> {
        self.increment(key, -by).await
    }

    /// Reads several keys at once. The result maps each input key (as
    /// passed, without namespace) to its value or `None`.
    pub async fn many(&self, keys: &[&str]) -> Result<HashMap<String, Option<Value>>, CacheError> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            values.insert((*key).to_owned(), self.get(key).await?);
        }
        Ok(values)
    }

    /// Writes several entries with one TTL. Pending tags apply to every
    /// entry of the batch.
    pub async fn put_many(
        &self,
        entries: Vec<(String, Value)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let tags = self.take_tags();
        let ttl = self.effective_ttl(ttl);
        for (key, value) in entries {
            let prefixed = self.prefixed(&key);
            self.write_prefixed(&prefixed, value, ttl, tags.clone())
                .await?;
        }
        Ok(())
    }

    /// Removes several keys, returning how many existed.
    pub async fn delete_multiple(&self, keys: &[&str]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            if self.forget(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Alias for [`forget`](Self::forget).
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.forget(key).await
    }

    // ---- memoization ----

    /// Returns the cached value under `key`, or runs `producer`, stores
    /// its result, and returns it.
    pub async fn remember<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        let prefixed = self.prefixed(key);
        if let Some(value) = self.get(key).await? {
            self.runtime.cost.record_hit(&prefixed).await?;
            return Ok(value);
        }
        let start = Instant::now();
        let produced = producer().await?;
        let cost_ms = start.elapsed().as_secs_f64() * 1000.0;
        let size = crate::strategy::serialized_size(&produced) as u64;
        self.put(key, produced.clone(), ttl).await?;
        self.runtime.cost.record_build(&prefixed, cost_ms, size).await?;
        Ok(produced)
    }

    /// [`remember`](Self::remember) with no expiry.
    pub async fn remember_forever<F, Fut>(&self, key: &str, producer: F) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        self.remember(key, None, producer).await
    }

    /// Alias for [`remember_forever`](Self::remember_forever).
    pub async fn sear<F, Fut>(&self, key: &str, producer: F) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        self.remember_forever(key, producer).await
    }

    // ---- jitter convenience ----

    /// [`put`](Self::put) with an explicit jitter percentage.
    pub async fn put_with_jitter(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        percent: f64,
    ) -> Result<(), CacheError> {
        self.put(key, value, Some(apply_jitter(ttl, percent))).await
    }

    /// [`remember`](Self::remember) with an explicit jitter percentage.
    pub async fn remember_with_jitter<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        percent: f64,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        self.remember(key, Some(apply_jitter(ttl, percent)), producer)
            .await
    }

    // ---- dependencies ----

    /// Declares that invalidating `parent` must invalidate `child` first.
    pub async fn depends_on(&self, child: &str, parent: &str) -> Result<(), CacheError> {
        let child = self.prefixed(child);
        let parent = self.prefixed(parent);
        self.runtime.sidecar.add_dependency(&child, &parent).await?;
        Ok(())
    }

    // ---- lazy chunk access ----

    /// Returns a lazy read-only view over a chunked sequence, or `None`
    /// when `key` is absent or not a chunked sequence.
    pub async fn get_lazy(&self, key: &str) -> Result<Option<LazySequence>, CacheError> {
        let prefixed = self.prefixed(key);
        let Some(stored) = self.runtime.store.get(&prefixed).await? else {
            return Ok(None);
        };
        let Some(manifest) = ChunkManifest::from_value(&stored) else {
            return Ok(None);
        };
        if manifest.is_collection {
            // Maps restore eagerly; lazy views cover sequences only.
            return Ok(None);
        }
        Ok(Some(LazySequence::new(
            self.runtime.store.clone(),
            manifest,
        )))
    }

    // ---- lifecycle ----

    /// Persists buffered sidecar state and the final metrics snapshot.
    /// Call once when the process is shutting down.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.runtime.sidecar.persist_all().await?;
        if self.runtime.perf.enabled() {
            let snapshot =
                serde_json::to_value(self.runtime.perf.snapshot()).unwrap_or(Value::Null);
            let ttl = self.shared.config.monitoring.metrics_ttl;
            self.runtime
                .store
                .put(PERF_METRICS_KEY, snapshot, Some(ttl))
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("driver", &self.runtime.driver)
            .field("namespace", &self.namespace)
            .field("jitter", &self.jitter)
            .field("use_fallback", &self.use_fallback)
            .finish_non_exhaustive()
    }
}
