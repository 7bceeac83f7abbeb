//! Stale-while-revalidate and stampede protection.
//!
//! Every SWR variant funnels into [`flexible`](Cache::flexible): fresh
//! values return immediately, stale values return immediately *and* kick
//! off a background refresh behind a single-flight gate, expired values
//! rebuild synchronously. Probabilistic early expiration (XFetch) spreads
//! rebuilds of expensive values ahead of their real TTL.

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{Instrument, info_span, warn};

use crate::error::CacheError;
use crate::metrics;
use crate::queue::{CallbackDescriptor, JobQueue, RefreshJob};

use super::Cache;

/// Default XFetch delta when a key has no cost record yet.
const DEFAULT_REBUILD_COST: Duration = Duration::from_millis(100);

impl Cache {
    /// Stale-while-revalidate read.
    ///
    /// - age ≤ `fresh_ttl`: the cached value is returned as is.
    /// - age ≤ `stale_ttl`: the stale value is returned immediately and a
    ///   background refresh runs, admitted by a single-flight gate; on
    ///   refresh failure the stale value keeps being served.
    /// - otherwise: `producer` runs synchronously, its value is stored
    ///   with TTL `stale_ttl`, and returned.
    pub async fn flexible<F, Fut>(
        &self,
        key: &str,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        let prefixed = self.prefixed(key);
        let cached = self.read_prefixed(&prefixed).await?;
        let meta = self.runtime.sidecar.meta(&prefixed).await?;

        if let (Some(value), Some(meta)) = (cached, meta) {
            let age = meta.age();
            if age <= fresh_ttl {
                return Ok(value);
            }
            if age <= stale_ttl {
                metrics::record_stale(self.driver());
                self.refresh_in_background(prefixed, fresh_ttl, stale_ttl, producer)
                    .await;
                return Ok(value);
            }
        }

        let produced = producer().await?;
        self.write_prefixed(&prefixed, produced.clone(), Some(stale_ttl), self.take_tags())
            .await?;
        self.runtime
            .sidecar
            .record_meta(&prefixed, Some(fresh_ttl))
            .await?;
        Ok(produced)
    }

    /// Preset over [`flexible`](Self::flexible): fresh for `ttl`, then
    /// stale-serveable for another `stale_window`.
    pub async fn swr<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        stale_window: Duration,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        self.flexible(key, ttl, ttl + stale_window, producer).await
    }

    /// Preset over [`flexible`](Self::flexible): always serve whatever is
    /// cached and refresh in the background on every read.
    pub async fn stale<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        self.flexible(key, Duration::ZERO, ttl, producer).await
    }

    /// Preset over [`flexible`](Self::flexible): entries start refreshing
    /// `refresh_window` before their TTL ends.
    pub async fn refresh_ahead<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        refresh_window: Duration,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        self.flexible(key, ttl.saturating_sub(refresh_window), ttl, producer)
            .await
    }

    /// Memoization with probabilistic early expiration (XFetch).
    ///
    /// On a hit, the entry is treated as expired when
    /// `age + delta·beta·(−ln U) > ttl`, where `delta` is the recent
    /// rebuild cost of the key. One caller per TTL window wins the
    /// refresh gate and rebuilds; losers keep the current value.
    pub async fn remember_with_stampede_protection<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        beta: f64,
        producer: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CacheError>>,
    {
        let prefixed = self.prefixed(key);
        let cached = self.read_prefixed(&prefixed).await?;
        let meta = self.runtime.sidecar.meta(&prefixed).await?;

        if let (Some(value), Some(meta)) = (cached, meta) {
            let delta = self
                .runtime
                .cost
                .cost_for(&prefixed)
                .await?
                .unwrap_or(DEFAULT_REBUILD_COST);
            let expired = self.runtime.limiter.should_refresh_probabilistically(
                meta.lifetime(),
                ttl,
                delta,
                beta,
            );
            if !expired {
                self.runtime.cost.record_hit(&prefixed).await?;
                return Ok(value);
            }
            let admitted = self
                .runtime
                .limiter
                .attempt(&format!("refresh:{prefixed}"), 1, ttl)
                .await?;
            if !admitted {
                // Someone else is already rebuilding; serve what we have.
                return Ok(value);
            }
        }

        let start = Instant::now();
        let produced = producer().await?;
        let cost_ms = start.elapsed().as_secs_f64() * 1000.0;
        let size = crate::strategy::serialized_size(&produced) as u64;
        self.write_prefixed(&prefixed, produced.clone(), Some(ttl), self.take_tags())
            .await?;
        self.runtime.sidecar.record_meta(&prefixed, Some(ttl)).await?;
        self.runtime
            .cost
            .record_build(&prefixed, cost_ms, size)
            .await?;
        Ok(produced)
    }

    /// Checks the key's age and enqueues a refresh job when it has gone
    /// stale. Returns whether a job was dispatched.
    pub async fn async_swr(
        &self,
        key: &str,
        callback: &str,
        fresh_ttl: Duration,
        queue: &dyn JobQueue,
    ) -> Result<bool, CacheError> {
        let callback = CallbackDescriptor::parse(callback)?;
        let prefixed = self.prefixed(key);
        let stale = match self.runtime.sidecar.meta(&prefixed).await? {
            Some(meta) => meta.age() > fresh_ttl,
            None => true,
        };
        if stale {
            let job =
                RefreshJob::new(prefixed, callback, Some(fresh_ttl)).with_tags(self.take_tags());
            queue.dispatch(job).await?;
        }
        Ok(stale)
    }

    /// Unconditionally enqueues a refresh job for `key`. The descriptor
    /// is validated before dispatch and fails fast when malformed.
    pub async fn refresh_async(
        &self,
        key: &str,
        callback: &str,
        ttl: Option<Duration>,
        queue: &dyn JobQueue,
    ) -> Result<(), CacheError> {
        let callback = CallbackDescriptor::parse(callback)?;
        let prefixed = self.prefixed(key);
        let job = RefreshJob::new(prefixed, callback, ttl).with_tags(self.take_tags());
        queue.dispatch(job).await?;
        Ok(())
    }

    /// Admits at most one background refresher per freshness window, then
    /// spawns the refresh task.
    async fn refresh_in_background<F, Fut>(
        &self,
        prefixed: String,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        producer: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, CacheError>> + Send + 'static,
    {
        let gate = format!("refresh:{prefixed}");
        match self.runtime.limiter.attempt(&gate, 1, fresh_ttl).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                warn!(key = %prefixed, %error, "refresh gate unavailable; skipping refresh");
                return;
            }
        }
        metrics::record_refresh(self.driver());

        let cache = self.without_namespace();
        let span = info_span!("cache_refresh", key = %prefixed);
        tokio::spawn(
            async move {
                match producer().await {
                    Ok(value) => {
                        let written = cache
                            .write_prefixed(&prefixed, value, Some(stale_ttl), Vec::new())
                            .await;
                        match written {
                            Ok(_) => {
                                if let Err(error) = cache
                                    .runtime
                                    .sidecar
                                    .touch_meta(&prefixed, Some(fresh_ttl))
                                    .await
                                {
                                    warn!(key = %prefixed, %error, "failed to refresh metadata");
                                }
                            }
                            Err(error) => {
                                warn!(key = %prefixed, %error, "refresh write failed; keeping stale value");
                            }
                        }
                    }
                    Err(error) => {
                        warn!(key = %prefixed, %error, "refresh producer failed; keeping stale value");
                    }
                }
            }
            .instrument(span),
        );
    }
}
