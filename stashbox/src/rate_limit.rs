//! Store-backed fixed-window rate limiting.
//!
//! A bucket lives under `rate:<key>` with a TTL equal to the window, so
//! the counter resets itself when the window ends. The same primitive
//! gates single-flight refreshes (`attempt("refresh:<key>", 1, ttl)`
//! admits exactly one refresher per TTL window).

use std::time::Duration;

use rand::Rng;
use serde_json::json;

use stashbox_backend::{SharedStore, Store, StoreResult};
use stashbox_core::key::rate_key;

use crate::config::RateLimiterConfig;

/// Fixed-window attempt counter backed by the store.
///
/// Atomicity is inherited from the store: with a native only-if-absent
/// `add` the window counter is race-free; with the default `has`+`put`
/// fallback two racers can both start a window, admitting one extra
/// attempt.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    config: RateLimiterConfig,
}

impl RateLimiter {
    /// Creates a limiter over `store` with the given defaults.
    pub fn new(store: SharedStore, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    /// Counts one attempt against the window for `key` and reports
    /// whether it is admitted (count ≤ `max`).
    pub async fn attempt(&self, key: &str, max: u64, window: Duration) -> StoreResult<bool> {
        let bucket = rate_key(key);
        if self.store.add(&bucket, json!(1), Some(window)).await? {
            return Ok(max >= 1);
        }
        let count = self.store.increment(&bucket, 1).await?;
        Ok(count >= 0 && count as u64 <= max)
    }

    /// [`attempt`](Self::attempt) with the configured window and limit.
    pub async fn attempt_default(&self, key: &str) -> StoreResult<bool> {
        self.attempt(key, self.config.max_attempts, self.config.window)
            .await
    }

    /// XFetch draw: whether an entry of `age` within `ttl` should be
    /// treated as already expired.
    ///
    /// `delta` estimates the recent cost of rebuilding the value; `beta`
    /// scales aggressiveness (1.0 is the published default). The entry
    /// expires early when `age + delta·beta·(−ln U) > ttl` for a uniform
    /// draw `U ∈ (0, 1]`, so expensive values start refreshing earlier
    /// and the expiry spreads across callers.
    pub fn should_refresh_probabilistically(
        &self,
        age: Duration,
        ttl: Duration,
        delta: Duration,
        beta: f64,
    ) -> bool {
        // 1.0 - gen::<f64>() maps [0,1) onto (0,1], keeping ln finite.
        let draw: f64 = 1.0 - rand::thread_rng().r#gen::<f64>();
        let early = delta.as_secs_f64() * beta * -draw.ln();
        age.as_secs_f64() + early > ttl.as_secs_f64()
    }
}
