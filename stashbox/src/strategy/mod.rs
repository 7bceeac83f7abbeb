//! Value-transformation strategies.
//!
//! Strategies are capability-bearing values held in an ordered registry.
//! On the write path the chain evaluates `should_apply` **in registration
//! order against the original value** and applies the first match — and
//! only that one. First-match-wins keeps envelopes flat: a value is never
//! compressed *and* chunked, which would be impossible to restore
//! losslessly.
//!
//! On the read path each strategy recognizes only its own envelope marker
//! and short-circuits the chain; values without a marker pass through
//! untouched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use stashbox_backend::{Store, StoreError};
use stashbox_core::envelope::envelope_kind;

use crate::config::{CacheConfig, CompressionMode};
use crate::sidecar::SidecarIndex;

mod adaptive;
mod chunking;
mod compression;
mod encryption;
mod lazy;
mod serialization;

pub use adaptive::AdaptiveCompressionStrategy;
pub use chunking::{ChunkSizeEstimator, ChunkingStrategy, DriverLimitEstimator};
pub use compression::CompressionStrategy;
pub use encryption::{EncryptionError, EncryptionStrategy, Encryptor};
pub use lazy::LazySequence;
pub use serialization::SerializationStrategy;

/// Error type for strategy operations.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The stored value cannot be produced (missing chunk, failed
    /// decrypt); the engine reports a miss.
    #[error("value not restorable; treated as miss")]
    Miss,

    /// The backing store failed mid-transformation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transformation itself failed.
    #[error("{0}")]
    Failed(String),
}

impl StrategyError {
    pub(crate) fn failed(error: impl std::fmt::Display) -> Self {
        StrategyError::Failed(error.to_string())
    }
}

/// Per-operation context handed to strategies.
pub struct StrategyContext<'a> {
    /// Fully-prefixed key being written or read.
    pub key: &'a str,
    /// TTL of the write, if any.
    pub ttl: Option<Duration>,
    /// Driver name of the bound store.
    pub driver: &'a str,
    /// The bound store, for strategies that read or write side entries.
    pub store: &'a dyn Store,
    /// Engine configuration.
    pub config: &'a CacheConfig,
    /// Sidecar index, for access frequency and manifest registration.
    pub sidecar: &'a SidecarIndex,
}

/// A single value transformer.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable short identifier, used in events and logs.
    fn id(&self) -> &'static str;

    /// Whether this strategy wants to transform `value` on a write.
    fn should_apply(&self, value: &Value, ctx: &StrategyContext<'_>) -> bool;

    /// Whether `value` carries this strategy's envelope marker.
    fn recognizes(&self, value: &Value) -> bool;

    /// Transforms `value` into its stored form.
    async fn optimize(
        &self,
        value: &Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError>;

    /// Restores a stored value this strategy produced. Values without
    /// this strategy's marker are returned unchanged.
    async fn restore(&self, value: Value, ctx: &StrategyContext<'_>)
    -> Result<Value, StrategyError>;
}

/// Ordered first-match-wins registry of strategies.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyChain {
    /// Builds a chain from an explicit strategy list.
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Builds the standard chain for `config`.
    ///
    /// Registration order is compression (fixed or adaptive per
    /// configuration), chunking, serialization, then encryption when an
    /// encryptor was provided. `enabled` flags gate the write path only;
    /// every registered strategy still restores its envelope on reads,
    /// so disabling a strategy never strands previously written values.
    pub fn from_config(
        config: &CacheConfig,
        encryptor: Option<Arc<dyn Encryptor>>,
        estimator: Arc<dyn ChunkSizeEstimator>,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn Strategy>> = Vec::new();
        match config.strategies.compression.mode {
            CompressionMode::Fixed => strategies.push(Arc::new(CompressionStrategy::new())),
            CompressionMode::Adaptive => {
                strategies.push(Arc::new(AdaptiveCompressionStrategy::new()));
            }
        }
        strategies.push(Arc::new(ChunkingStrategy::new(estimator)));
        strategies.push(Arc::new(SerializationStrategy::new()));
        if let Some(encryptor) = encryptor {
            strategies.push(Arc::new(EncryptionStrategy::new(encryptor, config)));
        }
        Self { strategies }
    }

    /// Write path: applies the first matching strategy to `value`.
    ///
    /// Returns the stored form and the id of the strategy that won, if
    /// any. A failing strategy falls through to the next candidate when
    /// fallback is enabled, otherwise the error propagates.
    pub async fn optimize(
        &self,
        value: &Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<(Value, Option<&'static str>), StrategyError> {
        for strategy in &self.strategies {
            if !strategy.should_apply(value, ctx) {
                continue;
            }
            match strategy.optimize(value, ctx).await {
                Ok(optimized) => return Ok((optimized, Some(strategy.id()))),
                Err(error) if ctx.config.fallback.enabled => {
                    if ctx.config.fallback.log_errors {
                        warn!(
                            strategy = strategy.id(),
                            key = ctx.key,
                            %error,
                            "strategy failed; falling through to next candidate"
                        );
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Ok((value.clone(), None))
    }

    /// Read path: restores `value` through the strategy that recognizes
    /// its envelope marker. Raw values pass through unchanged.
    pub async fn restore(
        &self,
        value: Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        if envelope_kind(&value).is_none() {
            return Ok(value);
        }
        for strategy in &self.strategies {
            if strategy.recognizes(&value) {
                return strategy.restore(value, ctx).await;
            }
        }
        // Envelope written by a strategy not in this chain; hand the
        // stored form back as is.
        Ok(value)
    }

    /// Registered strategy ids, in order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("strategies", &self.ids())
            .finish()
    }
}

/// Cheap size estimate: string length, or ~50 bytes per element for
/// collections.
pub(crate) fn estimated_size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(items) => 50 * items.len(),
        Value::Object(map) => 50 * map.len(),
        _ => 16,
    }
}

/// Exact serialized size.
pub(crate) fn serialized_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Threshold check that serializes only when the cheap estimate is
/// inconclusive (within 2x of the threshold either way).
pub(crate) fn exceeds_threshold(value: &Value, threshold: usize) -> bool {
    let estimate = estimated_size(value);
    if estimate > threshold.saturating_mul(2) {
        return true;
    }
    if estimate < threshold / 2 {
        return false;
    }
    serialized_size(value) > threshold
}
