//! Chunking of large collections.
//!
//! A collection whose element count and serialized size both exceed their
//! thresholds is partitioned into chunks written under
//! `_sc_chunk_<parent>_<i>` with the parent's TTL, and the parent key
//! receives a chunk manifest. The manifest is the only owning reference
//! to the chunks: forgetting the parent removes them, and a manifest with
//! a missing chunk reads as a miss.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use smol_str::SmolStr;

use stashbox_core::envelope::{ChunkManifest, EnvelopeKind, envelope_kind};
use stashbox_core::key::chunk_key;

use super::{Strategy, StrategyContext, StrategyError, estimated_size, exceeds_threshold};

/// Pluggable chunk-size estimator for smart sizing.
///
/// Driver payload limits differ wildly between backends, so the mapping
/// from driver to chunk size is injected rather than hardcoded.
pub trait ChunkSizeEstimator: Send + Sync {
    /// Elements per chunk for a value of `total_items` elements and
    /// roughly `estimated_bytes` serialized size on `driver`.
    fn chunk_size(&self, driver: &str, total_items: usize, estimated_bytes: usize) -> usize;
}

/// Estimator driven by a per-driver payload-limit table.
#[derive(Debug, Clone)]
pub struct DriverLimitEstimator {
    limits: HashMap<SmolStr, usize>,
    default_limit: usize,
}

impl DriverLimitEstimator {
    /// Creates an estimator with a custom default payload limit.
    pub fn new(default_limit: usize) -> Self {
        Self {
            limits: HashMap::new(),
            default_limit,
        }
    }

    /// Sets the payload limit for one driver.
    pub fn with_limit(mut self, driver: impl AsRef<str>, limit: usize) -> Self {
        self.limits.insert(SmolStr::new(driver), limit);
        self
    }
}

impl Default for DriverLimitEstimator {
    fn default() -> Self {
        Self::new(1024 * 1024)
            .with_limit("redis", 512 * 1024)
            .with_limit("memcached", 1024 * 1024)
            .with_limit("file", 10 * 1024 * 1024)
    }
}

impl ChunkSizeEstimator for DriverLimitEstimator {
    fn chunk_size(&self, driver: &str, total_items: usize, estimated_bytes: usize) -> usize {
        let limit = self
            .limits
            .get(driver)
            .copied()
            .unwrap_or(self.default_limit);
        let avg_item = (estimated_bytes / total_items.max(1)).max(1);
        (limit / avg_item).clamp(10, 10_000)
    }
}

/// Partitions oversized collections into same-TTL chunks.
pub struct ChunkingStrategy {
    estimator: std::sync::Arc<dyn ChunkSizeEstimator>,
}

impl ChunkingStrategy {
    /// Creates the strategy with the given smart-sizing estimator.
    pub fn new(estimator: std::sync::Arc<dyn ChunkSizeEstimator>) -> Self {
        Self { estimator }
    }

    fn element_count(value: &Value) -> Option<usize> {
        match value {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    fn effective_chunk_size(&self, value: &Value, ctx: &StrategyContext<'_>) -> usize {
        let config = &ctx.config.strategies.chunking;
        if config.smart_sizing {
            let total = Self::element_count(value).unwrap_or(0);
            self.estimator
                .chunk_size(ctx.driver, total, estimated_size(value))
        } else {
            config.chunk_size.max(1)
        }
    }
}

#[async_trait]
impl Strategy for ChunkingStrategy {
    fn id(&self) -> &'static str {
        "chunking"
    }

    fn should_apply(&self, value: &Value, ctx: &StrategyContext<'_>) -> bool {
        let config = &ctx.config.strategies.chunking;
        if !config.enabled || !ctx.config.driver_allows_chunking(ctx.driver) {
            return false;
        }
        let Some(count) = Self::element_count(value) else {
            return false;
        };
        count > self.effective_chunk_size(value, ctx)
            && exceeds_threshold(value, ctx.config.thresholds.chunking)
    }

    fn recognizes(&self, value: &Value) -> bool {
        envelope_kind(value) == Some(EnvelopeKind::Chunk)
    }

    async fn optimize(
        &self,
        value: &Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let chunk_size = self.effective_chunk_size(value, ctx);
        let config = &ctx.config.strategies.chunking;

        let (chunks, total_items, is_collection): (Vec<Value>, usize, bool) = match value {
            Value::Array(items) => (
                items
                    .chunks(chunk_size)
                    .map(|slice| Value::Array(slice.to_vec()))
                    .collect(),
                items.len(),
                false,
            ),
            Value::Object(map) => {
                let entries: Vec<(&String, &Value)> = map.iter().collect();
                (
                    entries
                        .chunks(chunk_size)
                        .map(|slice| {
                            Value::Object(
                                slice
                                    .iter()
                                    .map(|(k, v)| ((*k).clone(), (*v).clone()))
                                    .collect::<Map<String, Value>>(),
                            )
                        })
                        .collect(),
                    map.len(),
                    true,
                )
            }
            _ => return Err(StrategyError::failed("chunking requires a collection")),
        };

        let previous = ctx.sidecar.manifest_chunks(ctx.key).await?;

        let mut chunk_keys = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let key = chunk_key(ctx.key, index);
            ctx.store.put(&key, chunk, ctx.ttl).await?;
            chunk_keys.push(key);
        }
        ctx.sidecar
            .record_manifest(ctx.key, chunk_keys.clone())
            .await?;

        // A rewrite that shrank the value leaves high-index chunks from
        // the previous manifest behind; drop them now.
        if let Some(previous) = previous {
            for stale in previous.iter().filter(|key| !chunk_keys.contains(key)) {
                ctx.store.forget(stale).await?;
            }
        }

        Ok(ChunkManifest {
            chunked: true,
            chunk_keys,
            total_items,
            is_collection,
            original_key: ctx.key.to_owned(),
            driver: ctx.driver.to_owned(),
            lazy_loading: config.lazy_loading.then_some(true),
            chunk_size: Some(chunk_size),
        }
        .into_value())
    }

    async fn restore(
        &self,
        value: Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let Some(manifest) = ChunkManifest::from_value(&value) else {
            return Ok(value);
        };
        if manifest.is_collection {
            let mut merged = Map::with_capacity(manifest.total_items);
            for key in &manifest.chunk_keys {
                match ctx.store.get(key).await? {
                    Some(Value::Object(entries)) => merged.extend(entries),
                    // A lost or malformed chunk makes the whole value
                    // unreadable; the parent reads as a miss.
                    _ => return Err(StrategyError::Miss),
                }
            }
            Ok(Value::Object(merged))
        } else {
            let mut items = Vec::with_capacity(manifest.total_items);
            for key in &manifest.chunk_keys {
                match ctx.store.get(key).await? {
                    Some(Value::Array(chunk)) => items.extend(chunk),
                    _ => return Err(StrategyError::Miss),
                }
            }
            Ok(Value::Array(items))
        }
    }
}

impl std::fmt::Debug for ChunkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkingStrategy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_scales_with_driver_limit_and_item_size() {
        let estimator = DriverLimitEstimator::default();
        // 100-byte items against a 512 KiB limit.
        let redis = estimator.chunk_size("redis", 10_000, 1_000_000);
        let other = estimator.chunk_size("memory", 10_000, 1_000_000);
        assert!(redis < other);
        assert!(redis >= 10);
        assert!(other <= 10_000);
    }
}
