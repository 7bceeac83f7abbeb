//! Adaptive-level gzip compression.
//!
//! The level is chosen per value from a sampled compressibility probe,
//! then adjusted by how the key is used: hot keys favor speed, very large
//! payloads favor ratio.

use async_trait::async_trait;
use serde_json::Value;

use stashbox_core::envelope::{CompressionEnvelope, EnvelopeKind, envelope_kind};

use super::compression::{
    build_envelope, compressible_bytes, gzip, is_compressible_type, restore_envelope,
};
use super::{Strategy, StrategyContext, StrategyError, exceeds_threshold};

/// Payload size above which the level is biased toward ratio.
const LARGE_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Level clamp for frequently accessed keys.
const HOT_KEY_LEVEL: u32 = 3;

/// Gzip compression with a per-value level.
#[derive(Debug, Default)]
pub struct AdaptiveCompressionStrategy;

impl AdaptiveCompressionStrategy {
    /// Creates the adaptive strategy.
    pub fn new() -> Self {
        Self
    }

    /// Probes the head of the payload and picks a level.
    fn probe_level(bytes: &[u8], ctx: &StrategyContext<'_>) -> Result<u32, StrategyError> {
        let tuning = &ctx.config.strategies.compression.adaptive;
        let default_level = u32::from(ctx.config.strategies.compression.level.get());
        let sample = &bytes[..bytes.len().min(tuning.sample_size)];
        if sample.is_empty() {
            return Ok(default_level);
        }
        let probe = gzip(sample, default_level)?;
        let ratio = probe.len() as f64 / sample.len() as f64;
        Ok(if ratio < tuning.high_threshold {
            // Compresses well; spend the cycles.
            9
        } else if ratio > tuning.low_threshold {
            // Barely compresses; do not waste time on it.
            HOT_KEY_LEVEL
        } else {
            default_level
        })
    }
}

#[async_trait]
impl Strategy for AdaptiveCompressionStrategy {
    fn id(&self) -> &'static str {
        "adaptive_compression"
    }

    fn should_apply(&self, value: &Value, ctx: &StrategyContext<'_>) -> bool {
        ctx.config.strategies.compression.enabled
            && ctx.config.driver_allows_compression(ctx.driver)
            && is_compressible_type(value)
            && exceeds_threshold(value, ctx.config.thresholds.compression)
    }

    fn recognizes(&self, value: &Value) -> bool {
        envelope_kind(value) == Some(EnvelopeKind::Compression)
    }

    async fn optimize(
        &self,
        value: &Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let tuning = &ctx.config.strategies.compression.adaptive;
        let (bytes, is_string) = compressible_bytes(value)?;
        let mut level = Self::probe_level(&bytes, ctx)?;
        if ctx.sidecar.frequency(ctx.key).await? > tuning.frequency_threshold {
            // Hot key: decompression latency dominates, clamp toward speed.
            level = level.min(HOT_KEY_LEVEL);
        }
        if bytes.len() > LARGE_PAYLOAD_BYTES {
            level = (level + 2).min(9);
        }
        let compressed = gzip(&bytes, level)?;
        Ok(build_envelope(compressed, is_string, bytes.len(), level, true))
    }

    async fn restore(
        &self,
        value: Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        match CompressionEnvelope::from_value(&value) {
            Some(envelope) => restore_envelope(envelope),
            None => Ok(value),
        }
    }
}
