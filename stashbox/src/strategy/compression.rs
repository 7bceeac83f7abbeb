//! Fixed-level gzip compression.

use std::io::{Read, Write};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;

use stashbox_core::envelope::{CompressionEnvelope, EnvelopeKind, envelope_kind};

use super::{Strategy, StrategyContext, StrategyError, exceeds_threshold};

/// Serializes a value for compression.
///
/// Strings compress as their raw bytes (`is_string` in the envelope lets
/// restore skip deserialization); everything else serializes to JSON.
pub(crate) fn compressible_bytes(value: &Value) -> Result<(Vec<u8>, bool), StrategyError> {
    match value {
        Value::String(s) => Ok((s.as_bytes().to_vec(), true)),
        other => Ok((serde_json::to_vec(other).map_err(StrategyError::failed)?, false)),
    }
}

/// Gzip-compresses `bytes` at `level`.
pub(crate) fn gzip(bytes: &[u8], level: u32) -> Result<Vec<u8>, StrategyError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(bytes).map_err(StrategyError::failed)?;
    encoder.finish().map_err(StrategyError::failed)
}

/// Inflates a gzip stream.
pub(crate) fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, StrategyError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(StrategyError::failed)?;
    Ok(inflated)
}

/// Builds the stored envelope for a compressed payload.
pub(crate) fn build_envelope(
    compressed: Vec<u8>,
    is_string: bool,
    original_size: usize,
    level: u32,
    adaptive: bool,
) -> Value {
    CompressionEnvelope {
        compressed: true,
        data: BASE64.encode(&compressed),
        is_string,
        adaptive: adaptive.then_some(true),
        level: Some(level),
        original_size: Some(original_size as u64),
        compressed_size: Some(compressed.len() as u64),
    }
    .into_value()
}

/// Restores the original value from a compression envelope.
///
/// Shared between the fixed and adaptive strategies: both write the same
/// envelope shape.
pub(crate) fn restore_envelope(envelope: CompressionEnvelope) -> Result<Value, StrategyError> {
    let compressed = BASE64
        .decode(envelope.data.as_bytes())
        .map_err(StrategyError::failed)?;
    let inflated = gunzip(&compressed)?;
    if envelope.is_string {
        String::from_utf8(inflated)
            .map(Value::String)
            .map_err(StrategyError::failed)
    } else {
        serde_json::from_slice(&inflated).map_err(StrategyError::failed)
    }
}

/// Whether the value is a type compression handles.
pub(crate) fn is_compressible_type(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_))
}

/// Gzip compression at the configured fixed level.
#[derive(Debug, Default)]
pub struct CompressionStrategy;

impl CompressionStrategy {
    /// Creates the fixed-level strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for CompressionStrategy {
    fn id(&self) -> &'static str {
        "compression"
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
        let level = u32::from(ctx.config.strategies.compression.level.get());
        let (bytes, is_string) = compressible_bytes(value)?;
        let compressed = gzip(&bytes, level)?;
        Ok(build_envelope(compressed, is_string, bytes.len(), level, false))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let payload = "abc".repeat(5000);
        let compressed = gzip(payload.as_bytes(), 6).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(gunzip(&compressed).unwrap(), payload.as_bytes());
    }

    #[test]
    fn envelope_round_trips_strings_without_deserialization() {
        let original = Value::String("x".repeat(4096));
        let (bytes, is_string) = compressible_bytes(&original).unwrap();
        assert!(is_string);
        let stored = build_envelope(gzip(&bytes, 6).unwrap(), true, bytes.len(), 6, false);
        let envelope = CompressionEnvelope::from_value(&stored).unwrap();
        assert_eq!(envelope.level, Some(6));
        assert_eq!(restore_envelope(envelope).unwrap(), original);
    }
}
