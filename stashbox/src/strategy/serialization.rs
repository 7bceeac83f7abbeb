//! Per-value serialization format selection.
//!
//! Values past the size threshold are re-serialized into the cheapest
//! round-trip-safe format: JSON when the value is composed of null,
//! booleans, strings, and integers (and maps/sequences of the same);
//! MessagePack otherwise, where non-integer numbers make exact JSON
//! round-tripping unreliable.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use stashbox_core::envelope::{
    EnvelopeKind, SerializationEnvelope, SerializationMethod, envelope_kind,
};

use super::{Strategy, StrategyContext, StrategyError, estimated_size, serialized_size};

/// Whether a value survives a JSON round trip exactly.
fn json_round_trip_safe(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => true,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::Array(items) => items.iter().all(json_round_trip_safe),
        Value::Object(map) => map.values().all(json_round_trip_safe),
    }
}

/// Chooses a serialization format per value.
#[derive(Debug, Default)]
pub struct SerializationStrategy;

impl SerializationStrategy {
    /// Creates the strategy.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for SerializationStrategy {
    fn id(&self) -> &'static str {
        "serialization"
    }

    fn should_apply(&self, value: &Value, ctx: &StrategyContext<'_>) -> bool {
        let config = &ctx.config.strategies.serialization;
        if !config.enabled {
            return false;
        }
        let estimate = estimated_size(value);
        if estimate >= config.size_threshold * 2 {
            return true;
        }
        if estimate * 2 < config.size_threshold {
            return false;
        }
        serialized_size(value) >= config.size_threshold
    }

    fn recognizes(&self, value: &Value) -> bool {
        envelope_kind(value) == Some(EnvelopeKind::Serialization)
    }

    async fn optimize(
        &self,
        value: &Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let (method, data) = if json_round_trip_safe(value) {
            (
                SerializationMethod::Json,
                serde_json::to_string(value).map_err(StrategyError::failed)?,
            )
        } else {
            let bytes = rmp_serde::to_vec(value).map_err(StrategyError::failed)?;
            (SerializationMethod::Binary, BASE64.encode(bytes))
        };
        Ok(SerializationEnvelope {
            serialized: true,
            method,
            data,
        }
        .into_value())
    }

    async fn restore(
        &self,
        value: Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let Some(envelope) = SerializationEnvelope::from_value(&value) else {
            return Ok(value);
        };
        match envelope.method {
            SerializationMethod::Json | SerializationMethod::Native => {
                serde_json::from_str(&envelope.data).map_err(StrategyError::failed)
            }
            SerializationMethod::Binary => {
                let bytes = BASE64
                    .decode(envelope.data.as_bytes())
                    .map_err(StrategyError::failed)?;
                rmp_serde::from_slice(&bytes).map_err(StrategyError::failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_payloads_are_json_safe() {
        assert!(json_round_trip_safe(&json!({"a": [1, 2, 3], "b": "x"})));
        assert!(!json_round_trip_safe(&json!({"a": [1.5]})));
        assert!(!json_round_trip_safe(&json!([{"deep": {"pi": 3.14}}])));
    }
}
