//! Engine configuration.
//!
//! Every subsection has a `Default` and deserializes with
//! `#[serde(default)]`, so a partial configuration file only needs to
//! name the options it changes.

use std::collections::HashMap;
use std::time::Duration;

use bounded_integer::bounded_integer;
use serde::{Deserialize, Serialize};

bounded_integer! {
    /// Gzip compression level (0-9).
    #[repr(u8)]
    pub struct CompressionLevel { 0..=9 }
}

impl CompressionLevel {
    /// The gzip default level.
    pub const DEFAULT: CompressionLevel = match CompressionLevel::new(6) {
        Some(level) => level,
        None => unreachable!(),
    };
}

/// Byte thresholds above which value transformations engage.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Serialized size above which compression applies.
    pub compression: usize,
    /// Serialized size above which chunking applies.
    pub chunking: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            compression: 1024,
            chunking: 10 * 1024,
        }
    }
}

/// How the compression level is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// A single configured level for every value.
    #[default]
    Fixed,
    /// Per-value level from a sampled compressibility probe.
    Adaptive,
}

/// Tuning for the adaptive level chooser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Bytes sampled from the head of the payload for the probe.
    pub sample_size: usize,
    /// Probe ratio below which the payload compresses well (level 9).
    pub high_threshold: f64,
    /// Probe ratio above which compression pays poorly (level 3).
    pub low_threshold: f64,
    /// Access count above which the level is clamped to 3 (favor speed).
    pub frequency_threshold: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            sample_size: 1024,
            high_threshold: 0.5,
            low_threshold: 0.9,
            frequency_threshold: 100,
        }
    }
}

/// Compression strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    /// Whether compression participates in the write path.
    pub enabled: bool,
    /// Fixed or adaptive level selection.
    pub mode: CompressionMode,
    /// Level used in fixed mode and as the adaptive probe level.
    pub level: CompressionLevel,
    /// Adaptive-mode tuning.
    pub adaptive: AdaptiveConfig,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: CompressionMode::Fixed,
            level: CompressionLevel::DEFAULT,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

/// Chunking strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Whether chunking participates in the write path.
    pub enabled: bool,
    /// Elements per chunk (unless smart sizing overrides it).
    pub chunk_size: usize,
    /// Record chunked entries for on-demand loading via `get_lazy`.
    pub lazy_loading: bool,
    /// Derive the chunk size from driver payload limits.
    pub smart_sizing: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 100,
            lazy_loading: false,
            smart_sizing: false,
        }
    }
}

/// Smart serialization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SerializationConfig {
    /// Whether re-serialization participates in the write path.
    pub enabled: bool,
    /// Serialized size at which a format is chosen per value.
    pub size_threshold: usize,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_threshold: 1024,
        }
    }
}

/// Encryption strategy settings.
///
/// The strategy only engages when an encryptor is registered on the
/// engine builder; this section controls which keys it covers.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Whether encryption participates in the write path.
    pub enabled: bool,
    /// Encrypt every key, ignoring the allow-list.
    pub encrypt_all: bool,
    /// Exact keys to encrypt.
    pub keys: Vec<String>,
    /// Regex patterns of keys to encrypt.
    pub patterns: Vec<String>,
}

/// Per-strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Strategies {
    /// Compression (fixed or adaptive).
    pub compression: CompressionConfig,
    /// Chunking of large collections.
    pub chunking: ChunkingConfig,
    /// Smart serialization.
    pub serialization: SerializationConfig,
    /// Encryption allow-list.
    pub encryption: EncryptionConfig,
}

/// Strategy failure behavior on the write path.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Fallback {
    /// Skip a failing strategy and try the next candidate (or store raw).
    pub enabled: bool,
    /// Log a warning when a strategy fails.
    pub log_errors: bool,
}

impl Default for Fallback {
    fn default() -> Self {
        Self {
            enabled: true,
            log_errors: true,
        }
    }
}

/// Performance-metrics collection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Monitoring {
    /// Whether per-operation metrics are recorded.
    pub enabled: bool,
    /// TTL of the persisted metrics snapshot.
    #[serde(with = "humantime_serde")]
    pub metrics_ttl: Duration,
    /// Bound of the per-operation recent-samples buffer.
    pub recent_entries_limit: usize,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_ttl: Duration::from_secs(3600),
            recent_entries_limit: 100,
        }
    }
}

/// Thresholds used by `analyze_performance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Warnings {
    /// Hit ratio below which a warning is reported.
    pub hit_ratio_threshold: f64,
    /// Optimized-write ratio below which a warning is reported.
    pub optimization_ratio_threshold: f64,
    /// Average write duration above which writes count as slow.
    #[serde(with = "humantime_serde")]
    pub slow_write_threshold: Duration,
}

impl Default for Warnings {
    fn default() -> Self {
        Self {
            hit_ratio_threshold: 0.5,
            optimization_ratio_threshold: 0.1,
            slow_write_threshold: Duration::from_millis(100),
        }
    }
}

/// Per-driver strategy toggles.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct DriverToggles {
    /// Whether compression is allowed on this driver.
    pub compression: bool,
    /// Whether chunking is allowed on this driver.
    pub chunking: bool,
}

impl Default for DriverToggles {
    fn default() -> Self {
        Self {
            compression: true,
            chunking: true,
        }
    }
}

/// Event-dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(default)]
pub struct Events {
    /// Master switch for the event sink.
    pub enabled: bool,
    /// Per-event toggles by event name; absent means enabled.
    pub dispatch: HashMap<String, bool>,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before probing.
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    /// Half-open successes required to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Rate limiter defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Length of the fixed counting window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Attempts admitted per window.
    pub max_attempts: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts: 60,
        }
    }
}

/// Cost-aware scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CostAware {
    /// Whether per-key cost records are kept.
    pub enabled: bool,
}

impl Default for CostAware {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte thresholds for value transformations.
    pub thresholds: Thresholds,
    /// Per-strategy settings.
    pub strategies: Strategies,
    /// Strategy failure behavior.
    pub fallback: Fallback,
    /// Performance-metrics collection.
    pub monitoring: Monitoring,
    /// `analyze_performance` thresholds.
    pub warnings: Warnings,
    /// Per-driver strategy toggles, keyed by driver name.
    pub drivers: HashMap<String, DriverToggles>,
    /// Event-dispatch settings.
    pub events: Events,
    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiter defaults.
    pub rate_limiter: RateLimiterConfig,
    /// Cost-aware scoring.
    pub cost_aware: CostAware,
}

impl CacheConfig {
    /// Whether compression is allowed for `driver`.
    pub fn driver_allows_compression(&self, driver: &str) -> bool {
        self.drivers.get(driver).is_none_or(|t| t.compression)
    }

    /// Whether chunking is allowed for `driver`.
    pub fn driver_allows_chunking(&self, driver: &str) -> bool {
        self.drivers.get(driver).is_none_or(|t| t.chunking)
    }

    /// Whether `event` should be dispatched to the sink.
    pub fn event_enabled(&self, event: &str) -> bool {
        self.events.enabled && self.events.dispatch.get(event).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.thresholds.compression, 1024);
        assert_eq!(config.strategies.chunking.chunk_size, 100);
    }

    #[test]
    fn partial_document_overrides_one_field() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "thresholds": {"chunking": 2048},
                "strategies": {"compression": {"enabled": false, "mode": "adaptive"}},
                "circuit_breaker": {"failure_threshold": 3, "recovery_timeout": "1s"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.thresholds.chunking, 2048);
        assert_eq!(config.thresholds.compression, 1024);
        assert!(!config.strategies.compression.enabled);
        assert_eq!(config.strategies.compression.mode, CompressionMode::Adaptive);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(1));
        assert_eq!(config.circuit_breaker.success_threshold, 2);
    }

    #[test]
    fn driver_toggles_default_to_allowed() {
        let mut config = CacheConfig::default();
        assert!(config.driver_allows_compression("memory"));
        config.drivers.insert(
            "memory".into(),
            DriverToggles {
                compression: false,
                chunking: true,
            },
        );
        assert!(!config.driver_allows_compression("memory"));
        assert!(config.driver_allows_chunking("memory"));
    }

    #[test]
    fn events_default_off_and_honor_per_event_toggles() {
        let mut config = CacheConfig::default();
        assert!(!config.event_enabled("cache_hit"));
        config.events.enabled = true;
        assert!(config.event_enabled("cache_hit"));
        config.events.dispatch.insert("cache_hit".into(), false);
        assert!(!config.event_enabled("cache_hit"));
    }
}
