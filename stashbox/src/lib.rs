#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Circuit breaker around backend calls.
///
/// Provides [`CircuitBreaker`](breaker::CircuitBreaker), a per-engine
/// closed/open/half-open state machine with fallback execution.
pub mod breaker;

/// Engine configuration types.
///
/// Every subsection deserializes with defaults, so configuration files
/// only name what they change.
pub mod config;

/// Cost-aware value scoring.
///
/// Tracks per-key regeneration cost, access patterns, and size, and
/// suggests evictions for the least valuable entries.
pub mod cost;

/// The cache façade and its operation surface.
pub mod engine;

/// Error types for cache operations.
pub mod error;

/// Cache lifecycle events and the pluggable sink they dispatch to.
pub mod events;

/// TTL jitter helpers.
pub mod jitter;

/// Metrics collection for cache observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// for cache hits, misses, stale serves, and background refreshes.
pub mod metrics;

/// Engine-internal performance metrics (per-operation timing aggregates).
pub mod perf;

/// Background refresh handoff to an external job queue.
pub mod queue;

/// Store-backed fixed-window rate limiting and XFetch draws.
pub mod rate_limit;

/// Sidecar index: managed keys, tags, dependencies, access frequency,
/// chunk-manifest registry, and SWR metadata.
pub mod sidecar;

/// Value-transformation strategies and the first-match-wins chain.
pub mod strategy;

pub use breaker::{BreakerState, BreakerStats, CircuitBreaker};
pub use config::{CacheConfig, CompressionLevel, CompressionMode};
pub use cost::{CostRecord, ScoredRecord};
pub use engine::{Cache, CacheBuilder, HealthReport, PerformanceReport, Statistics};
pub use error::CacheError;
pub use events::{CacheEvent, EventSink, NoopSink};
pub use jitter::apply_jitter;
pub use queue::{CallbackDescriptor, JobQueue, QueueError, RefreshJob};
pub use rate_limit::RateLimiter;
pub use sidecar::SwrMeta;
pub use strategy::{
    ChunkSizeEstimator, DriverLimitEstimator, EncryptionError, Encryptor, LazySequence, Strategy,
    StrategyChain, StrategyContext, StrategyError,
};

pub use stashbox_backend::{SharedStore, Store, StoreError};

/// The `stashbox` prelude.
///
/// Provides convenient access to the most commonly used types:
///
/// ```rust
/// use stashbox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Cache, CacheConfig, CacheError, Store};
}
