//! Reserved key layout and namespace prefixing.
//!
//! Cache keys are opaque strings. The engine owns every key starting with
//! the reserved `_sc_` prefix and uses it for sidecar bookkeeping:
//!
//! | Prefix | Contents |
//! |---|---|
//! | `_sc_managed_keys` | sequence of fully-prefixed keys written through the engine |
//! | `_sc_tag_<tag>` | sequence of keys bearing a tag |
//! | `_sc_dependencies` | mapping `key → [parent, ...]` |
//! | `_sc_meta:<key>` | SWR/stampede metadata |
//! | `_sc_chunk_<parent>_<i>` | individual chunk payload |
//! | `_sc_performance_metrics` | engine metrics snapshot |
//! | `_sc_adaptive_freq` | access-frequency map |
//! | `_sc_cost:<key>` | cost-record for a key |
//!
//! Callers must not use keys starting with `_sc_`.
//!
//! ## Namespaces
//!
//! An active namespace is applied at the first entry point of every
//! operation: `namespaced(Some("tenant"), "user:1")` yields
//! `"tenant:user:1"`. All sidecar indices store the fully-prefixed form.

/// Prefix owned by the engine; application keys must not start with it.
pub const RESERVED_PREFIX: &str = "_sc_";

/// Key holding the sequence of managed (engine-written) keys.
pub const MANAGED_KEYS_KEY: &str = "_sc_managed_keys";

/// Prefix of per-tag key sequences.
pub const TAG_PREFIX: &str = "_sc_tag_";

/// Key holding the dependency graph (`key → [parent, ...]`).
pub const DEPENDENCIES_KEY: &str = "_sc_dependencies";

/// Prefix of per-key SWR/stampede metadata documents.
pub const META_PREFIX: &str = "_sc_meta:";

/// Prefix of individual chunk payload keys.
pub const CHUNK_PREFIX: &str = "_sc_chunk_";

/// Key holding the persisted performance-metrics snapshot.
pub const PERF_METRICS_KEY: &str = "_sc_performance_metrics";

/// Key holding the access-frequency map used by adaptive compression.
pub const ADAPTIVE_FREQ_KEY: &str = "_sc_adaptive_freq";

/// Key holding the chunk-manifest registry (`parent → [chunk key, ...]`)
/// consulted by the orphan sweep.
pub const CHUNK_MANIFESTS_KEY: &str = "_sc_chunk_manifests";

/// Prefix of per-key cost records.
pub const COST_PREFIX: &str = "_sc_cost:";

/// Prefix of rate-limiter window buckets.
pub const RATE_PREFIX: &str = "rate:";

/// Applies the active namespace to a key.
///
/// Reserved keys are never namespaced; they address engine-global state.
pub fn namespaced(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !is_reserved(key) => format!("{ns}:{key}"),
        _ => key.to_owned(),
    }
}

/// Strips a namespace prefix from a fully-prefixed key, if present.
pub fn strip_namespace<'a>(namespace: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(namespace)?.strip_prefix(':')
}

/// Returns `true` for keys owned by the engine.
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Formats the key of chunk `index` belonging to `parent`.
pub fn chunk_key(parent: &str, index: usize) -> String {
    format!("{CHUNK_PREFIX}{parent}_{index}")
}

/// Returns `true` for keys produced by [`chunk_key`].
pub fn is_chunk_key(key: &str) -> bool {
    key.starts_with(CHUNK_PREFIX)
}

/// Formats the sidecar key of a tag's member sequence.
pub fn tag_key(tag: &str) -> String {
    format!("{TAG_PREFIX}{tag}")
}

/// Formats the sidecar key of a key's SWR/stampede metadata.
pub fn meta_key(key: &str) -> String {
    format!("{META_PREFIX}{key}")
}

/// Formats the sidecar key of a key's cost record.
pub fn cost_key(key: &str) -> String {
    format!("{COST_PREFIX}{key}")
}

/// Formats the backing key of a rate-limiter window bucket.
pub fn rate_key(key: &str) -> String {
    format!("{RATE_PREFIX}{key}")
}
