#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod envelope;
pub mod key;
pub mod value;

pub use envelope::{
    ChunkManifest, CompressionEnvelope, EncryptionEnvelope, EnvelopeKind, SerializationEnvelope,
    SerializationMethod, envelope_kind, is_null_marker, unwrap_null, wrap_null,
};
pub use key::{
    ADAPTIVE_FREQ_KEY, CHUNK_MANIFESTS_KEY, CHUNK_PREFIX, COST_PREFIX, DEPENDENCIES_KEY,
    MANAGED_KEYS_KEY, META_PREFIX, PERF_METRICS_KEY, RATE_PREFIX, RESERVED_PREFIX, TAG_PREFIX,
    chunk_key, cost_key, is_chunk_key, is_reserved, meta_key, namespaced, rate_key,
    strip_namespace, tag_key,
};
pub use value::{deadline_from_ttl, is_past};
