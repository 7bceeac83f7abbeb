//! Marker-field envelopes for transformed values.
//!
//! A value written through the engine is stored either raw or wrapped in
//! exactly one *envelope*: a JSON map carrying a reserved boolean marker
//! field that names the transformation applied to it. Envelopes are
//! distinguished by their marker field, never by shape guessing:
//!
//! - `{"compressed": true, ...}` — gzip-compressed payload
//! - `{"chunked": true, ...}` — chunk manifest of a partitioned value
//! - `{"serialized": true, ...}` — re-serialized payload (json/binary/native)
//! - `{"encrypted": true, ...}` — ciphertext payload
//! - `{"__stashbox_null__": true}` — stored null (distinguishes a cached
//!   null from a backend miss)
//!
//! A stored value carries **at most one** envelope at the top level; the
//! write path selects a single transformation per value.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Marker field of a compression envelope.
pub const COMPRESSED_MARKER: &str = "compressed";

/// Marker field of a chunk manifest.
pub const CHUNKED_MARKER: &str = "chunked";

/// Marker field of a serialization envelope.
pub const SERIALIZED_MARKER: &str = "serialized";

/// Marker field of an encryption envelope.
pub const ENCRYPTED_MARKER: &str = "encrypted";

/// The exact single field of the null marker map.
pub const NULL_MARKER: &str = "__stashbox_null__";

/// The envelope family a stored value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Gzip compression envelope.
    Compression,
    /// Chunk manifest.
    Chunk,
    /// Serialization envelope.
    Serialization,
    /// Encryption envelope.
    Encryption,
}

/// Classifies a stored value by its envelope marker.
///
/// Returns `None` for raw values and for the null marker, which is handled
/// separately by [`is_null_marker`].
pub fn envelope_kind(value: &Value) -> Option<EnvelopeKind> {
    let map = value.as_object()?;
    let marked = |marker: &str| map.get(marker).and_then(Value::as_bool) == Some(true);
    if marked(COMPRESSED_MARKER) {
        Some(EnvelopeKind::Compression)
    } else if marked(CHUNKED_MARKER) {
        Some(EnvelopeKind::Chunk)
    } else if marked(SERIALIZED_MARKER) {
        Some(EnvelopeKind::Serialization)
    } else if marked(ENCRYPTED_MARKER) {
        Some(EnvelopeKind::Encryption)
    } else {
        None
    }
}

/// Wraps a null value in the single-field marker map.
pub fn wrap_null() -> Value {
    json!({ NULL_MARKER: true })
}

/// Recognizes the null marker.
///
/// The check requires the exact single-key shape; a map that merely
/// *contains* the marker field among others is application data.
pub fn is_null_marker(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => map.len() == 1 && map.get(NULL_MARKER).and_then(Value::as_bool) == Some(true),
        None => false,
    }
}

/// Unwraps the null marker back into `Value::Null`, passing other values
/// through unchanged.
pub fn unwrap_null(value: Value) -> Value {
    if is_null_marker(&value) { Value::Null } else { value }
}

/// Compression envelope payload.
///
/// `data` holds the base64 of the gzip stream. `is_string` records whether
/// the original value was a plain string, so restore can skip
/// deserialization of the inflated bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionEnvelope {
    /// Envelope marker; always `true`.
    pub compressed: bool,
    /// Base64 of the gzip-compressed serialized payload.
    pub data: String,
    /// Whether the original value was a plain string.
    pub is_string: bool,
    /// Set when the level was chosen adaptively.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive: Option<bool>,
    /// Compression level used (0–9).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Serialized size before compression, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    /// Compressed size, in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
}

impl CompressionEnvelope {
    /// Parses a stored value as a compression envelope.
    ///
    /// Returns `None` unless the marker field is present and `true`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if envelope_kind(value) != Some(EnvelopeKind::Compression) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Serializes the envelope into its stored form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Chunk manifest: the parent-key payload of a chunked value.
///
/// The manifest is the only owning reference to its chunks; forgetting the
/// parent removes every listed chunk key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Envelope marker; always `true`.
    pub chunked: bool,
    /// Keys of the individual chunks, in order.
    pub chunk_keys: Vec<String>,
    /// Total number of elements across all chunks.
    pub total_items: usize,
    /// `true` when the original value was a map, `false` for sequences.
    pub is_collection: bool,
    /// The fully-prefixed key the manifest is stored under.
    pub original_key: String,
    /// Driver name of the store the chunks were written to.
    pub driver: String,
    /// Whether the entry was written with lazy loading enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lazy_loading: Option<bool>,
    /// Chunk size used when partitioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

impl ChunkManifest {
    /// Parses a stored value as a chunk manifest.
    pub fn from_value(value: &Value) -> Option<Self> {
        if envelope_kind(value) != Some(EnvelopeKind::Chunk) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Serializes the manifest into its stored form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Serialization method recorded in a serialization envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationMethod {
    /// `serde_json`; `data` is the UTF-8 JSON text.
    Json,
    /// MessagePack; `data` is base64 of the encoded bytes.
    Binary,
    /// Platform default (`serde_json`); `data` is the UTF-8 JSON text.
    Native,
}

/// Serialization envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializationEnvelope {
    /// Envelope marker; always `true`.
    pub serialized: bool,
    /// Method used to encode `data`.
    pub method: SerializationMethod,
    /// Encoded payload (UTF-8 text for json/native, base64 for binary).
    pub data: String,
}

impl SerializationEnvelope {
    /// Parses a stored value as a serialization envelope.
    pub fn from_value(value: &Value) -> Option<Self> {
        if envelope_kind(value) != Some(EnvelopeKind::Serialization) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Serializes the envelope into its stored form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Encryption envelope payload. `data` is base64 ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    /// Envelope marker; always `true`.
    pub encrypted: bool,
    /// Base64 of the ciphertext.
    pub data: String,
}

impl EncryptionEnvelope {
    /// Parses a stored value as an encryption envelope.
    pub fn from_value(value: &Value) -> Option<Self> {
        if envelope_kind(value) != Some(EnvelopeKind::Encryption) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Serializes the envelope into its stored form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Returns `true` when a stored map is *any* engine artifact (an envelope
/// or the null marker) rather than application data.
pub fn is_engine_artifact(value: &Value) -> bool {
    envelope_kind(value).is_some() || is_null_marker(value)
}
