//! Encryption of allow-listed keys.
//!
//! The engine never implements cryptography itself; a caller-provided
//! [`Encryptor`] does the work. The strategy decides *which* keys get
//! encrypted (exact allow-list, regex patterns, or everything) and maps
//! decryption failures to cache misses so a rotated key degrades to a
//! rebuild instead of an error.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use stashbox_core::envelope::{EncryptionEnvelope, EnvelopeKind, envelope_kind};

use crate::config::CacheConfig;

use super::{Strategy, StrategyContext, StrategyError};

/// Error type for encryptor primitives.
#[derive(Debug, Error)]
#[error("encryption failed: {0}")]
pub struct EncryptionError(pub String);

/// Caller-provided encryption primitive.
pub trait Encryptor: Send + Sync {
    /// Encrypts plaintext bytes.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// Decrypts ciphertext bytes.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

/// Encrypts values whose key matches the configured allow-list.
pub struct EncryptionStrategy {
    encryptor: Arc<dyn Encryptor>,
    exact: HashSet<String>,
    patterns: Vec<Regex>,
}

impl EncryptionStrategy {
    /// Creates the strategy, compiling the allow-list from `config`.
    ///
    /// Invalid regex patterns are skipped with a warning.
    pub fn new(encryptor: Arc<dyn Encryptor>, config: &CacheConfig) -> Self {
        let section = &config.strategies.encryption;
        let patterns = section
            .patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    warn!(pattern, %error, "invalid encryption key pattern; skipping");
                    None
                }
            })
            .collect();
        Self {
            encryptor,
            exact: section.keys.iter().cloned().collect(),
            patterns,
        }
    }

    fn key_matches(&self, key: &str, ctx: &StrategyContext<'_>) -> bool {
        ctx.config.strategies.encryption.encrypt_all
            || self.exact.contains(key)
            || self.patterns.iter().any(|pattern| pattern.is_match(key))
    }
}

#[async_trait]
impl Strategy for EncryptionStrategy {
    fn id(&self) -> &'static str {
        "encryption"
    }

    fn should_apply(&self, _value: &Value, ctx: &StrategyContext<'_>) -> bool {
        ctx.config.strategies.encryption.enabled && self.key_matches(ctx.key, ctx)
    }

    fn recognizes(&self, value: &Value) -> bool {
        envelope_kind(value) == Some(EnvelopeKind::Encryption)
    }

    async fn optimize(
        &self,
        value: &Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let plaintext = serde_json::to_vec(value).map_err(StrategyError::failed)?;
        let ciphertext = self
            .encryptor
            .encrypt(&plaintext)
            .map_err(StrategyError::failed)?;
        Ok(EncryptionEnvelope {
            encrypted: true,
            data: BASE64.encode(ciphertext),
        }
        .into_value())
    }

    async fn restore(
        &self,
        value: Value,
        ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        let Some(envelope) = EncryptionEnvelope::from_value(&value) else {
            return Ok(value);
        };
        let ciphertext = BASE64
            .decode(envelope.data.as_bytes())
            .map_err(|_| StrategyError::Miss)?;
        let plaintext = match self.encryptor.decrypt(&ciphertext) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                // Undecryptable data is unreachable data.
                warn!(key = ctx.key, %error, "decrypt failed; treating as miss");
                return Err(StrategyError::Miss);
            }
        };
        serde_json::from_slice(&plaintext).map_err(StrategyError::failed)
    }
}

impl std::fmt::Debug for EncryptionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionStrategy")
            .field("exact", &self.exact.len())
            .field("patterns", &self.patterns.len())
            .finish_non_exhaustive()
    }
}
