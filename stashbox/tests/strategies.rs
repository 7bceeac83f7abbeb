//! Strategy chain behavior through the façade and at chain level.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use stashbox::config::{CacheConfig, CompressionMode};
use stashbox::sidecar::SidecarIndex;
use stashbox::strategy::{
    EncryptionError, Encryptor, Strategy, StrategyChain, StrategyContext, StrategyError,
};
use stashbox::{Cache, DriverLimitEstimator};
use stashbox_backend::SharedStore;
use stashbox_memory::MemoryStore;

/// XOR test encryptor with a key-id byte so a mismatched key is a
/// decrypt *failure*, not silent garbage.
struct XorEncryptor {
    key: u8,
}

impl Encryptor for XorEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut out = Vec::with_capacity(plaintext.len() + 1);
        out.push(self.key);
        out.extend(plaintext.iter().map(|b| b ^ self.key));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        match ciphertext.split_first() {
            Some((key_id, rest)) if *key_id == self.key => {
                Ok(rest.iter().map(|b| b ^ self.key).collect())
            }
            _ => Err(EncryptionError("key mismatch".into())),
        }
    }
}

fn compressible_string(len: usize) -> Value {
    Value::String("abcabcabc ".repeat(len / 10))
}

#[tokio::test]
async fn large_strings_are_compressed_and_restored() {
    let cache = Cache::builder(MemoryStore::new()).build();
    let original = compressible_string(64 * 1024);
    cache.put("report", original.clone(), None).await.unwrap();

    let raw = cache.get_raw("report").await.unwrap().unwrap();
    assert_eq!(raw["compressed"], json!(true));
    assert_eq!(raw["is_string"], json!(true));
    assert!(raw["compressed_size"].as_u64().unwrap() < raw["original_size"].as_u64().unwrap());

    assert_eq!(cache.get("report").await.unwrap(), Some(original));
}

#[tokio::test]
async fn small_values_stay_raw() {
    let cache = Cache::builder(MemoryStore::new()).build();
    cache.put("tiny", json!({"a": 1}), None).await.unwrap();
    assert_eq!(
        cache.get_raw("tiny").await.unwrap(),
        Some(json!({"a": 1}))
    );
}

#[tokio::test]
async fn adaptive_compression_picks_level_nine_for_compressible_data() {
    let mut config = CacheConfig::default();
    config.strategies.compression.mode = CompressionMode::Adaptive;
    let cache = Cache::builder(MemoryStore::new()).config(config).build();

    // A highly compressible 200 KiB string.
    let original = compressible_string(200 * 1024);
    cache.put("big", original.clone(), None).await.unwrap();

    let raw = cache.get_raw("big").await.unwrap().unwrap();
    assert_eq!(raw["adaptive"], json!(true));
    assert_eq!(raw["level"], json!(9));
    assert_eq!(cache.get("big").await.unwrap(), Some(original));
}

#[tokio::test]
async fn hot_keys_are_clamped_to_fast_compression() {
    let mut config = CacheConfig::default();
    config.strategies.compression.mode = CompressionMode::Adaptive;
    config.strategies.compression.adaptive.frequency_threshold = 3;
    let cache = Cache::builder(MemoryStore::new()).config(config).build();

    let original = compressible_string(200 * 1024);
    cache.put("hot", original.clone(), None).await.unwrap();
    // Every hit bumps the access frequency past the threshold.
    for _ in 0..5 {
        cache.get("hot").await.unwrap();
    }
    cache.put("hot", original, None).await.unwrap();

    let raw = cache.get_raw("hot").await.unwrap().unwrap();
    assert!(raw["level"].as_u64().unwrap() <= 3);
}

#[tokio::test]
async fn serialization_picks_json_for_integers_and_binary_for_floats() {
    let mut config = CacheConfig::default();
    config.strategies.compression.enabled = false;
    config.strategies.chunking.enabled = false;
    let cache = Cache::builder(MemoryStore::new()).config(config).build();

    let integers = json!((0..500).collect::<Vec<i64>>());
    cache.put("ints", integers.clone(), None).await.unwrap();
    let raw = cache.get_raw("ints").await.unwrap().unwrap();
    assert_eq!(raw["serialized"], json!(true));
    assert_eq!(raw["method"], json!("json"));
    assert_eq!(cache.get("ints").await.unwrap(), Some(integers));

    let floats = json!((0..500).map(|i| i as f64 + 0.5).collect::<Vec<f64>>());
    cache.put("floats", floats.clone(), None).await.unwrap();
    let raw = cache.get_raw("floats").await.unwrap().unwrap();
    assert_eq!(raw["method"], json!("binary"));
    assert_eq!(cache.get("floats").await.unwrap(), Some(floats));
}

#[tokio::test]
async fn allow_listed_keys_are_encrypted() {
    let mut config = CacheConfig::default();
    config.strategies.encryption.enabled = true;
    config.strategies.encryption.keys = vec!["secret".to_owned()];
    config.strategies.encryption.patterns = vec!["^vault_".to_owned()];
    let cache = Cache::builder(MemoryStore::new())
        .config(config)
        .encryptor(XorEncryptor { key: 0x5a })
        .build();

    cache.put("secret", json!({"pin": 1234}), None).await.unwrap();
    cache.put("vault_a", json!("hidden"), None).await.unwrap();
    cache.put("public", json!("visible"), None).await.unwrap();

    assert_eq!(
        cache.get_raw("secret").await.unwrap().unwrap()["encrypted"],
        json!(true)
    );
    assert_eq!(
        cache.get_raw("vault_a").await.unwrap().unwrap()["encrypted"],
        json!(true)
    );
    assert_eq!(
        cache.get_raw("public").await.unwrap(),
        Some(json!("visible"))
    );

    assert_eq!(
        cache.get("secret").await.unwrap(),
        Some(json!({"pin": 1234}))
    );
}

#[tokio::test]
async fn decrypt_failure_reads_as_miss() {
    let mut config = CacheConfig::default();
    config.strategies.encryption.enabled = true;
    config.strategies.encryption.keys = vec!["secret".to_owned()];

    let store = MemoryStore::new();
    let writer = Cache::builder(store.clone())
        .config(config.clone())
        .encryptor(XorEncryptor { key: 0x5a })
        .build();
    writer.put("secret", json!("classified"), None).await.unwrap();

    // Same backend, rotated key: the ciphertext is unreadable.
    let reader = Cache::builder(store)
        .config(config)
        .encryptor(XorEncryptor { key: 0x11 })
        .build();
    assert_eq!(reader.get("secret").await.unwrap(), None);
}

/// A strategy that always volunteers and always fails.
struct BrokenStrategy;

#[async_trait]
impl Strategy for BrokenStrategy {
    fn id(&self) -> &'static str {
        "broken"
    }

    fn should_apply(&self, _value: &Value, _ctx: &StrategyContext<'_>) -> bool {
        true
    }

    fn recognizes(&self, _value: &Value) -> bool {
        false
    }

    async fn optimize(
        &self,
        _value: &Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        Err(StrategyError::Failed("broken on purpose".into()))
    }

    async fn restore(
        &self,
        value: Value,
        _ctx: &StrategyContext<'_>,
    ) -> Result<Value, StrategyError> {
        Ok(value)
    }
}

fn chain_fixture() -> (SharedStore, SidecarIndex) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let sidecar = SidecarIndex::new(store.clone());
    (store, sidecar)
}

#[tokio::test]
async fn failing_strategy_falls_through_to_raw_when_fallback_enabled() {
    let config = CacheConfig::default();
    let (store, sidecar) = chain_fixture();
    let chain = StrategyChain::new(vec![Arc::new(BrokenStrategy)]);
    let ctx = StrategyContext {
        key: "k",
        ttl: Some(Duration::from_secs(60)),
        driver: "memory",
        store: store.as_ref(),
        config: &config,
        sidecar: &sidecar,
    };
    let (stored, applied) = chain.optimize(&json!("value"), &ctx).await.unwrap();
    assert_eq!(stored, json!("value"));
    assert_eq!(applied, None);
}

#[tokio::test]
async fn failing_strategy_propagates_when_fallback_disabled() {
    let mut config = CacheConfig::default();
    config.fallback.enabled = false;
    let (store, sidecar) = chain_fixture();
    let chain = StrategyChain::new(vec![Arc::new(BrokenStrategy)]);
    let ctx = StrategyContext {
        key: "k",
        ttl: None,
        driver: "memory",
        store: store.as_ref(),
        config: &config,
        sidecar: &sidecar,
    };
    assert!(chain.optimize(&json!("value"), &ctx).await.is_err());
}

#[tokio::test]
async fn first_match_wins_applies_exactly_one_strategy() {
    // A large integer list is eligible for compression, chunking, and
    // serialization; only compression (registered first) may run.
    let config = CacheConfig::default();
    let store: SharedStore = Arc::new(MemoryStore::new());
    let sidecar = SidecarIndex::new(store.clone());
    let chain = StrategyChain::from_config(
        &config,
        None,
        Arc::new(DriverLimitEstimator::default()),
    );
    let ctx = StrategyContext {
        key: "k",
        ttl: None,
        driver: "memory",
        store: store.as_ref(),
        config: &config,
        sidecar: &sidecar,
    };
    let value = json!((0..5000).collect::<Vec<i64>>());
    let (stored, applied) = chain.optimize(&value, &ctx).await.unwrap();
    assert_eq!(applied, Some("compression"));
    assert_eq!(stored["compressed"], json!(true));
    assert!(stored.get("chunked").is_none());

    // Envelope transparency: restore inverts optimize.
    let restored = chain.restore(stored, &ctx).await.unwrap();
    assert_eq!(restored, value);
}

#[tokio::test]
async fn per_driver_toggles_disable_compression() {
    let mut config = CacheConfig::default();
    config.drivers.insert(
        "memory".to_owned(),
        stashbox::config::DriverToggles {
            compression: false,
            chunking: false,
        },
    );
    config.strategies.serialization.enabled = false;
    let cache = Cache::builder(MemoryStore::new()).config(config).build();

    let original = compressible_string(64 * 1024);
    cache.put("k", original.clone(), None).await.unwrap();
    assert_eq!(cache.get_raw("k").await.unwrap(), Some(original));
}
