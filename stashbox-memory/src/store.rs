//! In-memory store implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use serde_json::Value;
use smol_str::SmolStr;

use stashbox_backend::{Store, StoreResult};
use stashbox_core::value::{deadline_from_ttl, is_past};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        is_past(self.expires_at)
    }
}

/// Process-local in-memory store with per-entry expiry.
///
/// Cloning is cheap; clones share the same underlying map.
///
/// # Examples
///
/// ```
/// use stashbox_memory::MemoryStore;
///
/// let store = MemoryStore::new();
/// let fast = MemoryStore::with_driver("l1");
/// ```
#[derive(Clone, Debug)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    driver: SmolStr,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with the default `"memory"` driver name.
    pub fn new() -> Self {
        Self::with_driver("memory")
    }

    /// Creates an empty store with a custom driver name.
    ///
    /// The driver name is what per-driver strategy configuration
    /// (`drivers.<name>.*`) matches against.
    pub fn with_driver(driver: impl AsRef<str>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            driver: SmolStr::new(driver),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    /// Returns `true` when the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_live(&self, key: &str) -> Option<Entry> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // Lazy expiry: drop the entry on the read that observed it.
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        None
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.take_live(key).map(|entry| entry.value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: deadline_from_ttl(ttl),
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> StoreResult<bool> {
        match self.entries.remove(key) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.take_live(key).is_some())
    }

    async fn flush(&self) -> StoreResult<bool> {
        self.entries.clear();
        Ok(true)
    }

    async fn add(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<bool> {
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Entry {
                        value,
                        expires_at: deadline_from_ttl(ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value,
                    expires_at: deadline_from_ttl(ttl),
                });
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, by: i64) -> StoreResult<i64> {
        match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired() {
                    entry.value = Value::from(by);
                    entry.expires_at = None;
                    return Ok(by);
                }
                let current = entry.value.as_i64().unwrap_or(0);
                let next = current + by;
                entry.value = Value::from(next);
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::from(by),
                    expires_at: None,
                });
                Ok(by)
            }
        }
    }

    fn driver(&self) -> SmolStr {
        self.driver.clone()
    }
}
