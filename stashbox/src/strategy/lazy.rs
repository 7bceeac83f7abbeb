//! Lazy, read-only views over chunked sequences.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use stashbox_backend::{SharedStore, Store};
use stashbox_core::envelope::ChunkManifest;

use super::StrategyError;

/// Chunks kept resident at once.
const DEFAULT_RESIDENT_CHUNKS: usize = 3;

#[derive(Debug, Default)]
struct ChunkLru {
    resident: HashMap<usize, Arc<Vec<Value>>>,
    order: VecDeque<usize>,
    capacity: usize,
}

impl ChunkLru {
    fn touch(&mut self, index: usize) {
        self.order.retain(|&i| i != index);
        self.order.push_back(index);
    }

    fn insert(&mut self, index: usize, chunk: Arc<Vec<Value>>) {
        self.resident.insert(index, chunk);
        self.touch(index);
        while self.resident.len() > self.capacity {
            if let Some(evict) = self.order.pop_front() {
                self.resident.remove(&evict);
            } else {
                break;
            }
        }
    }
}

/// A read-only, finite, restartable sequence backed by chunk keys loaded
/// on demand.
///
/// The view holds a small LRU of resident chunks (default 3) purely as a
/// memory optimization; the chunk manifest remains the owning reference.
/// Lazy sequences cover chunked *sequences*; chunked maps restore
/// eagerly.
pub struct LazySequence {
    store: SharedStore,
    manifest: ChunkManifest,
    lru: Mutex<ChunkLru>,
}

impl LazySequence {
    /// Creates a view over `manifest` with the default chunk LRU.
    pub(crate) fn new(store: SharedStore, manifest: ChunkManifest) -> Self {
        Self::with_capacity(store, manifest, DEFAULT_RESIDENT_CHUNKS)
    }

    /// Creates a view with a custom resident-chunk capacity.
    pub(crate) fn with_capacity(
        store: SharedStore,
        manifest: ChunkManifest,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            manifest,
            lru: Mutex::new(ChunkLru {
                capacity: capacity.max(1),
                ..ChunkLru::default()
            }),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.manifest.total_items
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.manifest.total_items == 0
    }

    /// Number of backing chunks.
    pub fn chunk_count(&self) -> usize {
        self.manifest.chunk_keys.len()
    }

    /// Elements per full chunk.
    fn stride(&self) -> usize {
        self.manifest
            .chunk_size
            .filter(|&size| size > 0)
            .unwrap_or_else(|| {
                self.manifest
                    .total_items
                    .div_ceil(self.manifest.chunk_keys.len().max(1))
                    .max(1)
            })
    }

    /// Element at `index`, loading its chunk if necessary.
    pub async fn get(&self, index: usize) -> Result<Option<Value>, StrategyError> {
        if index >= self.manifest.total_items {
            return Ok(None);
        }
        let stride = self.stride();
        let chunk = self.chunk(index / stride).await?;
        Ok(chunk.get(index % stride).cloned())
    }

    /// One backing chunk, from the LRU or the store.
    pub async fn chunk(&self, index: usize) -> Result<Arc<Vec<Value>>, StrategyError> {
        if let Some(resident) = {
            let mut lru = self.lru.lock().await;
            let hit = lru.resident.get(&index).cloned();
            if hit.is_some() {
                lru.touch(index);
            }
            hit
        } {
            return Ok(resident);
        }

        let key = self
            .manifest
            .chunk_keys
            .get(index)
            .ok_or(StrategyError::Miss)?;
        let chunk = match self.store.get(key).await? {
            Some(Value::Array(items)) => Arc::new(items),
            _ => return Err(StrategyError::Miss),
        };
        self.lru.lock().await.insert(index, chunk.clone());
        Ok(chunk)
    }

    /// Materializes the full sequence. The view stays reusable.
    pub async fn collect(&self) -> Result<Vec<Value>, StrategyError> {
        let mut items = Vec::with_capacity(self.manifest.total_items);
        for index in 0..self.chunk_count() {
            items.extend(self.chunk(index).await?.iter().cloned());
        }
        Ok(items)
    }
}

impl std::fmt::Debug for LazySequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySequence")
            .field("key", &self.manifest.original_key)
            .field("total_items", &self.manifest.total_items)
            .field("chunks", &self.manifest.chunk_keys.len())
            .finish()
    }
}
