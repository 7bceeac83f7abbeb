//! Sidecar index: engine-owned bookkeeping stored under reserved keys.
//!
//! The engine layers its own tag, dependency, and manifest bookkeeping as
//! ordinary cache entries rather than assuming a tag-capable backend. Each
//! sub-index keeps an in-memory view that is lazy-loaded from the store on
//! first use in the process, buffers mutations, and persists after
//! [`FLUSH_THRESHOLD`] changes or on [`shutdown`](SidecarIndex::persist_all).
//!
//! The in-memory copy is a view, not the source of truth; the backend is
//! authoritative. Every sub-index has its own mutex, and no lock is held
//! across store I/O.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use stashbox_backend::{SharedStore, Store, StoreResult};
use stashbox_core::key::{
    ADAPTIVE_FREQ_KEY, CHUNK_MANIFESTS_KEY, DEPENDENCIES_KEY, MANAGED_KEYS_KEY, meta_key, tag_key,
};

/// Buffered changes per sub-index before an automatic persist.
pub const FLUSH_THRESHOLD: usize = 10;

/// In-memory bound of the access-frequency map (top entries by count).
pub const FREQ_CAP: usize = 500;

/// SWR/stampede metadata stored under `_sc_meta:<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwrMeta {
    /// When the current value was written.
    pub stored_at: DateTime<Utc>,
    /// When the entry was first created (survives refreshes).
    pub created_at: DateTime<Utc>,
    /// Freshness window in seconds, if the entry was written by an SWR op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fresh_ttl: Option<f64>,
}

impl SwrMeta {
    /// Age of the stored value.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Time since the entry was first created.
    pub fn lifetime(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Default)]
struct ManagedState {
    loaded: bool,
    keys: HashSet<String>,
    changes: usize,
}

#[derive(Debug, Default)]
struct TagState {
    /// Tag → member keys, for the tags loaded or written in this process.
    lists: HashMap<String, HashSet<String>>,
    loaded: HashSet<String>,
    /// Key → tags, rebuilt from loads and writes; lets `forget` clean
    /// every list the key participates in without scanning the backend.
    reverse: HashMap<String, HashSet<String>>,
    dirty: HashSet<String>,
    changes: usize,
}

#[derive(Debug, Default)]
struct DepState {
    loaded: bool,
    /// Child → parents.
    parents: HashMap<String, HashSet<String>>,
    changes: usize,
}

#[derive(Debug, Default)]
struct FreqState {
    loaded: bool,
    counts: HashMap<String, u64>,
    changes: usize,
}

#[derive(Debug, Default)]
struct ManifestState {
    loaded: bool,
    /// Parent key → chunk keys.
    chunks: HashMap<String, Vec<String>>,
    changes: usize,
}

/// The sidecar: managed-key set, tag index, dependency graph, access
/// frequency, chunk-manifest registry, and per-key SWR metadata.
pub struct SidecarIndex {
    store: SharedStore,
    managed: Mutex<ManagedState>,
    tags: Mutex<TagState>,
    deps: Mutex<DepState>,
    freq: Mutex<FreqState>,
    manifests: Mutex<ManifestState>,
}

impl SidecarIndex {
    /// Creates an index over `store` with nothing loaded yet.
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            managed: Mutex::new(ManagedState::default()),
            tags: Mutex::new(TagState::default()),
            deps: Mutex::new(DepState::default()),
            freq: Mutex::new(FreqState::default()),
            manifests: Mutex::new(ManifestState::default()),
        }
    }

    // ---- managed keys ----

    /// Marks `key` as written through the engine.
    pub async fn track(&self, key: &str) -> StoreResult<()> {
        self.ensure_managed().await?;
        let due = {
            let mut state = self.managed.lock().await;
            if state.keys.insert(key.to_owned()) {
                state.changes += 1;
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_managed().await?;
        }
        Ok(())
    }

    /// Removes `key` from the managed set.
    pub async fn untrack(&self, key: &str) -> StoreResult<()> {
        self.ensure_managed().await?;
        let due = {
            let mut state = self.managed.lock().await;
            if state.keys.remove(key) {
                state.changes += 1;
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_managed().await?;
        }
        Ok(())
    }

    /// Whether `key` was written through the engine.
    pub async fn is_managed(&self, key: &str) -> StoreResult<bool> {
        self.ensure_managed().await?;
        Ok(self.managed.lock().await.keys.contains(key))
    }

    /// Snapshot of every managed key.
    pub async fn managed_keys(&self) -> StoreResult<Vec<String>> {
        self.ensure_managed().await?;
        Ok(self.managed.lock().await.keys.iter().cloned().collect())
    }

    /// Number of managed keys.
    pub async fn managed_count(&self) -> StoreResult<usize> {
        self.ensure_managed().await?;
        Ok(self.managed.lock().await.keys.len())
    }

    /// Empties the managed set in memory and in the store.
    pub async fn clear_managed(&self) -> StoreResult<()> {
        {
            let mut state = self.managed.lock().await;
            state.keys.clear();
            state.loaded = true;
            state.changes = 0;
        }
        self.store.forget(MANAGED_KEYS_KEY).await?;
        Ok(())
    }

    /// Drops managed keys whose backend entry has expired.
    ///
    /// Returns the number of keys dropped.
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let keys = self.managed_keys().await?;
        let mut missing = Vec::new();
        for key in keys {
            if !self.store.has(&key).await? {
                missing.push(key);
            }
        }
        let dropped = missing.len();
        if dropped > 0 {
            {
                let mut state = self.managed.lock().await;
                for key in &missing {
                    state.keys.remove(key);
                }
                state.changes = 0;
            }
            self.persist_managed().await?;
        }
        Ok(dropped)
    }

    async fn ensure_managed(&self) -> StoreResult<()> {
        if self.managed.lock().await.loaded {
            return Ok(());
        }
        let stored = self.store.get(MANAGED_KEYS_KEY).await?;
        let mut state = self.managed.lock().await;
        if !state.loaded {
            if let Some(Value::Array(items)) = stored {
                state.keys = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
            }
            state.loaded = true;
        }
        Ok(())
    }

    async fn persist_managed(&self) -> StoreResult<()> {
        // An unloaded view has nothing newer than the backend.
        let snapshot: Option<Vec<String>> = {
            let mut state = self.managed.lock().await;
            state.changes = 0;
            state.loaded.then(|| state.keys.iter().cloned().collect())
        };
        match snapshot {
            Some(snapshot) => {
                self.store
                    .forever(MANAGED_KEYS_KEY, Value::from(snapshot))
                    .await
            }
            None => Ok(()),
        }
    }

    // ---- tag index ----

    /// Adds `key` to each tag's member list.
    pub async fn tag(&self, key: &str, tags: &[String]) -> StoreResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        for tag in tags {
            self.ensure_tag(tag).await?;
        }
        let due = {
            let mut guard = self.tags.lock().await;
            let state = &mut *guard;
            for tag in tags {
                if state.lists.entry(tag.clone()).or_default().insert(key.to_owned()) {
                    state.dirty.insert(tag.clone());
                    state.changes += 1;
                }
                state
                    .reverse
                    .entry(key.to_owned())
                    .or_default()
                    .insert(tag.clone());
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_tags().await?;
        }
        Ok(())
    }

    /// Member keys of `tag`.
    pub async fn tag_members(&self, tag: &str) -> StoreResult<Vec<String>> {
        self.ensure_tag(tag).await?;
        Ok(self
            .tags
            .lock()
            .await
            .lists
            .get(tag)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Drops a tag's list entirely, in memory and in the store.
    pub async fn remove_tag(&self, tag: &str) -> StoreResult<()> {
        {
            let mut state = self.tags.lock().await;
            if let Some(members) = state.lists.remove(tag) {
                for member in members {
                    if let Some(tags) = state.reverse.get_mut(&member) {
                        tags.remove(tag);
                    }
                }
            }
            state.loaded.insert(tag.to_owned());
            state.dirty.remove(tag);
        }
        self.store.forget(&tag_key(tag)).await?;
        Ok(())
    }

    /// Removes `key` from every tag list it participates in.
    pub async fn untag(&self, key: &str) -> StoreResult<()> {
        let due = {
            let mut guard = self.tags.lock().await;
            let state = &mut *guard;
            let tags = state.reverse.remove(key).unwrap_or_default();
            for tag in tags {
                if let Some(members) = state.lists.get_mut(&tag)
                    && members.remove(key)
                {
                    state.dirty.insert(tag);
                    state.changes += 1;
                }
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_tags().await?;
        }
        Ok(())
    }

    /// Number of tags with a loaded member list.
    pub async fn tag_count(&self) -> usize {
        self.tags.lock().await.lists.len()
    }

    async fn ensure_tag(&self, tag: &str) -> StoreResult<()> {
        if self.tags.lock().await.loaded.contains(tag) {
            return Ok(());
        }
        let stored = self.store.get(&tag_key(tag)).await?;
        let mut state = self.tags.lock().await;
        if !state.loaded.contains(tag) {
            if let Some(Value::Array(items)) = stored {
                let members: HashSet<String> = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
                for member in &members {
                    state
                        .reverse
                        .entry(member.clone())
                        .or_default()
                        .insert(tag.to_owned());
                }
                state.lists.insert(tag.to_owned(), members);
            }
            state.loaded.insert(tag.to_owned());
        }
        Ok(())
    }

    async fn persist_tags(&self) -> StoreResult<()> {
        let snapshot: Vec<(String, Option<Vec<String>>)> = {
            let mut state = self.tags.lock().await;
            state.changes = 0;
            let dirty: Vec<String> = state.dirty.drain().collect();
            dirty
                .into_iter()
                .map(|tag| {
                    let members = state
                        .lists
                        .get(&tag)
                        .filter(|m| !m.is_empty())
                        .map(|m| m.iter().cloned().collect());
                    (tag, members)
                })
                .collect()
        };
        for (tag, members) in snapshot {
            match members {
                Some(members) => {
                    self.store
                        .forever(&tag_key(&tag), Value::from(members))
                        .await?;
                }
                None => {
                    self.store.forget(&tag_key(&tag)).await?;
                }
            }
        }
        Ok(())
    }

    // ---- dependency graph ----

    /// Records that invalidating `parent` must invalidate `child` first.
    pub async fn add_dependency(&self, child: &str, parent: &str) -> StoreResult<()> {
        self.ensure_deps().await?;
        let due = {
            let mut state = self.deps.lock().await;
            if state
                .parents
                .entry(child.to_owned())
                .or_default()
                .insert(parent.to_owned())
            {
                state.changes += 1;
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_deps().await?;
        }
        Ok(())
    }

    /// Keys that list `key` as a parent.
    pub async fn dependents_of(&self, key: &str) -> StoreResult<Vec<String>> {
        self.ensure_deps().await?;
        let state = self.deps.lock().await;
        Ok(state
            .parents
            .iter()
            .filter(|(_, parents)| parents.contains(key))
            .map(|(child, _)| child.clone())
            .collect())
    }

    /// Removes every edge `key` participates in (its own entry and its
    /// occurrences in other keys' parent sets).
    pub async fn remove_dependencies(&self, key: &str) -> StoreResult<()> {
        self.ensure_deps().await?;
        let due = {
            let mut state = self.deps.lock().await;
            let mut touched = state.parents.remove(key).is_some();
            for parents in state.parents.values_mut() {
                touched |= parents.remove(key);
            }
            state.parents.retain(|_, parents| !parents.is_empty());
            if touched {
                state.changes += 1;
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_deps().await?;
        }
        Ok(())
    }

    async fn ensure_deps(&self) -> StoreResult<()> {
        if self.deps.lock().await.loaded {
            return Ok(());
        }
        let stored = self.store.get(DEPENDENCIES_KEY).await?;
        let mut state = self.deps.lock().await;
        if !state.loaded {
            if let Some(Value::Object(entries)) = stored {
                for (child, parents) in entries {
                    if let Value::Array(parents) = parents {
                        state.parents.insert(
                            child,
                            parents
                                .into_iter()
                                .filter_map(|v| v.as_str().map(str::to_owned))
                                .collect(),
                        );
                    }
                }
            }
            state.loaded = true;
        }
        Ok(())
    }

    async fn persist_deps(&self) -> StoreResult<()> {
        let snapshot: Option<serde_json::Map<String, Value>> = {
            let mut state = self.deps.lock().await;
            state.changes = 0;
            state.loaded.then(|| {
                state
                    .parents
                    .iter()
                    .map(|(child, parents)| {
                        let parents: Vec<String> = parents.iter().cloned().collect();
                        (child.clone(), Value::from(parents))
                    })
                    .collect()
            })
        };
        match snapshot {
            Some(snapshot) => {
                self.store
                    .forever(DEPENDENCIES_KEY, Value::Object(snapshot))
                    .await
            }
            None => Ok(()),
        }
    }

    // ---- access frequency ----

    /// Increments the hit count of `key`, returning the new count.
    pub async fn bump_frequency(&self, key: &str) -> StoreResult<u64> {
        self.ensure_freq().await?;
        let (count, due) = {
            let mut state = self.freq.lock().await;
            let count = state.counts.entry(key.to_owned()).or_insert(0);
            *count += 1;
            let count = *count;
            state.changes += 1;
            if state.counts.len() > FREQ_CAP {
                Self::trim_freq(&mut state.counts);
            }
            (count, state.changes >= FLUSH_THRESHOLD)
        };
        if due {
            self.persist_freq().await?;
        }
        Ok(count)
    }

    /// Current hit count of `key`.
    pub async fn frequency(&self, key: &str) -> StoreResult<u64> {
        self.ensure_freq().await?;
        Ok(self.freq.lock().await.counts.get(key).copied().unwrap_or(0))
    }

    fn trim_freq(counts: &mut HashMap<String, u64>) {
        // Keep the top FREQ_CAP entries by count.
        let mut entries: Vec<(String, u64)> = counts.drain().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(FREQ_CAP);
        counts.extend(entries);
    }

    async fn ensure_freq(&self) -> StoreResult<()> {
        if self.freq.lock().await.loaded {
            return Ok(());
        }
        let stored = self.store.get(ADAPTIVE_FREQ_KEY).await?;
        let mut state = self.freq.lock().await;
        if !state.loaded {
            if let Some(Value::Object(entries)) = stored {
                state.counts = entries
                    .into_iter()
                    .filter_map(|(key, count)| count.as_u64().map(|count| (key, count)))
                    .collect();
            }
            state.loaded = true;
        }
        Ok(())
    }

    async fn persist_freq(&self) -> StoreResult<()> {
        let snapshot: Option<serde_json::Map<String, Value>> = {
            let mut state = self.freq.lock().await;
            state.changes = 0;
            state.loaded.then(|| {
                state
                    .counts
                    .iter()
                    .map(|(key, count)| (key.clone(), Value::from(*count)))
                    .collect()
            })
        };
        match snapshot {
            Some(snapshot) => {
                self.store
                    .forever(ADAPTIVE_FREQ_KEY, Value::Object(snapshot))
                    .await
            }
            None => Ok(()),
        }
    }

    // ---- chunk-manifest registry ----

    /// Registers the chunk keys owned by `parent`.
    pub async fn record_manifest(&self, parent: &str, chunk_keys: Vec<String>) -> StoreResult<()> {
        self.ensure_manifests().await?;
        let due = {
            let mut state = self.manifests.lock().await;
            state.chunks.insert(parent.to_owned(), chunk_keys);
            state.changes += 1;
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_manifests().await?;
        }
        Ok(())
    }

    /// Chunk keys registered for `parent`, if any.
    pub async fn manifest_chunks(&self, parent: &str) -> StoreResult<Option<Vec<String>>> {
        self.ensure_manifests().await?;
        Ok(self.manifests.lock().await.chunks.get(parent).cloned())
    }

    /// Unregisters `parent`'s manifest.
    pub async fn remove_manifest(&self, parent: &str) -> StoreResult<()> {
        self.ensure_manifests().await?;
        let due = {
            let mut state = self.manifests.lock().await;
            if state.chunks.remove(parent).is_some() {
                state.changes += 1;
            }
            state.changes >= FLUSH_THRESHOLD
        };
        if due {
            self.persist_manifests().await?;
        }
        Ok(())
    }

    /// Snapshot of every registered manifest.
    pub async fn manifest_entries(&self) -> StoreResult<Vec<(String, Vec<String>)>> {
        self.ensure_manifests().await?;
        Ok(self
            .manifests
            .lock()
            .await
            .chunks
            .iter()
            .map(|(parent, chunks)| (parent.clone(), chunks.clone()))
            .collect())
    }

    async fn ensure_manifests(&self) -> StoreResult<()> {
        if self.manifests.lock().await.loaded {
            return Ok(());
        }
        let stored = self.store.get(CHUNK_MANIFESTS_KEY).await?;
        let mut state = self.manifests.lock().await;
        if !state.loaded {
            if let Some(Value::Object(entries)) = stored {
                for (parent, chunks) in entries {
                    if let Value::Array(chunks) = chunks {
                        state.chunks.insert(
                            parent,
                            chunks
                                .into_iter()
                                .filter_map(|v| v.as_str().map(str::to_owned))
                                .collect(),
                        );
                    }
                }
            }
            state.loaded = true;
        }
        Ok(())
    }

    async fn persist_manifests(&self) -> StoreResult<()> {
        let snapshot: Option<serde_json::Map<String, Value>> = {
            let mut state = self.manifests.lock().await;
            state.changes = 0;
            state.loaded.then(|| {
                state
                    .chunks
                    .iter()
                    .map(|(parent, chunks)| (parent.clone(), Value::from(chunks.clone())))
                    .collect()
            })
        };
        match snapshot {
            Some(snapshot) => {
                self.store
                    .forever(CHUNK_MANIFESTS_KEY, Value::Object(snapshot))
                    .await
            }
            None => Ok(()),
        }
    }

    // ---- SWR/stampede metadata (unbuffered per-key documents) ----

    /// Writes fresh metadata for `key`, resetting `created_at`.
    pub async fn record_meta(&self, key: &str, fresh_ttl: Option<Duration>) -> StoreResult<()> {
        let now = Utc::now();
        let meta = SwrMeta {
            stored_at: now,
            created_at: now,
            fresh_ttl: fresh_ttl.map(|ttl| ttl.as_secs_f64()),
        };
        self.put_meta(key, &meta).await
    }

    /// Marks `key` as just refreshed, preserving `created_at`.
    pub async fn touch_meta(&self, key: &str, fresh_ttl: Option<Duration>) -> StoreResult<()> {
        let now = Utc::now();
        let created_at = self.meta(key).await?.map_or(now, |meta| meta.created_at);
        let meta = SwrMeta {
            stored_at: now,
            created_at,
            fresh_ttl: fresh_ttl.map(|ttl| ttl.as_secs_f64()),
        };
        self.put_meta(key, &meta).await
    }

    /// Metadata for `key`, if any.
    pub async fn meta(&self, key: &str) -> StoreResult<Option<SwrMeta>> {
        let stored = self.store.get(&meta_key(key)).await?;
        Ok(stored.and_then(|value| serde_json::from_value(value).ok()))
    }

    /// Drops the metadata for `key`.
    pub async fn clear_meta(&self, key: &str) -> StoreResult<()> {
        self.store.forget(&meta_key(key)).await?;
        Ok(())
    }

    async fn put_meta(&self, key: &str, meta: &SwrMeta) -> StoreResult<()> {
        let value = serde_json::to_value(meta).unwrap_or(Value::Null);
        self.store.forever(&meta_key(key), value).await
    }

    // ---- lifecycle ----

    /// Persists every buffered sub-index. Called on engine shutdown.
    pub async fn persist_all(&self) -> StoreResult<()> {
        self.persist_managed().await?;
        self.persist_tags().await?;
        self.persist_deps().await?;
        self.persist_freq().await?;
        self.persist_manifests().await?;
        Ok(())
    }

    /// Forgets every in-memory view. Used after a backend flush, which
    /// wipes the persisted sidecar too.
    pub async fn reset(&self) {
        *self.managed.lock().await = ManagedState {
            loaded: true,
            ..ManagedState::default()
        };
        *self.tags.lock().await = TagState::default();
        *self.deps.lock().await = DepState {
            loaded: true,
            ..DepState::default()
        };
        *self.freq.lock().await = FreqState {
            loaded: true,
            ..FreqState::default()
        };
        *self.manifests.lock().await = ManifestState {
            loaded: true,
            ..ManifestState::default()
        };
    }
}

impl std::fmt::Debug for SidecarIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarIndex").finish_non_exhaustive()
    }
}
