//! Cost-aware value scoring.
//!
//! Every key built through `remember` gets a record of what it cost to
//! regenerate and how it is being used. The score composes those signals
//! monotonically: expensive, popular, large, recently-touched values
//! score high; values nobody has asked for in a long time decay. The
//! engine surfaces the lowest-scored keys as eviction suggestions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use stashbox_backend::{SharedStore, Store, StoreResult};
use stashbox_core::key::cost_key;

/// Bound of the in-memory record view. The backend keeps the rest until
/// their TTL; the view is a cache of the hottest records, not the source
/// of truth.
const VIEW_CAP: usize = 400;

/// Per-key regeneration-cost record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Wall time of the last producer run, in milliseconds.
    pub cost_ms: f64,
    /// Hits since the record was created.
    pub access_count: u64,
    /// Serialized size of the last produced value.
    pub size_bytes: u64,
    /// Time of the most recent hit.
    pub last_accessed: DateTime<Utc>,
    /// Time the record was created.
    pub created_at: DateTime<Utc>,
}

impl CostRecord {
    fn new(cost_ms: f64, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            cost_ms,
            access_count: 0,
            size_bytes,
            last_accessed: now,
            created_at: now,
        }
    }

    /// Composite value score.
    ///
    /// Monotone in each signal: higher cost, more accesses, and larger
    /// size raise it; recency raises it; age decays it.
    pub fn score(&self) -> f64 {
        let now = Utc::now();
        let idle_hours = (now - self.last_accessed).num_seconds().max(0) as f64 / 3600.0;
        let age_days = (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0;
        let base = (1.0 + self.cost_ms)
            * (1.0 + (self.access_count as f64).ln_1p())
            * (1.0 + (self.size_bytes as f64).ln_1p());
        let recency = 1.0 / (1.0 + idle_hours);
        base * (0.5 + recency) / (1.0 + 0.1 * age_days)
    }
}

/// A scored record as surfaced by reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    /// Fully-prefixed key.
    pub key: String,
    /// Composite score at report time.
    pub score: f64,
    /// The underlying record.
    #[serde(flatten)]
    pub record: CostRecord,
}

/// Tracks cost records in a bounded in-memory view backed by per-key
/// store documents (`_sc_cost:<key>`).
pub struct CostTracker {
    store: SharedStore,
    enabled: bool,
    view: Mutex<HashMap<String, CostRecord>>,
}

impl CostTracker {
    /// Creates a tracker over `store`.
    pub fn new(store: SharedStore, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            view: Mutex::new(HashMap::new()),
        }
    }

    /// Whether cost tracking is on.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Records a `remember` hit: bumps the access count and recency.
    pub async fn record_hit(&self, key: &str) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let updated = {
            let mut view = self.view.lock().await;
            match view.get_mut(key) {
                Some(record) => {
                    record.access_count += 1;
                    record.last_accessed = Utc::now();
                    Some(record.clone())
                }
                None => None,
            }
        };
        // Records not resident in the view are healed from the backend.
        let record = match updated {
            Some(record) => record,
            None => {
                let mut record = match self.load(key).await? {
                    Some(record) => record,
                    None => return Ok(()),
                };
                record.access_count += 1;
                record.last_accessed = Utc::now();
                self.install(key, record.clone()).await;
                record
            }
        };
        self.persist(key, &record).await
    }

    /// Records a `remember` miss: the measured producer wall time and the
    /// size of the produced value.
    pub async fn record_build(&self, key: &str, cost_ms: f64, size_bytes: u64) -> StoreResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let record = {
            let mut view = self.view.lock().await;
            let record = match view.get_mut(key) {
                Some(existing) => {
                    existing.cost_ms = cost_ms;
                    existing.size_bytes = size_bytes;
                    existing.clone()
                }
                None => {
                    let record = CostRecord::new(cost_ms, size_bytes);
                    view.insert(key.to_owned(), record.clone());
                    record
                }
            };
            Self::enforce_cap(&mut view);
            record
        };
        self.persist(key, &record).await
    }

    /// The record for `key`, from the view or the backend.
    pub async fn record(&self, key: &str) -> StoreResult<Option<CostRecord>> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(record) = self.view.lock().await.get(key) {
            return Ok(Some(record.clone()));
        }
        let loaded = self.load(key).await?;
        if let Some(record) = &loaded {
            self.install(key, record.clone()).await;
        }
        Ok(loaded)
    }

    /// Recent rebuild cost for `key`, used as the XFetch delta.
    pub async fn cost_for(&self, key: &str) -> StoreResult<Option<std::time::Duration>> {
        Ok(self
            .record(key)
            .await?
            .map(|r| std::time::Duration::from_secs_f64((r.cost_ms / 1000.0).max(0.0))))
    }

    /// Drops the record for `key`.
    pub async fn forget(&self, key: &str) -> StoreResult<()> {
        self.view.lock().await.remove(key);
        self.store.forget(&cost_key(key)).await?;
        Ok(())
    }

    /// All resident records scored and sorted highest-first.
    pub async fn value_report(&self) -> Vec<ScoredRecord> {
        let view = self.view.lock().await;
        let mut report: Vec<ScoredRecord> = view
            .iter()
            .map(|(key, record)| ScoredRecord {
                key: key.clone(),
                score: record.score(),
                record: record.clone(),
            })
            .collect();
        report.sort_by(|a, b| b.score.total_cmp(&a.score));
        report
    }

    /// The `n` lowest-scored keys: candidates for eviction.
    pub async fn suggest_evictions(&self, n: usize) -> Vec<ScoredRecord> {
        let mut report = self.value_report().await;
        report.reverse();
        report.truncate(n);
        report
    }

    /// Clears the in-memory view (backend records keep their TTL).
    pub async fn reset(&self) {
        self.view.lock().await.clear();
    }

    async fn install(&self, key: &str, record: CostRecord) {
        let mut view = self.view.lock().await;
        view.insert(key.to_owned(), record);
        Self::enforce_cap(&mut view);
    }

    fn enforce_cap(view: &mut HashMap<String, CostRecord>) {
        while view.len() > VIEW_CAP {
            // Evict the least-accessed resident record from memory only.
            if let Some(coldest) = view
                .iter()
                .min_by_key(|(_, r)| r.access_count)
                .map(|(k, _)| k.clone())
            {
                view.remove(&coldest);
            } else {
                break;
            }
        }
    }

    async fn load(&self, key: &str) -> StoreResult<Option<CostRecord>> {
        let stored = self.store.get(&cost_key(key)).await?;
        Ok(stored.and_then(|value| serde_json::from_value(value).ok()))
    }

    async fn persist(&self, key: &str, record: &CostRecord) -> StoreResult<()> {
        let value = serde_json::to_value(record).unwrap_or(Value::Null);
        self.store.forever(&cost_key(key), value).await
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
