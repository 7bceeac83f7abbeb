//! Engine-internal performance metrics.
//!
//! Per-operation timing aggregates plus hit/miss/write counters. The
//! recent-samples buffer is bounded, so derived numbers are approximate;
//! exact percentiles are out of scope. A snapshot is persisted to the
//! store every [`PERSIST_EVERY`] recorded operations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Operations between persisted snapshots.
pub const PERSIST_EVERY: u64 = 50;

#[derive(Debug, Default)]
struct OpStats {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
    recent: VecDeque<Duration>,
}

/// Serialized per-operation aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpSnapshot {
    /// Times the operation ran.
    pub count: u64,
    /// Total wall time, in milliseconds.
    pub total_ms: f64,
    /// Mean wall time, in milliseconds.
    pub avg_ms: f64,
    /// Fastest observation, in milliseconds.
    pub min_ms: f64,
    /// Slowest observation, in milliseconds.
    pub max_ms: f64,
    /// Most recent observations, oldest first, in milliseconds.
    pub recent_ms: Vec<f64>,
}

/// Counter totals consumed by `analyze_performance` and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct Counters {
    /// Reads that found a value.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Writes through the engine.
    pub writes: u64,
    /// Writes a strategy transformed.
    pub optimized_writes: u64,
}

/// Records operation timings and engine counters.
#[derive(Debug)]
pub struct PerfRecorder {
    enabled: bool,
    recent_limit: usize,
    ops: Mutex<HashMap<&'static str, OpStats>>,
    recorded: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    optimized_writes: AtomicU64,
}

impl PerfRecorder {
    /// Creates a recorder. A disabled recorder is a no-op.
    pub fn new(enabled: bool, recent_limit: usize) -> Self {
        Self {
            enabled,
            recent_limit,
            ops: Mutex::new(HashMap::new()),
            recorded: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            optimized_writes: AtomicU64::new(0),
        }
    }

    /// Whether timing collection is on.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Records one operation timing. Returns `true` when a snapshot is
    /// due for persistence.
    pub fn record(&self, op: &'static str, elapsed: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        {
            let mut ops = self.ops.lock().expect("perf lock poisoned");
            let stats = ops.entry(op).or_default();
            stats.count += 1;
            stats.total += elapsed;
            stats.min = Some(stats.min.map_or(elapsed, |min| min.min(elapsed)));
            stats.max = stats.max.max(elapsed);
            stats.recent.push_back(elapsed);
            while stats.recent.len() > self.recent_limit {
                stats.recent.pop_front();
            }
        }
        let recorded = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        recorded % PERSIST_EVERY == 0
    }

    /// Counts a read hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a read miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a write; `optimized` marks whether a strategy applied.
    pub fn record_write(&self, optimized: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if optimized {
            self.optimized_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counter totals.
    pub fn counters(&self) -> Counters {
        Counters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            optimized_writes: self.optimized_writes.load(Ordering::Relaxed),
        }
    }

    /// Per-operation aggregates, keyed by operation name.
    pub fn snapshot(&self) -> BTreeMap<String, OpSnapshot> {
        let ops = self.ops.lock().expect("perf lock poisoned");
        ops.iter()
            .map(|(op, stats)| {
                let count = stats.count.max(1);
                (
                    (*op).to_owned(),
                    OpSnapshot {
                        count: stats.count,
                        total_ms: as_ms(stats.total),
                        avg_ms: as_ms(stats.total) / count as f64,
                        min_ms: as_ms(stats.min.unwrap_or_default()),
                        max_ms: as_ms(stats.max),
                        recent_ms: stats.recent.iter().copied().map(as_ms).collect(),
                    },
                )
            })
            .collect()
    }

    /// Mean duration of one operation, if it ever ran.
    pub fn avg_of(&self, op: &str) -> Option<Duration> {
        let ops = self.ops.lock().expect("perf lock poisoned");
        let stats = ops.get(op)?;
        if stats.count == 0 {
            return None;
        }
        Some(stats.total / stats.count as u32)
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_track_min_max_and_recent() {
        let perf = PerfRecorder::new(true, 3);
        perf.record("get", Duration::from_millis(2));
        perf.record("get", Duration::from_millis(8));
        perf.record("get", Duration::from_millis(4));
        perf.record("get", Duration::from_millis(6));
        let snapshot = perf.snapshot();
        let get = &snapshot["get"];
        assert_eq!(get.count, 4);
        assert_eq!(get.min_ms, 2.0);
        assert_eq!(get.max_ms, 8.0);
        // Recent buffer keeps only the last three samples.
        assert_eq!(get.recent_ms, vec![8.0, 4.0, 6.0]);
    }

    #[test]
    fn persistence_is_due_every_fifty_records() {
        let perf = PerfRecorder::new(true, 100);
        let mut due = 0;
        for _ in 0..100 {
            if perf.record("put", Duration::from_micros(10)) {
                due += 1;
            }
        }
        assert_eq!(due, 2);
    }

    #[test]
    fn disabled_recorder_is_inert() {
        let perf = PerfRecorder::new(false, 100);
        assert!(!perf.record("get", Duration::from_millis(1)));
        assert!(perf.snapshot().is_empty());
    }
}
