//! Observability surface: statistics, health checks, performance
//! analysis, and cost reports.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};

use crate::breaker::BreakerStats;
use crate::cost::ScoredRecord;
use crate::error::CacheError;
use crate::perf::{Counters, OpSnapshot};

use super::Cache;

/// Probe key used by [`Cache::health_check`].
const HEALTH_PROBE_KEY: &str = "_sc_health_probe";

/// Engine-level statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    /// Driver name of the bound backend.
    pub driver: String,
    /// Number of managed keys.
    pub managed_keys: usize,
    /// Number of tag lists loaded in this process.
    pub loaded_tags: usize,
    /// Hit/miss/write counters.
    pub counters: Counters,
    /// Circuit breaker snapshot.
    pub breaker: BreakerStats,
}

/// Result of a health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether the probe round-tripped and no issues were found.
    pub healthy: bool,
    /// Driver name of the bound backend.
    pub driver: String,
    /// Wall time of the write-read-delete probe, in milliseconds.
    pub probe_ms: f64,
    /// Number of managed keys at probe time.
    pub managed_keys: usize,
    /// Human-readable findings.
    pub issues: Vec<String>,
}

/// Output of [`Cache::analyze_performance`].
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// Hits over hits+misses, if any reads were recorded.
    pub hit_ratio: Option<f64>,
    /// Optimized writes over writes, if any writes were recorded.
    pub optimization_ratio: Option<f64>,
    /// Mean `put` duration in milliseconds, if any were recorded.
    pub avg_write_ms: Option<f64>,
    /// Threshold violations, in warning-per-line form.
    pub warnings: Vec<String>,
}

impl Cache {
    /// Engine statistics: sidecar sizes, counters, breaker state.
    pub async fn get_statistics(&self) -> Result<Statistics, CacheError> {
        Ok(Statistics {
            driver: self.driver().to_owned(),
            managed_keys: self.runtime.sidecar.managed_count().await?,
            loaded_tags: self.runtime.sidecar.tag_count().await,
            counters: self.runtime.perf.counters(),
            breaker: self.runtime.breaker.stats(),
        })
    }

    /// Probes the backend with a write-read-delete cycle and inspects
    /// engine state for anomalies.
    pub async fn health_check(&self) -> Result<HealthReport, CacheError> {
        let mut issues = Vec::new();
        let start = Instant::now();

        let probe = json!({"probe": true});
        let round_trip = async {
            self.runtime
                .store
                .put(
                    HEALTH_PROBE_KEY,
                    probe.clone(),
                    Some(std::time::Duration::from_secs(60)),
                )
                .await?;
            let read = self.runtime.store.get(HEALTH_PROBE_KEY).await?;
            self.runtime.store.forget(HEALTH_PROBE_KEY).await?;
            Ok::<_, stashbox_backend::StoreError>(read)
        };
        match round_trip.await {
            Ok(Some(read)) if read == probe => {}
            Ok(_) => issues.push("probe value did not round-trip".to_owned()),
            Err(error) => issues.push(format!("backend probe failed: {error}")),
        }
        let probe_ms = start.elapsed().as_secs_f64() * 1000.0;

        let breaker = self.runtime.breaker.stats();
        if breaker.state != crate::breaker::BreakerState::Closed {
            issues.push(format!("circuit breaker is {:?}", breaker.state));
        }

        let managed_keys = self.runtime.sidecar.managed_count().await?;
        Ok(HealthReport {
            healthy: issues.is_empty(),
            driver: self.driver().to_owned(),
            probe_ms,
            managed_keys,
            issues,
        })
    }

    /// Per-operation timing aggregates.
    pub fn get_performance_metrics(&self) -> BTreeMap<String, OpSnapshot> {
        self.runtime.perf.snapshot()
    }

    /// Compares recorded behavior against the configured warning
    /// thresholds.
    pub fn analyze_performance(&self) -> PerformanceReport {
        let warnings_config = &self.shared.config.warnings;
        let counters = self.runtime.perf.counters();
        let mut warnings = Vec::new();

        let reads = counters.hits + counters.misses;
        let hit_ratio = (reads > 0).then(|| counters.hits as f64 / reads as f64);
        if let Some(ratio) = hit_ratio
            && ratio < warnings_config.hit_ratio_threshold
        {
            warnings.push(format!(
                "hit ratio {ratio:.2} below threshold {:.2}",
                warnings_config.hit_ratio_threshold
            ));
        }

        let optimization_ratio =
            (counters.writes > 0).then(|| counters.optimized_writes as f64 / counters.writes as f64);
        if let Some(ratio) = optimization_ratio
            && ratio < warnings_config.optimization_ratio_threshold
        {
            warnings.push(format!(
                "optimization ratio {ratio:.2} below threshold {:.2}",
                warnings_config.optimization_ratio_threshold
            ));
        }

        let avg_write = self.runtime.perf.avg_of("put");
        if let Some(avg) = avg_write
            && avg > warnings_config.slow_write_threshold
        {
            warnings.push(format!(
                "average write {:.1}ms above threshold {:.1}ms",
                avg.as_secs_f64() * 1000.0,
                warnings_config.slow_write_threshold.as_secs_f64() * 1000.0
            ));
        }

        PerformanceReport {
            hit_ratio,
            optimization_ratio,
            avg_write_ms: avg_write.map(|avg| avg.as_secs_f64() * 1000.0),
            warnings,
        }
    }

    /// The scored cost record of one key, if tracked.
    pub async fn cache_value(&self, key: &str) -> Result<Option<ScoredRecord>, CacheError> {
        let prefixed = self.prefixed(key);
        Ok(self
            .runtime
            .cost
            .record(&prefixed)
            .await?
            .map(|record| ScoredRecord {
                key: prefixed,
                score: record.score(),
                record,
            }))
    }

    /// Every tracked cost record, scored and sorted highest-first.
    pub async fn get_cache_value_report(&self) -> Vec<ScoredRecord> {
        self.runtime.cost.value_report().await
    }

    /// The `n` lowest-scored keys: the engine's eviction suggestions.
    pub async fn suggest_evictions(&self, n: usize) -> Vec<ScoredRecord> {
        self.runtime.cost.suggest_evictions(n).await
    }

    /// Reads the stored form of `key`, bypassing every strategy and the
    /// null unwrap. Reads are not tracked in managed keys.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let prefixed = self.prefixed(key);
        Ok(self.runtime.store.get(&prefixed).await?)
    }
}
