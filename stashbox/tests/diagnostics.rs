//! Statistics, health checks, performance analysis, cost reports, and
//! event dispatch.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::json;

use stashbox::config::CacheConfig;
use stashbox::events::{CacheEvent, EventSink};
use stashbox::Cache;
use stashbox_memory::MemoryStore;

#[tokio::test]
async fn statistics_reflect_usage() {
    let cache = Cache::builder(MemoryStore::new()).build();
    cache.put("a", json!(1), None).await.unwrap();
    cache.put("b", json!(2), None).await.unwrap();
    cache.get("a").await.unwrap();
    cache.get("missing").await.unwrap();

    let stats = cache.get_statistics().await.unwrap();
    assert_eq!(stats.driver, "memory");
    assert_eq!(stats.managed_keys, 2);
    assert_eq!(stats.counters.hits, 1);
    assert_eq!(stats.counters.misses, 1);
    assert_eq!(stats.counters.writes, 2);
}

#[tokio::test]
async fn health_check_round_trips_a_probe() {
    let cache = Cache::builder(MemoryStore::new()).build();
    let report = cache.health_check().await.unwrap();
    assert!(report.healthy, "issues: {:?}", report.issues);
    assert_eq!(report.driver, "memory");
    assert!(report.probe_ms >= 0.0);
}

#[tokio::test]
async fn performance_metrics_aggregate_operations() {
    let cache = Cache::builder(MemoryStore::new()).build();
    for i in 0..5 {
        cache.put(&format!("k{i}"), json!(i), None).await.unwrap();
        cache.get(&format!("k{i}")).await.unwrap();
    }
    let metrics = cache.get_performance_metrics();
    assert_eq!(metrics["put"].count, 5);
    assert_eq!(metrics["get"].count, 5);
    assert!(metrics["get"].max_ms >= metrics["get"].min_ms);
    assert_eq!(metrics["get"].recent_ms.len(), 5);
}

#[tokio::test]
async fn analyze_performance_flags_low_hit_ratio() {
    let mut config = CacheConfig::default();
    config.warnings.hit_ratio_threshold = 0.9;
    let cache = Cache::builder(MemoryStore::new()).config(config).build();

    cache.put("a", json!(1), None).await.unwrap();
    cache.get("a").await.unwrap();
    for i in 0..9 {
        cache.get(&format!("missing{i}")).await.unwrap();
    }

    let report = cache.analyze_performance();
    let ratio = report.hit_ratio.unwrap();
    assert!(ratio < 0.2);
    assert!(
        report.warnings.iter().any(|w| w.contains("hit ratio")),
        "warnings: {:?}",
        report.warnings
    );
}

#[tokio::test]
async fn cost_reports_rank_by_value() {
    let cache = Cache::builder(MemoryStore::new()).build();

    cache
        .remember("cheap", None, || async { Ok(json!("small")) })
        .await
        .unwrap();
    cache
        .remember("dear", None, || async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(json!("large ".repeat(200)))
        })
        .await
        .unwrap();
    // Hits raise the dear key further.
    cache
        .remember("dear", None, || async { unreachable!() })
        .await
        .unwrap();

    let report = cache.get_cache_value_report().await;
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].key, "dear");
    assert!(report[0].score > report[1].score);

    let evictions = cache.suggest_evictions(1).await;
    assert_eq!(evictions[0].key, "cheap");

    let single = cache.cache_value("dear").await.unwrap().unwrap();
    assert!(single.record.cost_ms >= 80.0);
    assert_eq!(single.record.access_count, 1);
}

/// Sink double that records dispatched events.
#[derive(Default, Clone)]
struct CaptureSink {
    events: Arc<StdMutex<Vec<CacheEvent>>>,
}

impl EventSink for CaptureSink {
    fn dispatch(&self, event: CacheEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn events_dispatch_when_enabled() {
    let mut config = CacheConfig::default();
    config.events.enabled = true;
    let sink = CaptureSink::default();
    let cache = Cache::builder(MemoryStore::new())
        .config(config)
        .event_sink(sink.clone())
        .build();

    cache.put("k", json!(1), None).await.unwrap();
    cache.get("k").await.unwrap();
    cache.get("missing").await.unwrap();
    cache.forget("k").await.unwrap();

    let events = sink.events.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec!["key_written", "cache_hit", "cache_missed", "key_forgotten"]
    );
}

#[tokio::test]
async fn optimization_event_names_the_strategy() {
    let mut config = CacheConfig::default();
    config.events.enabled = true;
    let sink = CaptureSink::default();
    let cache = Cache::builder(MemoryStore::new())
        .config(config)
        .event_sink(sink.clone())
        .build();

    cache
        .put("big", json!("x".repeat(64 * 1024)), None)
        .await
        .unwrap();

    let events = sink.events.lock().unwrap();
    assert!(events.iter().any(|event| matches!(
        event,
        CacheEvent::OptimizationApplied { strategy: "compression", .. }
    )));
}

#[tokio::test]
async fn per_event_toggles_suppress_dispatch() {
    let mut config = CacheConfig::default();
    config.events.enabled = true;
    config.events.dispatch.insert("cache_missed".to_owned(), false);
    let sink = CaptureSink::default();
    let cache = Cache::builder(MemoryStore::new())
        .config(config)
        .event_sink(sink.clone())
        .build();

    cache.get("missing").await.unwrap();
    assert!(sink.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn events_are_silent_by_default() {
    let sink = CaptureSink::default();
    let cache = Cache::builder(MemoryStore::new())
        .event_sink(sink.clone())
        .build();
    cache.put("k", json!(1), None).await.unwrap();
    assert!(sink.events.lock().unwrap().is_empty());
}
