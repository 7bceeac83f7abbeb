//! Metrics declaration and initialization.

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "cache_hit_count",
            "Total number of cache hit events by driver."
        );
        "cache_hit_count"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "cache_miss_count",
            "Total number of cache miss events by driver."
        );
        "cache_miss_count"
    };
    /// Track number of stale values served by the SWR layer.
    pub static ref CACHE_STALE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "cache_stale_count",
            "Total number of stale cache values served by driver."
        );
        "cache_stale_count"
    };
    /// Track number of background refreshes started.
    pub static ref CACHE_REFRESH_COUNTER: &'static str = {
        metrics::describe_counter!(
            "cache_refresh_count",
            "Total number of background refreshes started by driver."
        );
        "cache_refresh_count"
    };
}

#[allow(unused_variables)]
pub(crate) fn record_hit(driver: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_HIT_COUNTER, "driver" => driver.to_string()).increment(1);
}

#[allow(unused_variables)]
pub(crate) fn record_miss(driver: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_MISS_COUNTER, "driver" => driver.to_string()).increment(1);
}

#[allow(unused_variables)]
pub(crate) fn record_stale(driver: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_STALE_COUNTER, "driver" => driver.to_string()).increment(1);
}

#[allow(unused_variables)]
pub(crate) fn record_refresh(driver: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*CACHE_REFRESH_COUNTER, "driver" => driver.to_string()).increment(1);
}
