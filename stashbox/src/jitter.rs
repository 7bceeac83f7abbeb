//! TTL jitter.
//!
//! Writing many keys with the same TTL makes them expire together and
//! turns the expiry into a miss storm. Multiplying each TTL by
//! `1 ± U(0..p)` spreads the expirations across a window proportional
//! to `p`.

use std::time::Duration;

use rand::Rng;

/// Multiplies `ttl` by `1 ± U(0..percent)`, floored at one second.
///
/// The result always lies in `[max(1s, ttl·(1−p)), ttl·(1+p)]`.
/// A non-positive `percent` returns the TTL unchanged.
pub fn apply_jitter(ttl: Duration, percent: f64) -> Duration {
    if percent <= 0.0 {
        return ttl.max(Duration::from_secs(1));
    }
    let percent = percent.min(1.0);
    let factor = 1.0 + rand::thread_rng().gen_range(-percent..=percent);
    let jittered = ttl.as_secs_f64() * factor;
    Duration::from_secs_f64(jittered.max(1.0))
}
