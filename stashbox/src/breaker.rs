//! Circuit breaker around backend calls.
//!
//! The breaker is per-engine, not per-key. It watches store failures and
//! short-circuits calls while the backend is considered down:
//!
//! - **closed** — calls pass through; consecutive failures are counted.
//! - **open** — entered after `failure_threshold` failures; calls are not
//!   attempted and the fallback is returned until `recovery_timeout`
//!   elapses.
//! - **half-open** — probe calls pass through; `success_threshold`
//!   consecutive successes close the breaker, any failure reopens it.

use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use stashbox_backend::StoreError;

use crate::config::CircuitBreakerConfig;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are short-circuited to the fallback.
    Open,
    /// Probe calls decide whether to close or reopen.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Observability snapshot of the breaker.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerStats {
    /// Current position.
    pub state: BreakerState,
    /// Consecutive failures observed in the current closed period, or the
    /// total that opened the breaker.
    pub failure_count: u32,
    /// Consecutive half-open successes.
    pub success_count: u32,
    /// Seconds since the last failure, if any.
    pub last_failure_secs: Option<u64>,
}

/// Closed/open/half-open state machine with fallback execution.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Runs `op` unless the breaker is open, returning `fallback` when the
    /// breaker short-circuits or `op` fails.
    ///
    /// The breaker lock is never held across `op`.
    pub async fn execute_with_fallback<T, F, Fut>(&self, op: F, fallback: T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if !self.preflight() {
            return fallback;
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(error) => {
                tracing::warn!(%error, "backend call failed inside circuit breaker");
                self.record_failure();
                fallback
            }
        }
    }

    /// Whether a call may be attempted right now. Moves an open breaker to
    /// half-open once the recovery timeout has elapsed.
    pub fn preflight(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let recovered = inner
                    .last_failure_at
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful backend call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                // Intervening success resets the consecutive-failure count.
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed backend call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Current position, resolving an elapsed recovery timeout.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state
    }

    /// Observability snapshot.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_secs: inner.last_failure_at.map(|at| at.elapsed().as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(failures: u32, recovery: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: failures,
            recovery_timeout: recovery,
            success_threshold: successes,
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(3, Duration::from_secs(60), 2);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.preflight());
    }

    #[test]
    fn intervening_success_resets_the_count() {
        let breaker = breaker(3, Duration::from_secs(60), 2);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(0), 2);
        breaker.record_failure();
        assert!(breaker.preflight());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_successes_close() {
        let breaker = breaker(1, Duration::from_millis(0), 2);
        breaker.record_failure();
        assert!(breaker.preflight());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn open_breaker_returns_fallback_without_calling_op() {
        let breaker = breaker(1, Duration::from_secs(60), 1);
        breaker.record_failure();
        let called = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute_with_fallback(
                || {
                    called.store(true, std::sync::atomic::Ordering::SeqCst);
                    async { Ok(1) }
                },
                42,
            )
            .await;
        assert_eq!(result, 42);
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
