//! Circuit breaker guarding calls to an unreliable dependency.
//!
//! Closed passes calls through and counts consecutive failures. At the
//! failure threshold the circuit opens and rejects calls without invoking
//! the operation. After the recovery timeout it admits a bounded number of
//! probe calls (half-open); enough successes close it, any failure reopens
//! it and restarts the timeout.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::BreakerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub recovery_timeout: Duration,
    /// Probe calls admitted while half-open; this many successes close
    /// the circuit.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    half_open_successes: u32,
}

/// State transitions happen under a plain mutex held only across the
/// admission and outcome bookkeeping, never across the guarded call.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_calls: 0,
                half_open_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    /// Run the operation if the circuit admits it.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.before_call()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn before_call<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    tracing::info!("circuit half-open, probing");
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_calls = 1;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    let retry_in = self.config.recovery_timeout - elapsed;
                    Err(BreakerError::Open {
                        retry_in_ms: retry_in.as_millis() as u64,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Ok(())
                } else {
                    Err(BreakerError::Open { retry_in_ms: 0 })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    tracing::info!("circuit closed");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    inner.half_open_calls = 0;
                    inner.half_open_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                // One failed probe is enough to reopen.
                tracing::warn!("probe failed, circuit reopened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.failure_count = self.config.failure_threshold;
                inner.half_open_calls = 0;
                inner.half_open_successes = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Force the circuit back to closed, clearing all counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_calls = 0;
        inner.half_open_successes = 0;
    }
}
