//! Retry with exponential backoff and jitter.
//!
//! Delays grow as `base_delay * backoff_factor^(attempt-1)`, clamped to
//! `max_delay`. Jitter multiplies each delay by a uniform factor in
//! `[0.5, 1.0)` so synchronized callers fan out instead of retrying in
//! lockstep.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::CacheError;
use crate::utils::rand_simple;

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Retries after the first attempt; 3 means up to 4 calls total.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryStrategy {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.base_delay.is_zero() {
            return Err(CacheError::Config(
                "retry base_delay must be positive".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(CacheError::Config(
                "retry backoff_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff before the given attempt (1-based), without jitter.
    ///
    /// A factor of 1 degenerates to linear backoff (`base * attempt`)
    /// rather than a constant delay. The exponential branch clamps in
    /// float space so large attempt numbers saturate at `max_delay`
    /// instead of overflowing `Duration` arithmetic.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        if (self.backoff_factor - 1.0).abs() < f64::EPSILON {
            return self.base_delay.saturating_mul(attempt).min(self.max_delay);
        }
        let scaled =
            self.base_delay.as_secs_f64() * self.backoff_factor.powf(f64::from(attempt - 1));
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter {
            delay.mul_f64(0.5 + rand_simple() * 0.5)
        } else {
            delay
        }
    }
}

/// Result of a retried operation plus how much work it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Total calls made, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Drives operations through a [`RetryStrategy`].
pub struct RetryManager {
    strategy: RetryStrategy,
}

impl RetryManager {
    pub fn new(strategy: RetryStrategy) -> Result<Self, CacheError> {
        strategy.validate()?;
        Ok(RetryManager { strategy })
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Retry every failure up to the strategy's budget.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(None, |_, _| true, op).await
    }

    /// Retry with a per-call strategy override and a predicate deciding
    /// whether a given error on a given attempt is worth retrying.
    ///
    /// The closure receives the 1-based attempt number. Non-retryable
    /// errors return immediately with the attempts made so far.
    pub async fn execute_with<T, E, P, F, Fut>(
        &self,
        strategy: Option<&RetryStrategy>,
        should_retry: P,
        mut op: F,
    ) -> RetryOutcome<T, E>
    where
        P: Fn(&E, u32) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let strategy = strategy.unwrap_or(&self.strategy);
        let started = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    }
                }
                Err(e) => {
                    if attempt > strategy.max_retries || !should_retry(&e, attempt) {
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        };
                    }
                    let delay = strategy.jittered(strategy.delay_for(attempt));
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
