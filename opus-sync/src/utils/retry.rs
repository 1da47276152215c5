//! Retry policy for external calls
//!
//! Implements exponential backoff with jitter for transient API failures. One policy
//! value is applied uniformly by the orchestrator to searches, feed fetches and
//! playlist mutations.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If transient error (network, rate limit, 5xx):
//!    a. If attempts < max_attempts: log WARN, backoff, retry
//!    b. Otherwise: log ERROR, return the last error
//! 4. If other error (auth, 4xx, parse): return immediately (no retry)
//!
//! **Backoff Strategy:**
//! - Delay before retry n: `base_delay * 2^(n-1)`, capped at `max_delay`
//! - Jitter: the delay is shortened by a random fraction up to `jitter`

use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Explicit retry/backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of the delay that may be randomly removed
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Policy without any sleeping, for tests and dry runs against fakes
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based)
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered delay before retry number `retry` (1-based)
    fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let cut = rand::thread_rng().gen_range(0.0..=jitter);
        nominal.mul_f64(1.0 - cut)
    }

    /// Run `operation`, retrying transient failures per this policy
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging (e.g., "catalog search", "playlist add")
    /// * `operation` - Closure producing a fresh future per attempt
    ///
    /// # Returns
    /// Result from the operation, or the last error after retries are exhausted
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start_time = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                tracing::debug!(operation = operation_name, attempt, "Retrying operation");
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !err.is_transient() {
                        // Non-transient error, fail immediately
                        return Err(err);
                    }

                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            error = %err,
                            "Operation failed: retries exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);

                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
