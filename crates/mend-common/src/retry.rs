//! Retry policy with exponential backoff and jitter

use crate::classify::{classify_error, ErrorContext};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Floor applied to every computed delay
const MIN_DELAY: Duration = Duration::from_millis(100);

/// Retry strategy attached to a retryable classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryStrategy {
    pub max_retries: u32,
    /// Base backoff in seconds; delay for attempt 1 with zero jitter
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Symmetric jitter fraction applied to each delay
    pub jitter_factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy {
            max_retries: 3,
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

impl RetryStrategy {
    /// Delay before the given 1-based attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        compute_backoff(attempt, self.backoff_factor, self.max_delay, self.jitter_factor)
    }
}

/// `backoff_factor * 2^(attempt-1) * (1 + U(-jitter, +jitter))`,
/// clamped to `[100ms, max_delay]`
pub fn compute_backoff(
    attempt: u32,
    backoff_factor: f64,
    max_delay: Duration,
    jitter_factor: f64,
) -> Duration {
    let attempt = attempt.max(1);
    let base = backoff_factor * 2f64.powi(attempt as i32 - 1);
    let jitter = if jitter_factor > 0.0 {
        rand::thread_rng().gen_range(-jitter_factor..=jitter_factor)
    } else {
        0.0
    };
    // Cap in float space first: large attempts overflow Duration otherwise
    let secs = (base * (1.0 + jitter)).clamp(0.0, max_delay.as_secs_f64());
    Duration::from_secs_f64(secs).clamp(MIN_DELAY, max_delay)
}

/// Bound an operation by a deadline. Cancellation is cooperative: the
/// future is dropped at the deadline and the caller gets a timeout error;
/// any healing execution left behind is reconciled by the orphan sweep.
pub async fn with_deadline<F, T>(operation_name: &str, deadline: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{operation_name} exceeded its {}s deadline",
            deadline.as_secs()
        ))),
    }
}

/// Runs an async operation under a retry strategy, reclassifying each
/// failure. Non-retryable classifications stop the loop immediately.
pub struct RetryExecutor {
    strategy: RetryStrategy,
    operation_name: String,
    max_retry_attempts: u32,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy, operation_name: impl Into<String>) -> Self {
        let max_retry_attempts = strategy.max_retries;
        RetryExecutor {
            strategy,
            operation_name: operation_name.into(),
            max_retry_attempts,
        }
    }

    /// Execute the operation, retrying while its failures classify as
    /// retryable and attempts remain
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(
                operation = %self.operation_name,
                attempt,
                max = self.strategy.max_retries + 1,
                "executing"
            );

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = %self.operation_name,
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let context = ErrorContext::new(self.max_retry_attempts)
                        .with_retry_count(attempt - 1);
                    let classification = classify_error(&error, &context);
                    if !classification.retryable || attempt > self.strategy.max_retries {
                        warn!(
                            operation = %self.operation_name,
                            attempt,
                            category = ?classification.category,
                            "giving up: {error}"
                        );
                        return Err(error);
                    }
                    let delay = self.strategy.delay(attempt);
                    warn!(
                        operation = %self.operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after failure: {error}"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
