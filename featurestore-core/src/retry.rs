//! Exponential backoff for retryable remote failures.
//!
//! ```text
//! attempt 1: immediate
//! attempt 2: initial_backoff
//! attempt 3: initial_backoff * multiplier
//! ...        capped at max_backoff
//! ```
//!
//! Only errors reporting [`crate::error::FeatureStoreError::is_retryable`] (throttling,
//! service unavailable, internal failures, timeouts) are retried. Validation,
//! not-found and conflict errors are returned immediately.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

/// No retries. Whether to retry ingestion is left to the caller.
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::from_millis(100), Duration::from_secs(10), 2.0)
    }

    /// `min(initial_backoff * multiplier^attempt, max_backoff)`, attempt is 0-indexed.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are used up. Returns the last error in the latter case.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= policy.max_retries => {
                if policy.max_retries > 0 {
                    warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "Giving up after exhausting retries"
                    );
                }
                return Err(err);
            }
            Err(err) => {
                let backoff = policy.backoff(attempt);
                debug!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
