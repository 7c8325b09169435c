//! Retry policy for collaborator reads
//!
//! One policy object is shared by every query executor. Mutations never
//! go through it.

use crate::error::{BillingError, BillingResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff with a retryable-error predicate
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    retryable: fn(&BillingError) -> bool,
}

impl RetryPolicy {
    /// Policy retrying errors for which [`BillingError::is_retryable`] holds
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retryable: BillingError::is_retryable,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the retryable-error predicate
    pub fn with_predicate(mut self, retryable: fn(&BillingError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `error` may be retried under this policy
    pub fn should_retry(&self, error: &BillingError) -> bool {
        !error.is_client_error() && (self.retryable)(error)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> BillingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BillingResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && self.should_retry(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}
