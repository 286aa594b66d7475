//! One retry/backoff implementation shared by every remote call site.

use std::future::Future;
use std::time::Duration;

use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear(Duration),
    /// `base * 2^(attempt - 1)`
    Exponential(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// First wait after a rate-limit response; doubles per attempt.
    pub rate_limit_base: Duration,
    pub rate_limit_cap: Duration,
}

/// Final error of a retried operation and how many attempts were spent.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub error: ApiError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Whether `error` is worth another attempt under this policy.
    pub fn is_retryable(&self, error: &ApiError) -> bool {
        error.is_retryable()
    }

    pub fn is_rate_limited(&self, error: &ApiError) -> bool {
        error.is_rate_limited()
    }

    /// Wait before retry number `attempt` (1-based count of failures so far).
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        let attempt = attempt.max(1);
        if self.is_rate_limited(error) {
            let scaled = self
                .rate_limit_base
                .saturating_mul(1u32 << (attempt - 1).min(16));
            let hinted = match error {
                ApiError::RateLimited {
                    retry_after: Some(after),
                } => scaled.max(*after),
                _ => scaled,
            };
            return hinted.min(self.rate_limit_cap);
        }
        match self.backoff {
            Backoff::Linear(base) => base.saturating_mul(attempt),
            Backoff::Exponential(base) => base.saturating_mul(1u32 << (attempt - 1).min(16)),
        }
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.is_retryable(&error) || attempt >= self.max_attempts {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay_for(attempt, &error);
                    log::warn!(
                        "{what} failed (attempt {attempt}/{}): {error}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
