//! Exponential-backoff retry for remote calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionError;

/// Attempt ceiling and backoff schedule for a remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay applied after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds, fails permanently, or exhausts the attempt ceiling.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, CompletionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    if error.is_rate_limited() {
                        tracing::warn!(
                            call = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited; backing off"
                        );
                    } else {
                        tracing::warn!(
                            call = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Remote call failed; retrying"
                        );
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
