//! Bounded retry for transient storage contention.

use crate::config::StorageConfig;
use crate::error::StorageError;
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry policy for busy/locked storage operations.
///
/// Only errors for which [`StorageError::is_busy`] holds are retried;
/// anything else surfaces on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Build from storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_attempts: config.busy_retries.max(1),
            delay: Duration::from_millis(config.busy_retry_delay_ms),
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// # Errors
    ///
    /// The first non-busy error, or [`StorageError::RetriesExhausted`]
    /// wrapping the last busy error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_busy() => {
                    if attempt >= max_attempts {
                        tracing::error!("{} still busy after {} attempts", what, attempt);
                        return Err(StorageError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tracing::warn!(
                        "{} hit busy storage, retrying (attempt {}/{})",
                        what,
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
