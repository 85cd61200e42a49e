//! Exponential backoff for transient API errors: a parameterized retry
//! helper with a capped delay.

use std::future::Future;
use std::time::Duration;

/// Retry policy: up to `max_attempts` calls to `op`, doubling the delay
/// between attempts starting at `initial_backoff`, capped at `max_backoff`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the attempt numbered `attempt` (0-indexed,
    /// counting the attempt that just failed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self
            .initial_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        std::cmp::min(scaled, self.max_backoff)
    }
}

/// Run `op` up to `policy.max_attempts` times. `is_retryable` decides
/// whether a given error should be retried at all; non-retryable errors
/// return immediately on first failure.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    mut is_retryable: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                log::warn!(
                    "retry_with_backoff: attempt {} failed, retrying after {:?}",
                    attempt,
                    policy.backoff_for(attempt - 1)
                );
                tokio::time::sleep(policy.backoff_for(attempt - 1)).await;
            }
        }
    }
}
