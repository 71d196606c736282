use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            attempts: 3,
        }
    }
}

/// Run `f`, retrying retryable errors with exponential backoff.
///
/// Validation and rejection errors are returned immediately; only
/// network-kind failures burn attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base;
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                warn!(%op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, policy.cap);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
