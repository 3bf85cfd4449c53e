use crate::error::{ProbeError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Retry policy for external-service calls.
///
/// Uses exponential backoff: `initial_delay * 2^attempt`, capped at
/// `max_delay`. `max_attempts` includes the initial request, so 1 means
/// no retry.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Run `op` with bounded retry on retryable errors.
///
/// Configuration and parse errors propagate immediately; only
/// external-service failures and timeouts are retried.
pub async fn with_retry<T, Fut, F>(config: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(attempt, error = %err, "{what} failed, retrying in {delay:?}");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wrap a future with a deadline, converting elapse into a retryable
/// [`ProbeError::Timeout`].
pub async fn with_timeout<T, Fut>(after: Duration, what: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            what: what.to_string(),
            after,
        }),
    }
}
