//! Bounded retry with exponential backoff for remote calls

use crate::provider::{RemoteError, RemoteResult};
use std::future::Future;
use std::time::Duration;

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Per-call timeout; a timed-out call counts as transient
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Run a remote call under the retry policy.
///
/// Transient errors and timeouts are retried up to `max_attempts` with
/// exponential backoff; terminal errors return immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut call: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1u32;

    loop {
        match tokio::time::timeout(config.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if err.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient remote error, retrying: {err}"
                );
            }
            Ok(Err(err)) => return Err(err),
            Err(_) if attempt < config.max_attempts => {
                tracing::warn!(
                    op = op_name,
                    attempt,
                    timeout_ms = config.call_timeout.as_millis() as u64,
                    "remote call timed out, retrying"
                );
            }
            Err(_) => {
                return Err(RemoteError::Transient(format!(
                    "{op_name} timed out after {} attempts",
                    config.max_attempts
                )));
            }
        }

        tokio::time::sleep(delay).await;
        delay = delay.mul_f64(config.backoff_multiplier).min(config.max_delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_config(), "create", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RemoteError::Transient("throttled".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = with_retry(&fast_config(), "create", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Terminal("permission denied".into())) }
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Terminal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = with_retry(&fast_config(), "update", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Transient("still throttled".into())) }
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
