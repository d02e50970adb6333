//! Retry logic for transient database errors.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::DbError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fail immediately without retrying.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay for a given attempt number (0-indexed).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Determines whether an error is transient and worth retrying.
pub fn is_transient_error(error: &DbError) -> bool {
    match error {
        DbError::PoolExhausted => true,
        DbError::Connection(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("connection refused")
                || msg.contains("connection reset")
                || msg.contains("broken pipe")
                || msg.contains("temporarily unavailable")
        }
        DbError::Query(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("deadlock")
                || msg.contains("lock wait")
                || msg.contains("database is locked")
                || msg.contains("busy")
        }
        _ => false,
    }
}

/// Runs an operation, retrying on transient errors with exponential
/// backoff.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && is_transient_error(&err) => {
                let delay = config.calculate_delay(attempt);
                debug!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying transient database error"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 0 {
                    warn!(attempts = attempt + 1, error = %err, "Database operation failed after retries");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_classification() {
        assert!(is_transient_error(&DbError::PoolExhausted));
        assert!(is_transient_error(&DbError::Query(
            "database is locked".to_string()
        )));
        assert!(is_transient_error(&DbError::Connection(
            "connection refused".to_string()
        )));
        assert!(!is_transient_error(&DbError::Constraint(
            "UNIQUE constraint failed".to_string()
        )));
        assert!(!is_transient_error(&DbError::not_found("User", "x")));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result = with_retry(&config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DbError::PoolExhausted)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: Result<(), DbError> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::Constraint("duplicate".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_config() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig::no_retry();

        let result: Result<(), DbError> = with_retry(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::PoolExhausted) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
