//! Retry helpers for SQLite statements that can fail transiently
//!
//! The daemon, the scheduler and the session manager all write through the
//! same pool. Busy and locked errors are retried with exponential backoff
//! instead of surfacing to the caller.

use std::future::Future;
use std::time::Duration;

/// Maximum number of retry attempts for one statement
pub const MAX_RETRIES: u32 = 5;

/// SQLite result codes worth retrying: BUSY, LOCKED, BUSY_SNAPSHOT and the IOERR family
const TRANSIENT_CODES: &[&str] = &[
    "5", "6", "10", "266", "522", "1032", "2314", "3338", "4618", "5386", "5642",
];

/// Check if a SQLite error is transient and should be retried
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| TRANSIENT_CODES.iter().any(|c| code == *c))
            .unwrap_or(false),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// 100ms, 200ms, 400ms, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1)))
}

/// Run a write statement, retrying transient failures
pub async fn execute_with_retry<F, Fut>(operation: F) -> std::result::Result<(), sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<(), sqlx::Error>>,
{
    query_with_retry(operation).await
}

/// Run a query, retrying transient failures
pub async fn query_with_retry<F, Fut, T>(operation: F) -> std::result::Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_transient_error(&e) && attempts < MAX_RETRIES => {
                attempts += 1;
                let delay = backoff_delay(attempts);
                tracing::debug!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient database error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(2), Duration::from_millis(200));
        assert_eq!(backoff_delay(4), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: std::result::Result<(), sqlx::Error> = query_with_retry(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(sqlx::Error::RowNotFound)
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_timeout_is_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = query_with_retry(|| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
