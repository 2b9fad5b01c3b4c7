//! Retry for transient SQLite lock contention
//!
//! Parallel jobs share one database file. Writers that hit "database is
//! locked" back off exponentially until `ingest_database_max_lock_wait_ms`
//! has elapsed.

use scanport_common::{Error, Result};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// True for errors that a later attempt may not hit
pub fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let text = db_err.to_string();
            text.contains("database is locked") || text.contains("database table is locked")
        }
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails with a non-lock error, or
/// `max_wait_ms` elapses.
///
/// Backoff starts at 10ms and doubles up to 1s per attempt.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_duration {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts ({} ms elapsed, max {} ms)",
                operation_name,
                attempt,
                elapsed.as_millis(),
                max_wait_ms
            )));
        }

        let sleep_ms = backoff_ms.min(max_duration.saturating_sub(elapsed).as_millis() as u64 + 1);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = sleep_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let result = retry_on_lock("upsert_scan", 5000, || async { Ok::<i32, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_non_lock_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_lock("upsert_scan", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::Internal("constraint failed".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_internal_error_is_not_a_lock_error() {
        assert!(!is_lock_error(&Error::Internal("database is locked".to_string())));
    }

    #[tokio::test]
    async fn test_real_lock_is_retried_until_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = scanport_common::db::init_database(&dir.path().join("lock.db"))
            .await
            .unwrap();

        // Hold a write lock on one connection
        let mut holder = pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        });

        let result = retry_on_lock("settings write", 5000, || {
            let pool = pool.clone();
            async move {
                sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('k', 'v')")
                    .execute(&pool)
                    .await
                    .map_err(Error::Database)?;
                Ok(())
            }
        })
        .await;

        release.await.unwrap();
        assert!(result.is_ok(), "{:?}", result.err());
    }
}
