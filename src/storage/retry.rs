//! Transaction and retry-with-backoff execution modes (spec.md §4.A).
//!
//! Grounded in the exponential-backoff idiom the teacher already uses for
//! HTTP retries (`infrastructure/claude/retry.rs`), generalized here to
//! SQL operation retries per `classify_sqlx_error`.

use std::future::Future;
use std::time::Duration;

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::domain::errors::{classify_sqlx_error, CoreError};

/// Retry policy (spec.md §4.A defaults: 3 retries, `base * 2^attempt`).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(100) }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

/// Run `op` inside a single transaction, committing on success and rolling
/// back on any error (spec.md §4.A "Transaction" mode).
pub async fn in_transaction<T, F, Fut>(pool: &SqlitePool, op: F) -> Result<T, CoreError>
where
    F: FnOnce(&mut Transaction<'_, Sqlite>) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut tx = pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;
    match op(&mut tx).await {
        Ok(value) => {
            tx.commit().await.map_err(|e| classify_sqlx_error(&e))?;
            Ok(value)
        }
        Err(err) => {
            // Rollback is best-effort: the transaction guard also rolls
            // back on drop if this fails.
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

/// Run `op` up to `policy.max_retries` times with exponential backoff
/// (spec.md §4.A "Retry" mode). Constraint violations are never retried.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
