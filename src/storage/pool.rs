//! Embedded SQL connection pool (spec.md §4.A).
//!
//! Grounded in the teacher's `adapters/sqlite/connection.rs`: `SqlitePool`
//! configured with WAL, a bounded FIFO acquire queue, and a fixed pool size.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create pool: {0}")]
    Creation(#[source] sqlx::Error),
    #[error("invalid database URL: {0}")]
    InvalidUrl(String),
    #[error("failed to create database directory: {0}")]
    DirectoryCreation(#[source] std::io::Error),
}

/// Pool sizing and acquire-timeout configuration (spec.md §4.A defaults:
/// 5 connections, 5s acquire timeout).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Create the production connection pool with the startup PRAGMAs from
/// spec.md §4.A applied through `SqliteConnectOptions` (executed per new
/// connection, outside any transaction, as sqlx does at connect time).
pub async fn create_pool(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, PoolError> {
    let config = config.unwrap_or_default();
    ensure_database_directory(database_url)?;

    let connect_options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| PoolError::InvalidUrl(database_url.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .pragma("temp_store", "memory")
        .pragma("cache_size", "-65536"); // 64 MiB, negative = KiB

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(PoolError::Creation)
}

/// An in-memory pool for tests, capped at one connection since SQLite's
/// `:memory:` database is private per connection unless shared-cache is on.
pub async fn create_test_pool() -> Result<SqlitePool, PoolError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|_| PoolError::InvalidUrl("sqlite::memory:".to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .shared_cache(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(PoolError::Creation)
}

fn ensure_database_directory(database_url: &str) -> Result<(), PoolError> {
    let path = database_url
        .strip_prefix("sqlite:")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .unwrap_or(database_url);

    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(PoolError::DirectoryCreation)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = create_test_pool().await.expect("pool");
        assert!(!pool.is_closed());
        pool.close().await;
    }

    #[tokio::test]
    async fn foreign_keys_enabled() {
        let pool = create_test_pool().await.expect("pool");
        let (fk,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(fk, 1);
        pool.close().await;
    }
}
