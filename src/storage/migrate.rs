//! Applies the embedded schema (spec.md §4.B) to a pool, tracking applied
//! versions in a `schema_migrations` table — mirrors the teacher's
//! `adapters/sqlite/migrations.rs` `Migrator::run_embedded_migrations`.

use sqlx::SqlitePool;
use thiserror::Error;

use crate::domain::schema::{migrations, Migration};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to execute migration {version} ({description}): {source}")]
    Execution {
        version: i64,
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to read schema version: {0}")]
    VersionCheck(#[source] sqlx::Error),
}

/// Apply every pending migration in order. Safe to call repeatedly — only
/// migrations newer than the current `schema_migrations` max version run.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize, MigrationError> {
    ensure_migrations_table(pool).await?;
    let current = current_version(pool).await?;

    let pending: Vec<Migration> = migrations().into_iter().filter(|m| m.version > current).collect();
    for migration in &pending {
        apply(pool, migration).await?;
    }
    Ok(pending.len())
}

/// The highest applied migration version, or 0 if none have run.
pub async fn current_version(pool: &SqlitePool) -> Result<i64, MigrationError> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(MigrationError::VersionCheck)?;
    Ok(row.0.unwrap_or(0))
}

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|source| MigrationError::Execution { version: 0, description: "schema_migrations", source })?;
    Ok(())
}

async fn apply(pool: &SqlitePool, migration: &Migration) -> Result<(), MigrationError> {
    let mut tx = pool.begin().await.map_err(|source| MigrationError::Execution {
        version: migration.version,
        description: migration.description,
        source,
    })?;

    for statement in migration.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::Execution {
                version: migration.version,
                description: migration.description,
                source,
            })?;
    }

    sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.description)
        .execute(&mut *tx)
        .await
        .map_err(|source| MigrationError::Execution {
            version: migration.version,
            description: migration.description,
            source,
        })?;

    tx.commit().await.map_err(|source| MigrationError::Execution {
        version: migration.version,
        description: migration.description,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::create_test_pool;

    #[tokio::test]
    async fn migrations_create_core_tables() {
        let pool = create_test_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrate");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query tables");
        let names: Vec<String> = tables.into_iter().map(|t| t.0).collect();

        for expected in ["agents", "tasks", "task_dependencies", "sessions", "session_checkpoints", "state_transitions"] {
            assert!(names.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = create_test_pool().await.expect("pool");
        let first = run_migrations(&pool).await.expect("migrate once");
        let second = run_migrations(&pool).await.expect("migrate twice");
        assert!(first > 0);
        assert_eq!(second, 0);
    }
}
