//! Versioned schema migrations.
//!
//! Each migration runs once, inside its own transaction, and is recorded in
//! `schema_migrations`. Running the set again is a no-op.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_measurements",
        sql: r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            patient_id TEXT,
            exam_id TEXT,
            acquisition_time TEXT,
            measurement_name TEXT NOT NULL,
            measurement_code TEXT NOT NULL,
            result_index INTEGER NOT NULL,
            value REAL NOT NULL,
            UNIQUE(document_id, measurement_code, result_index)
        )
        "#,
    },
    Migration {
        version: 2,
        name: "index_measurements_document_id",
        sql: "CREATE INDEX IF NOT EXISTS idx_measurements_document_id ON measurements(document_id)",
    },
];

/// Opens the configured database and brings its schema up to date.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Applies every pending migration; returns how many ran.
pub async fn apply(pool: &SqlitePool) -> Result<usize> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        sqlx::query(migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("migration {} ({}) failed", migration.version, migration.name))?;
        sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version = migration.version, name = migration.name, "applied migration");
        applied += 1;
    }

    Ok(applied)
}

pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("m.sqlite")).await.unwrap();

        assert_eq!(apply(&pool).await.unwrap(), MIGRATIONS.len());
        assert_eq!(apply(&pool).await.unwrap(), 0);
        assert_eq!(
            schema_version(&pool).await.unwrap(),
            MIGRATIONS.last().unwrap().version
        );

        let has_table: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='measurements'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(has_table);
    }

    #[tokio::test]
    async fn test_unique_constraint_enforced() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("m.sqlite")).await.unwrap();
        apply(&pool).await.unwrap();

        let insert = "INSERT INTO measurements (document_id, provider, measurement_name, measurement_code, result_index, value) VALUES ('d', 'p', 'n', 'c', 0, 1.0)";
        sqlx::query(insert).execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }
}
