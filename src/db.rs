//! SQLite connection pool.
//!
//! The database runs in WAL mode so the query server can read while workers
//! write. Writers that hit SQLite's single-writer lock wait up to the busy
//! timeout instead of failing immediately.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, DbConfig};

/// Opens the pool described by `[db]`, creating the file if needed.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    open(&config.db).await
}

/// Opens a pool at `db_path` with default pool settings.
pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    open(&DbConfig {
        path: db_path.to_path_buf(),
        ..DbConfig::default()
    })
    .await
}

async fn open(db: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = db.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(db.busy_timeout_ms));

    SqlitePoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db.path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_nested_directory_in_wal_mode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/store.sqlite");

        let pool = connect_path(&path).await.unwrap();
        assert!(path.exists());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_connect_uses_pool_settings() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.db.path = tmp.path().join("cfg.sqlite");
        config.db.max_connections = 2;

        let pool = connect(&config).await.unwrap();
        assert_eq!(pool.options().get_max_connections(), 2);
    }
}
