//! SQLite-backed hierarchical configuration store.
//!
//! Rule documents are kept in a plain key/value table; a deployment syncs
//! them from its configuration source of record.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::DetectionResult;
use crate::domain::ports::ConfigStore;

#[derive(Clone)]
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write or replace one entry.
    pub async fn put(&self, key: &str, value: &str) -> DetectionResult<()> {
        sqlx::query(
            r"INSERT INTO config_entries (key, value, updated_at) VALUES (?, ?, ?)
              ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove one entry.
    pub async fn delete(&self, key: &str) -> DetectionResult<()> {
        sqlx::query("DELETE FROM config_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn get(&self, key: &str) -> DetectionResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn list_keys(&self, prefix: &str) -> DetectionResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM config_entries WHERE key LIKE ? || '%' ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
