//! SQLite cache backend; survives process restarts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{CacheError, CacheStore};
use crate::clock::{Clock, unix_secs};
use crate::db::Database;

/// [`CacheStore`] persisted in the `cache_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    /// Creates a store over an opened database.
    #[must_use]
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Deletes every expired row, returning the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn prune_expired(&self) -> Result<u64, CacheError> {
        let now = unix_secs(self.clock.now());
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(self.db.pool())
            .await?;
        debug!(removed = result.rows_affected(), "pruned expired cache rows");
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = unix_secs(self.clock.now());
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(now)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = unix_secs(self.clock.now() + ttl);
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        // substr avoids LIKE wildcard escaping for ids containing '%' or '_'.
        #[allow(clippy::cast_possible_wrap)]
        let prefix_len = prefix.chars().count() as i64;
        let result = sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, ?) = ?")
            .bind(prefix_len)
            .bind(prefix)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
