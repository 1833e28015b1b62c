//! Persistent key/value cache for entity-id resolution.
//!
//! Storage contract is deliberately small: [`CacheStore::get`],
//! [`CacheStore::set_with_ttl`], [`CacheStore::delete_by_key`] and
//! [`CacheStore::delete_by_prefix`]. Keys are namespaced per source with
//! [`source_prefix`] so a credential change can purge one source's rows.
//!
//! - [`SqliteCacheStore`] - survives restarts, used by the binary
//! - [`MemoryCacheStore`] - process-local, used by tests and one-shot runs

mod memory;
mod sqlite;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing database failed.
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A cached value could not be encoded or decoded.
    #[error("cache value for '{key}' is not valid JSON: {source}")]
    Serialization {
        /// Cache key involved.
        key: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Minimal TTL cache contract.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Returns the value for `key` unless missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Deletes one key. Deleting a missing key is not an error.
    async fn delete_by_key(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key starting with `prefix`, returning the count removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Returns the key prefix owned by a source (`"<source_id>:"`).
#[must_use]
pub fn source_prefix(source_id: &str) -> String {
    format!("{source_id}:")
}

/// Reads and decodes a JSON value.
///
/// # Errors
///
/// Returns [`CacheError`] when the backend fails or the value does not decode.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })
}

/// Encodes and stores a JSON value.
///
/// # Errors
///
/// Returns [`CacheError`] when encoding or the backend fails.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set_with_ttl(key, &raw, ttl).await
}
