//! Title to source-internal id resolution with persistent caching.
//!
//! Sites key their listings by an internal id. The resolver maps a
//! caller-supplied title (plus optional year and country) onto that id:
//!
//! - the source's full title index is fetched at most once per TTL, kept in
//!   the [`CacheStore`] and mirrored in memory for lock-free reads
//! - lookups try [`key_variants`] with country, year and bare tiers
//! - a miss against an index older than `refresh_after` triggers exactly one
//!   forced refresh; a miss that survives it is cached negatively
//! - refreshes are serialized per source, and waiters reuse the result
//!
//! Movies are resolved through the source's search instead, one cached
//! answer per (title, year).
//!
//! Cache failures are logged and treated as misses; they never fail a lookup.

mod index;

pub use index::IdIndex;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, get_json, set_json, source_prefix};
use crate::clock::{Clock, from_unix_secs, unix_secs};
use crate::normalizer::{key_variants, sanitize};
use crate::session::SourceSession;
use crate::source::{SourceError, SubtitleSource};

/// Default lifetime of a fetched title index.
const DEFAULT_INDEX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default lifetime of a cached miss.
const DEFAULT_MISS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default index age after which a miss forces a refresh.
const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Resolver tuning.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Lifetime of a fetched title index (and of resolved movie ids).
    pub index_ttl: Duration,
    /// Lifetime of a cached miss.
    pub miss_ttl: Duration,
    /// Index age after which a miss forces one refresh.
    pub refresh_after: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            index_ttl: DEFAULT_INDEX_TTL,
            miss_ttl: DEFAULT_MISS_TTL,
            refresh_after: DEFAULT_REFRESH_AFTER,
        }
    }
}

/// One cached resolution answer. `resolved_id: None` records a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Owning source.
    pub source_id: String,
    /// Resolved id, or `None` for a cached miss.
    pub resolved_id: Option<String>,
    /// Unix seconds when the answer was produced.
    pub resolved_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredIndex {
    index: IdIndex,
    refreshed_at: i64,
}

#[derive(Debug)]
struct IndexSnapshot {
    index: IdIndex,
    refreshed_at: SystemTime,
}

/// Resolves titles to source-internal ids.
pub struct EntityResolver {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    snapshots: DashMap<String, Arc<IndexSnapshot>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for EntityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityResolver")
            .field("config", &self.config)
            .field("indexed_sources", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl EntityResolver {
    /// Creates a resolver over a cache store.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, config: ResolverConfig) -> Self {
        Self {
            store,
            clock,
            config,
            snapshots: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    /// Resolves a series title to the source's id.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the title index cannot be fetched or is
    /// empty. A title that is simply not listed is `Ok(None)`.
    #[instrument(skip(self, source, session), fields(source = source.id()))]
    pub async fn resolve(
        &self,
        source: &dyn SubtitleSource,
        session: &SourceSession,
        title: &str,
        year: Option<u16>,
        country: Option<&str>,
    ) -> Result<Option<String>, SourceError> {
        let source_id = source.id();
        let variants = key_variants(title);
        let Some(primary) = variants.first() else {
            debug!("title sanitizes to nothing");
            return Ok(None);
        };

        let miss_key = format!(
            "{source_id}:miss:{primary}|{}|{}",
            year.map(|y| y.to_string()).unwrap_or_default(),
            country.map(str::to_lowercase).unwrap_or_default()
        );
        if let Some(entry) = self.cached_entry(&miss_key).await {
            debug!("cached miss");
            return Ok(entry.resolved_id);
        }

        let snapshot = self.snapshot(source, session).await?;
        if let Some(id) = snapshot.index.lookup(&variants, year, country) {
            debug!(id, "resolved from index");
            return Ok(Some(id));
        }

        let age = self
            .clock
            .now()
            .duration_since(snapshot.refreshed_at)
            .unwrap_or_default();
        if age > self.config.refresh_after {
            info!(age_secs = age.as_secs(), "title not found; re-fetching index");
            let refreshed = self.refresh(source, session, Some(&snapshot)).await?;
            if let Some(id) = refreshed.index.lookup(&variants, year, country) {
                debug!(id, "resolved after refresh");
                return Ok(Some(id));
            }
        } else {
            debug!("title not found; index too recent to refresh");
        }

        let entry = CacheEntry {
            source_id: source_id.to_string(),
            resolved_id: None,
            resolved_at: unix_secs(self.clock.now()),
        };
        self.store_entry(&miss_key, &entry, self.config.miss_ttl).await;
        Ok(None)
    }

    /// Resolves a movie title through the source's search.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the search request fails.
    #[instrument(skip(self, source, session), fields(source = source.id()))]
    pub async fn resolve_movie(
        &self,
        source: &dyn SubtitleSource,
        session: &SourceSession,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<String>, SourceError> {
        let source_id = source.id();
        let key = format!(
            "{source_id}:movie:{}|{}",
            sanitize(title),
            year.map(|y| y.to_string()).unwrap_or_default()
        );
        if let Some(entry) = self.cached_entry(&key).await {
            debug!(id = ?entry.resolved_id, "cached movie id");
            return Ok(entry.resolved_id);
        }

        let resolved_id = source.search_movie_id(session, title, year).await?;
        let ttl = if resolved_id.is_some() {
            self.config.index_ttl
        } else {
            self.config.miss_ttl
        };
        let entry = CacheEntry {
            source_id: source_id.to_string(),
            resolved_id: resolved_id.clone(),
            resolved_at: unix_secs(self.clock.now()),
        };
        self.store_entry(&key, &entry, ttl).await;
        Ok(resolved_id)
    }

    /// Drops every cached row and the in-memory index of a source.
    #[instrument(skip(self))]
    pub async fn purge(&self, source_id: &str) -> u64 {
        self.snapshots.remove(source_id);
        match self.store.delete_by_prefix(&source_prefix(source_id)).await {
            Ok(removed) => {
                info!(removed, "resolver cache purged");
                removed
            }
            Err(error) => {
                warn!(error = %error, "could not purge resolver cache");
                0
            }
        }
    }

    /// Returns the current index, loading or fetching it as needed.
    async fn snapshot(
        &self,
        source: &dyn SubtitleSource,
        session: &SourceSession,
    ) -> Result<Arc<IndexSnapshot>, SourceError> {
        let source_id = source.id();
        if let Some(snapshot) = self.memory_snapshot(source_id) {
            return Ok(snapshot);
        }
        if let Some(snapshot) = self.stored_snapshot(source_id).await {
            return Ok(snapshot);
        }
        self.refresh(source, session, None).await
    }

    fn memory_snapshot(&self, source_id: &str) -> Option<Arc<IndexSnapshot>> {
        let snapshot = self.snapshots.get(source_id).map(|entry| entry.clone())?;
        let age = self
            .clock
            .now()
            .duration_since(snapshot.refreshed_at)
            .unwrap_or_default();
        (age < self.config.index_ttl).then_some(snapshot)
    }

    async fn stored_snapshot(&self, source_id: &str) -> Option<Arc<IndexSnapshot>> {
        let key = index_key(source_id);
        match get_json::<StoredIndex>(self.store.as_ref(), &key).await {
            Ok(Some(stored)) => {
                debug!(keys = stored.index.len(), "loaded title index from cache");
                let snapshot = Arc::new(IndexSnapshot {
                    index: stored.index,
                    refreshed_at: from_unix_secs(stored.refreshed_at),
                });
                self.snapshots
                    .insert(source_id.to_string(), Arc::clone(&snapshot));
                Some(snapshot)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, "could not read cached title index");
                None
            }
        }
    }

    /// Fetches a new index, unless another caller already replaced `stale`
    /// while this one waited for the lock.
    async fn refresh(
        &self,
        source: &dyn SubtitleSource,
        session: &SourceSession,
        stale: Option<&Arc<IndexSnapshot>>,
    ) -> Result<Arc<IndexSnapshot>, SourceError> {
        let source_id = source.id();
        let lock = self
            .refresh_locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(current) = self.memory_snapshot(source_id) {
            let replaced = match stale {
                Some(stale) => !Arc::ptr_eq(&current, stale),
                None => true,
            };
            if replaced {
                debug!("index refreshed by another caller");
                return Ok(current);
            }
        }

        let listings = source.fetch_title_index(session).await?;
        let index = IdIndex::from_listings(source_id, &listings)?;
        let now = self.clock.now();

        let stored = StoredIndex {
            index,
            refreshed_at: unix_secs(now),
        };
        if let Err(error) = set_json(
            self.store.as_ref(),
            &index_key(source_id),
            &stored,
            self.config.index_ttl,
        )
        .await
        {
            warn!(error = %error, "could not cache title index");
        }

        info!(keys = stored.index.len(), "title index refreshed");
        let snapshot = Arc::new(IndexSnapshot {
            index: stored.index,
            refreshed_at: now,
        });
        self.snapshots
            .insert(source_id.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn cached_entry(&self, key: &str) -> Option<CacheEntry> {
        match get_json::<CacheEntry>(self.store.as_ref(), key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(key, error = %error, "could not read cache entry");
                None
            }
        }
    }

    async fn store_entry(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        if let Err(error) = set_json(self.store.as_ref(), key, entry, ttl).await {
            warn!(key, error = %error, "could not write cache entry");
        }
    }
}

fn index_key(source_id: &str) -> String {
    format!("{source_id}:index")
}
