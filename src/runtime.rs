//! Wiring of the shared components.
//!
//! One [`Runtime`] owns the registry, throttle, session manager, resolver
//! and credential store, and hands out the orchestrator, downloader and
//! invalidator built on top of them. Nothing here is global; tests build
//! their own runtime with fake sources through [`Runtime::assemble`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, MemoryCacheStore, SqliteCacheStore, get_json, set_json};
use crate::clock::{Clock, SystemClock, unix_secs};
use crate::config::AppConfig;
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::db::{Database, DbError};
use crate::download::Downloader;
use crate::invalidation::CredentialInvalidator;
use crate::orchestrator::SearchOrchestrator;
use crate::resolver::EntityResolver;
use crate::session::{CaptchaSolver, SessionManager, SessionStore, UnconfiguredSolver};
use crate::source::{SourceRegistry, build_default_source_registry};
use crate::throttle::{Throttle, ThrottleStatus};

/// Errors raised while opening the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The database directory could not be created.
    #[error("failed to create data directory '{}': {source}", path.display())]
    DataDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The database could not be opened.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Lifetime of a recorded credential fingerprint.
const CREDENTIALS_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Throttle windows as persisted between processes.
#[derive(Debug, Serialize, Deserialize)]
struct StoredThrottle {
    status: ThrottleStatus,
    until: Option<i64>,
    download_until: Option<i64>,
    consecutive_failures: u32,
}

/// Shared components of one process.
#[derive(Debug)]
pub struct Runtime {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<SourceRegistry>,
    throttle: Arc<Throttle>,
    sessions: Arc<SessionManager>,
    resolver: Arc<EntityResolver>,
    cache: Arc<dyn CacheStore>,
    credentials: Arc<MemoryCredentialStore>,
    database: Option<Database>,
}

impl Runtime {
    /// Opens the production runtime: SQLite cache at the configured path,
    /// built-in sources, system clock, no CAPTCHA solver.
    ///
    /// Sessions are persisted only when a session secret is configured.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the database cannot be opened.
    #[instrument(skip(config))]
    pub async fn open(config: AppConfig) -> Result<Self, RuntimeError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = build_default_source_registry(config.timeout());

        let database = match config.database_path() {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|source| RuntimeError::DataDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                Some(Database::new(&path).await?)
            }
            None => {
                warn!("no data directory; cache kept in memory for this run");
                None
            }
        };

        let cache: Arc<dyn CacheStore> = match &database {
            Some(db) => Arc::new(SqliteCacheStore::new(db.clone(), Arc::clone(&clock))),
            None => Arc::new(MemoryCacheStore::new(Arc::clone(&clock))),
        };
        let session_store = match (&database, config.session_secret()) {
            (Some(db), Some(secret)) => {
                Some(SessionStore::new(db.clone(), &secret, Arc::clone(&clock)))
            }
            (Some(_), None) => {
                info!("no session secret configured; sessions will not be persisted");
                None
            }
            (None, _) => None,
        };

        let mut runtime = Self::assemble(
            config,
            registry,
            cache,
            session_store,
            Arc::new(UnconfiguredSolver),
            clock,
        );
        let persistent = database.is_some();
        runtime.database = database;
        if persistent {
            runtime.reconcile_credentials().await;
        }
        runtime.restore_throttle().await;
        Ok(runtime)
    }

    /// Builds a runtime from explicit parts.
    #[must_use]
    pub fn assemble(
        config: AppConfig,
        registry: SourceRegistry,
        cache: Arc<dyn CacheStore>,
        session_store: Option<SessionStore>,
        solver: Arc<dyn CaptchaSolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let throttle = Arc::new(Throttle::new(config.throttle_config()));
        let sessions = Arc::new(SessionManager::new(
            solver,
            session_store,
            Arc::clone(&clock),
            config.session_config(),
        ));
        let resolver = Arc::new(EntityResolver::new(
            Arc::clone(&cache),
            Arc::clone(&clock),
            config.resolver_config(),
        ));
        let credentials = Arc::new(config.credential_store());
        debug!(sources = ?registry.ids(), "runtime assembled");

        Self {
            config,
            clock,
            registry: Arc::new(registry),
            throttle,
            sessions,
            resolver,
            cache,
            credentials,
            database: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<MemoryCredentialStore> {
        &self.credentials
    }

    /// Registered sources not disabled in the config.
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<String> {
        self.config.enabled_sources(&self.registry.ids())
    }

    #[must_use]
    pub fn orchestrator(&self) -> SearchOrchestrator {
        SearchOrchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.resolver),
            Arc::clone(&self.throttle),
            self.credential_store(),
            self.config.search.concurrency,
        )
    }

    #[must_use]
    pub fn downloader(&self) -> Downloader {
        Downloader::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.throttle),
            self.credential_store(),
        )
    }

    #[must_use]
    pub fn invalidator(&self) -> CredentialInvalidator {
        CredentialInvalidator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.resolver),
            Arc::clone(&self.throttle),
        )
    }

    /// Starts purging per-source state whenever credentials change.
    pub fn watch_credentials(&self) -> JoinHandle<()> {
        self.invalidator()
            .spawn_watcher(self.credentials.subscribe())
    }

    fn credential_store(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.credentials) as Arc<dyn CredentialStore>
    }

    /// Purges state left by an earlier process under other credentials.
    ///
    /// Each source's credential fingerprint is kept outside its own key
    /// prefix. A source whose fingerprint differs from the recorded one, or
    /// has none recorded, loses its session, cached ids and throttle windows.
    pub async fn reconcile_credentials(&self) {
        let invalidator = self.invalidator();
        for source_id in self.registry.ids() {
            let key = credentials_key(&source_id);
            let current = self
                .credentials
                .get_credentials(&source_id)
                .map(|credentials| credentials.fingerprint())
                .unwrap_or_default();
            let recorded = match get_json::<String>(self.cache.as_ref(), &key).await {
                Ok(recorded) => recorded,
                Err(error) => {
                    warn!(source = %source_id, error = %error, "could not read recorded credentials");
                    None
                }
            };
            match recorded {
                Some(recorded) if recorded == current => continue,
                Some(_) => info!(source = %source_id, "credentials changed since last run"),
                None => debug!(source = %source_id, "no credentials recorded"),
            }
            invalidator.invalidate(&source_id).await;
            if let Err(error) = set_json(self.cache.as_ref(), &key, &current, CREDENTIALS_TTL).await {
                warn!(source = %source_id, error = %error, "could not record credentials");
            }
        }
    }

    /// Loads throttle windows saved by an earlier process.
    pub async fn restore_throttle(&self) {
        let now = unix_secs(self.clock.now());
        for source_id in self.registry.ids() {
            let key = throttle_key(&source_id);
            let stored = match get_json::<StoredThrottle>(self.cache.as_ref(), &key).await {
                Ok(Some(stored)) => stored,
                Ok(None) => continue,
                Err(error) => {
                    warn!(source = %source_id, error = %error, "could not read saved throttle state");
                    continue;
                }
            };
            let remaining = |until: Option<i64>| {
                until
                    .map(|until| until.saturating_sub(now))
                    .filter(|secs| *secs > 0)
                    .map(|secs| Duration::from_secs(secs.unsigned_abs()))
            };
            self.throttle.restore(
                &source_id,
                stored.status,
                remaining(stored.until),
                remaining(stored.download_until),
                stored.consecutive_failures,
            );
        }
    }

    /// Saves current throttle windows so the next process honours them.
    pub async fn persist_throttle(&self) {
        let now = self.clock.now();
        let throttled = self.throttle.list_throttled();
        for source_id in self.registry.ids() {
            let key = throttle_key(&source_id);
            let Some(snapshot) = throttled.iter().find(|s| s.source_id == source_id) else {
                if let Err(error) = self.cache.delete_by_key(&key).await {
                    warn!(source = %source_id, error = %error, "could not clear saved throttle state");
                }
                continue;
            };
            let stored = StoredThrottle {
                status: snapshot.status,
                until: snapshot.retry_in.map(|wait| unix_secs(now + wait)),
                download_until: snapshot.download_retry_in.map(|wait| unix_secs(now + wait)),
                consecutive_failures: snapshot.consecutive_failures,
            };
            let ttl = [snapshot.retry_in, snapshot.download_retry_in]
                .into_iter()
                .flatten()
                .max()
                .unwrap_or_default()
                .max(Duration::from_secs(1));
            if let Err(error) = set_json(self.cache.as_ref(), &key, &stored, ttl).await {
                warn!(source = %source_id, error = %error, "could not save throttle state");
            }
        }
    }

    /// Clears a source's throttle now and in saved state.
    pub async fn reset_throttle(&self, source_id: &str) {
        self.throttle.reset(source_id);
        if let Err(error) = self.cache.delete_by_key(&throttle_key(source_id)).await {
            warn!(source = source_id, error = %error, "could not clear saved throttle state");
        }
    }

    /// Saves throttle state and closes the database.
    pub async fn close(self) {
        self.persist_throttle().await;
        if let Some(database) = self.database {
            database.close().await;
        }
        debug!("runtime closed");
    }
}

fn credentials_key(source_id: &str) -> String {
    format!("credentials:{source_id}")
}

fn throttle_key(source_id: &str) -> String {
    format!("{source_id}:throttle")
}
