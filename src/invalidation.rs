//! Purging per-source state when credentials change.
//!
//! A session, a resolved id index and a throttle window all belong to the
//! account that produced them. When the account changes, all three go, in
//! that order, while the source's lease is held so no search or download
//! observes a half-purged source.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::credentials::CredentialChange;
use crate::resolver::EntityResolver;
use crate::session::SessionManager;
use crate::source::SourceRegistry;
use crate::throttle::Throttle;

/// Drops stale per-source state.
#[derive(Debug, Clone)]
pub struct CredentialInvalidator {
    registry: Arc<SourceRegistry>,
    sessions: Arc<SessionManager>,
    resolver: Arc<EntityResolver>,
    throttle: Arc<Throttle>,
}

impl CredentialInvalidator {
    #[must_use]
    pub fn new(
        registry: Arc<SourceRegistry>,
        sessions: Arc<SessionManager>,
        resolver: Arc<EntityResolver>,
        throttle: Arc<Throttle>,
    ) -> Self {
        Self {
            registry,
            sessions,
            resolver,
            throttle,
        }
    }

    /// Purges session, cached ids and throttle state of one source.
    ///
    /// Unknown ids are purged too, without a lease, so leftovers of a
    /// removed source can still be cleaned up.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, source_id: &str) {
        let _lease = self.registry.lease(source_id).await;
        self.sessions.invalidate(source_id).await;
        let removed = self.resolver.purge(source_id).await;
        self.throttle.reset(source_id);
        info!(cache_rows = removed, "source state invalidated");
    }

    /// Purges every registered source.
    pub async fn invalidate_all(&self) {
        for source_id in self.registry.ids() {
            self.invalidate(&source_id).await;
        }
    }

    /// Invalidates sources as change notifications arrive.
    ///
    /// A lagging receiver purges every source. The task ends when the
    /// channel closes.
    pub fn spawn_watcher(&self, mut changes: broadcast::Receiver<CredentialChange>) -> JoinHandle<()> {
        let invalidator = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => invalidator.invalidate(&change.source_id).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "credential notifications dropped; invalidating all sources");
                        invalidator.invalidate_all().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("credential channel closed; watcher exiting");
                        break;
                    }
                }
            }
        })
    }
}
