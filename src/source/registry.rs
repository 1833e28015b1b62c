//! Source registry with per-source single-flight leases.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::SubtitleSource;

/// Registered sources, in registration order.
///
/// Besides lookup, the registry owns one lock per source. Holding a
/// [`lease`](Self::lease) serializes everything that touches the source's
/// session, throttle and cache state.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SubtitleSource>>,
    leases: HashMap<String, Arc<Mutex<()>>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.ids())
            .finish()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            leases: HashMap::new(),
        }
    }

    /// Registers a source. A later source with the same id replaces the earlier one.
    #[tracing::instrument(skip(self, source), fields(source = source.id()))]
    pub fn register(&mut self, source: Arc<dyn SubtitleSource>) {
        let id = source.id().to_string();
        debug!("registering source");
        self.sources.retain(|existing| existing.id() != id);
        self.leases
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())));
        self.sources.push(source);
    }

    /// Looks up a source by id.
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<Arc<dyn SubtitleSource>> {
        self.sources
            .iter()
            .find(|source| source.id() == source_id)
            .cloned()
    }

    /// Returns registered ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    /// Returns the number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Waits for exclusive use of a source. `None` for unknown ids.
    pub async fn lease(&self, source_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self.leases.get(source_id)?.clone();
        Some(lock.lock_owned().await)
    }
}
