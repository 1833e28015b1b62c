//! Source credentials and change notification.
//!
//! Credentials are owned by an external store. The core reads them through
//! [`CredentialStore`] and subscribes to [`CredentialChange`] notifications so
//! stale sessions and ids are purged when an account changes.

use std::fmt;

use dashmap::DashMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Username and password for one source account.
///
/// The password is redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the password. Never log the return value.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Returns true when either half is blank.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.username.trim().is_empty() || self.password.is_empty()
    }

    /// Stable digest identifying this credential pair without revealing it.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.password.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Notification that a source's credentials changed or were removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialChange {
    /// The source whose credentials changed.
    pub source_id: String,
}

/// Read access to source credentials plus change subscriptions.
pub trait CredentialStore: Send + Sync {
    /// Returns the credentials configured for a source, if any.
    fn get_credentials(&self, source_id: &str) -> Option<Credentials>;

    /// Subscribes to credential changes.
    fn subscribe(&self) -> broadcast::Receiver<CredentialChange>;
}

/// In-process credential store, typically populated from the config file.
#[derive(Debug)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, Credentials>,
    changes: broadcast::Sender<CredentialChange>,
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    /// Sets credentials for a source, notifying subscribers when they differ
    /// from the previous value.
    pub fn set(&self, source_id: &str, credentials: Credentials) {
        let previous = self.entries.insert(source_id.to_string(), credentials.clone());
        match previous {
            Some(previous) if previous == credentials => {
                debug!(source = source_id, "credentials unchanged");
            }
            Some(_) => {
                info!(source = source_id, "credentials changed");
                self.notify(source_id);
            }
            None => debug!(source = source_id, "credentials registered"),
        }
    }

    /// Removes credentials for a source, notifying subscribers if any existed.
    pub fn remove(&self, source_id: &str) {
        if self.entries.remove(source_id).is_some() {
            info!(source = source_id, "credentials removed");
            self.notify(source_id);
        }
    }

    fn notify(&self, source_id: &str) {
        // No receivers is fine: nothing cached yet that could go stale.
        let _ = self.changes.send(CredentialChange {
            source_id: source_id.to_string(),
        });
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self, source_id: &str) -> Option<Credentials> {
        self.entries.get(source_id).map(|entry| entry.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<CredentialChange> {
        self.changes.subscribe()
    }
}
