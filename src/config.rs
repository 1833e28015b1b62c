//! File configuration.
//!
//! The config file is TOML:
//!
//! ```toml
//! [http]
//! timeout_secs = 60
//!
//! [throttle]
//! base_backoff_secs = 600
//!
//! [cache]
//! database = "/var/lib/subscout/subscout.db"
//!
//! [session]
//! freshness_secs = 1800
//! secret = "long random string"
//!
//! [search]
//! concurrency = 4
//!
//! [sources.addic7ed]
//! username = "alice"
//! password = "hunter2"
//! ```
//!
//! Every key is optional. Values are range-checked after parsing.
//! `SUBSCOUT_SESSION_SECRET` overrides `[session] secret`.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::credentials::{Credentials, MemoryCredentialStore};
use crate::orchestrator::DEFAULT_CONCURRENCY;
use crate::resolver::ResolverConfig;
use crate::session::SessionConfig;
use crate::throttle::ThrottleConfig;

/// Environment variable holding the session encryption secret.
pub const SESSION_SECRET_ENV: &str = "SUBSCOUT_SESSION_SECRET";

/// Directory name under the config and data base directories.
const APP_DIR: &str = "subscout";

/// Errors raised while loading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config file: {source}\n  Suggestion: compare the file against the documented sections")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        /// Dotted key path.
        field: String,
        /// Rejected value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

/// `[http]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    /// Timeout for every request to a source.
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// `[throttle]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleSection {
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub down_cooldown_secs: u64,
    pub download_limit_cooldown_secs: u64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            base_backoff_secs: defaults.base_backoff.as_secs(),
            max_backoff_secs: defaults.max_backoff.as_secs(),
            down_cooldown_secs: defaults.down_cooldown.as_secs(),
            download_limit_cooldown_secs: defaults.download_limit_cooldown.as_secs(),
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// SQLite file. Defaults to `$XDG_DATA_HOME/subscout/subscout.db`.
    pub database: Option<PathBuf>,
    pub index_ttl_secs: u64,
    pub miss_ttl_secs: u64,
    pub refresh_after_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = ResolverConfig::default();
        Self {
            database: None,
            index_ttl_secs: defaults.index_ttl.as_secs(),
            miss_ttl_secs: defaults.miss_ttl.as_secs(),
            refresh_after_secs: defaults.refresh_after.as_secs(),
        }
    }
}

/// `[session]`
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub freshness_secs: u64,
    pub captcha_timeout_secs: u64,
    /// Encryption secret for persisted sessions. Without one, sessions are
    /// kept in memory only.
    pub secret: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            freshness_secs: defaults.freshness.as_secs(),
            captcha_timeout_secs: defaults.captcha_timeout.as_secs(),
            secret: None,
        }
    }
}

impl fmt::Debug for SessionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSection")
            .field("freshness_secs", &self.freshness_secs)
            .field("captcha_timeout_secs", &self.captcha_timeout_secs)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// `[search]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSection {
    /// Sources searched at once.
    pub concurrency: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// `[sources.<id>]`
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Set to `false` to leave the source out of searches.
    pub enabled: bool,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            enabled: true,
        }
    }
}

impl fmt::Debug for SourceSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSection")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub http: HttpSection,
    pub throttle: ThrottleSection,
    pub cache: CacheSection,
    pub session: SessionSection,
    pub search: SearchSection,
    pub sources: BTreeMap<String, SourceSection>,
}

impl AppConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] when the file cannot be read, otherwise as
    /// [`AppConfig::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        debug!(path = %path.display(), sources = config.sources.len(), "config loaded");
        Ok(config)
    }

    /// Loads `explicit` when given (it must exist), otherwise the default
    /// path when that file exists, otherwise defaults.
    ///
    /// # Errors
    ///
    /// As [`AppConfig::load`].
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("no config file; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("http.timeout_secs", self.http.timeout_secs, 1, 3600, "1..=3600")?;
        check_range("search.concurrency", self.search.concurrency as u64, 1, 16, "1..=16")?;

        let throttle = &self.throttle;
        check_range("throttle.base_backoff_secs", throttle.base_backoff_secs, 1, 86_400, "1..=86400")?;
        check_range(
            "throttle.max_backoff_secs",
            throttle.max_backoff_secs,
            throttle.base_backoff_secs,
            7 * 86_400,
            "base_backoff_secs..=604800",
        )?;
        check_range("throttle.down_cooldown_secs", throttle.down_cooldown_secs, 1, 86_400, "1..=86400")?;
        check_range(
            "throttle.download_limit_cooldown_secs",
            throttle.download_limit_cooldown_secs,
            1,
            2 * 86_400,
            "1..=172800",
        )?;

        let cache = &self.cache;
        check_range("cache.index_ttl_secs", cache.index_ttl_secs, 3600, 90 * 86_400, "3600..=7776000")?;
        check_range("cache.miss_ttl_secs", cache.miss_ttl_secs, 60, 30 * 86_400, "60..=2592000")?;
        check_range("cache.refresh_after_secs", cache.refresh_after_secs, 60, 30 * 86_400, "60..=2592000")?;

        check_range("session.freshness_secs", self.session.freshness_secs, 60, 86_400, "60..=86400")?;
        check_range(
            "session.captcha_timeout_secs",
            self.session.captcha_timeout_secs,
            1,
            600,
            "1..=600",
        )?;
        if let Some(secret) = &self.session.secret
            && secret.trim().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "session.secret".to_string(),
                value: "\"\"".to_string(),
                expected: "a non-empty string",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    #[must_use]
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            base_backoff: Duration::from_secs(self.throttle.base_backoff_secs),
            max_backoff: Duration::from_secs(self.throttle.max_backoff_secs),
            down_cooldown: Duration::from_secs(self.throttle.down_cooldown_secs),
            download_limit_cooldown: Duration::from_secs(self.throttle.download_limit_cooldown_secs),
        }
    }

    #[must_use]
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            index_ttl: Duration::from_secs(self.cache.index_ttl_secs),
            miss_ttl: Duration::from_secs(self.cache.miss_ttl_secs),
            refresh_after: Duration::from_secs(self.cache.refresh_after_secs),
        }
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            freshness: Duration::from_secs(self.session.freshness_secs),
            captcha_timeout: Duration::from_secs(self.session.captcha_timeout_secs),
            ..SessionConfig::default()
        }
    }

    /// Session secret, `SUBSCOUT_SESSION_SECRET` first.
    #[must_use]
    pub fn session_secret(&self) -> Option<String> {
        pick_secret(env::var(SESSION_SECRET_ENV).ok(), self.session.secret.as_deref())
    }

    /// Database path: `[cache] database`, else the default data path.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        self.cache.database.clone().or_else(default_database_path)
    }

    /// Credential store holding every source that has both halves set.
    #[must_use]
    pub fn credential_store(&self) -> MemoryCredentialStore {
        let store = MemoryCredentialStore::new();
        for (source_id, section) in &self.sources {
            if let (Some(username), Some(password)) = (&section.username, &section.password) {
                store.set(source_id, Credentials::new(username.clone(), password.clone()));
            }
        }
        store
    }

    /// Filters `known` down to sources not disabled in the file.
    #[must_use]
    pub fn enabled_sources(&self, known: &[String]) -> Vec<String> {
        known
            .iter()
            .filter(|id| self.sources.get(id.as_str()).is_none_or(|section| section.enabled))
            .cloned()
            .collect()
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64, expected: &'static str) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: field.to_string(),
            value: value.to_string(),
            expected,
        })
    }
}

fn pick_secret(from_env: Option<String>, from_file: Option<&str>) -> Option<String> {
    from_env
        .filter(|secret| !secret.trim().is_empty())
        .or_else(|| from_file.map(str::to_string))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/subscout/config.toml`
/// 2. `$HOME/.config/subscout/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(base) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(base).join(APP_DIR).join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join(APP_DIR).join("config.toml"))
}

/// Resolves the default database path.
///
/// Priority:
/// 1. `$XDG_DATA_HOME/subscout/subscout.db`
/// 2. `$HOME/.local/share/subscout/subscout.db`
#[must_use]
pub fn default_database_path() -> Option<PathBuf> {
    if let Some(base) = env_var_non_empty_os("XDG_DATA_HOME") {
        return Some(PathBuf::from(base).join(APP_DIR).join("subscout.db"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR)
            .join("subscout.db"),
    )
}
