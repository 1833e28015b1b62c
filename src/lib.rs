//! Subscout Core Library
//!
//! This library queries scraped subtitle sites through one uniform contract:
//! per-source login sessions (CAPTCHA-gated where the site demands it), fuzzy
//! title-to-id resolution backed by a persistent cache, per-source throttling
//! driven by abuse signals, and listing scrapers that produce normalized
//! [`Candidate`](source::Candidate) records.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`normalizer`] - Title sanitization and fuzzy lookup keys
//! - [`session`] - Per-source login lifecycle and persisted sessions
//! - [`resolver`] - Title to source-internal id resolution with caching
//! - [`throttle`] - Per-source availability gate and backoff
//! - [`source`] - The [`SubtitleSource`](source::SubtitleSource) contract and site scrapers
//! - [`orchestrator`] - Fan-out search across enabled sources
//! - [`download`] - Fetching and verifying a chosen candidate
//! - [`invalidation`] - Purging per-source state on credential changes

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod db;
pub mod download;
pub mod invalidation;
pub mod language;
pub mod normalizer;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod source;
pub mod throttle;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheError, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use credentials::{CredentialChange, CredentialStore, Credentials, MemoryCredentialStore};
pub use db::Database;
pub use download::{Downloader, FetchError};
pub use invalidation::CredentialInvalidator;
pub use language::Language;
pub use orchestrator::{
    MediaKind, SearchOrchestrator, SearchQuery, SearchReport, SearchRun, SkipReason,
    SourceOutcome,
};
pub use resolver::{EntityResolver, ResolverConfig};
pub use retry::{Attempt, RetryPolicy, retry};
pub use runtime::{Runtime, RuntimeError};
pub use session::{
    CaptchaSolver, SessionConfig, SessionManager, SourceSession, UnconfiguredSolver,
};
pub use source::{
    Candidate, ErrorKind, SourceError, SourceRegistry, SubtitleSource,
    build_default_source_registry,
};
pub use throttle::{Throttle, ThrottleConfig, ThrottleSnapshot, ThrottleStatus};
