//! Fan-out search across enabled sources.
//!
//! Each source runs its own pipeline (throttle gate, session, id
//! resolution, listing, filtering) in a spawned task. A semaphore bounds how
//! many sources are in flight at once, and every pipeline holds that
//! source's lease from the [`SourceRegistry`] so it never overlaps with a
//! download or an invalidation of the same source.
//!
//! A failing source turns into a [`SkipReason`] in the [`SearchReport`];
//! [`SearchOrchestrator::search`] itself cannot fail.
//!
//! # Example
//!
//! ```no_run
//! use subscout_core::{Language, SearchQuery};
//!
//! # async fn example(orchestrator: subscout_core::SearchOrchestrator) {
//! let query = SearchQuery::episode("Example Show", 1, 2)
//!     .with_languages(vec![Language::new("eng")]);
//! let report = orchestrator.search(&query, &["addic7ed".to_string()]).await;
//! for candidate in report.candidates() {
//!     println!("{} {}", candidate.language, candidate.version);
//! }
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::{Serialize, Serializer};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

pub use crate::source::MediaKind;

use crate::credentials::CredentialStore;
use crate::language::Language;
use crate::resolver::EntityResolver;
use crate::session::{SessionManager, SourceSession};
use crate::source::{
    Candidate, ErrorKind, ListingRequest, SourceError, SourceRegistry, SubtitleSource,
};
use crate::throttle::Throttle;

/// Default number of sources searched at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Episode or movie.
    pub media_kind: MediaKind,
    /// Series or movie title.
    pub title: String,
    /// Other known titles, tried in order when `title` does not resolve.
    pub alternate_titles: Vec<String>,
    /// Release year.
    pub year: Option<u16>,
    /// Country the series is from (e.g. `US`), used to pick between remakes.
    pub country: Option<String>,
    /// Season number (episodes).
    pub season: Option<u32>,
    /// Episode number (episodes).
    pub episode: Option<u32>,
    /// Wanted languages. Empty means any.
    pub languages: Vec<Language>,
}

impl SearchQuery {
    /// Query for one TV episode.
    #[must_use]
    pub fn episode(title: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            media_kind: MediaKind::Episode,
            title: title.into(),
            alternate_titles: Vec::new(),
            year: None,
            country: None,
            season: Some(season),
            episode: Some(episode),
            languages: Vec::new(),
        }
    }

    /// Query for a movie.
    #[must_use]
    pub fn movie(title: impl Into<String>) -> Self {
        Self {
            media_kind: MediaKind::Movie,
            title: title.into(),
            alternate_titles: Vec::new(),
            year: None,
            country: None,
            season: None,
            episode: None,
            languages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_year(mut self, year: u16) -> Self {
        self.year = Some(year);
        self
    }

    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    #[must_use]
    pub fn with_alternate_title(mut self, title: impl Into<String>) -> Self {
        self.alternate_titles.push(title.into());
        self
    }

    #[must_use]
    pub fn with_languages(mut self, languages: Vec<Language>) -> Self {
        self.languages = languages;
        self
    }

    fn titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.title.as_str()).chain(self.alternate_titles.iter().map(String::as_str))
    }

    fn accepts(&self, candidate: &Candidate) -> bool {
        let language_ok = self.languages.is_empty()
            || self
                .languages
                .iter()
                .any(|wanted| candidate.language.satisfies(wanted));
        let episode_ok = match self.media_kind {
            MediaKind::Movie => true,
            MediaKind::Episode => {
                self.episode.is_none_or(|wanted| candidate.episode == Some(wanted))
                    && self
                        .season
                        .is_none_or(|wanted| candidate.season.is_none_or(|s| s == wanted))
            }
        };
        language_ok && episode_ok
    }
}

/// Why a source produced no candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The throttle gate is closed.
    Throttled {
        /// Time until the gate reopens.
        #[serde(rename = "retry_in_secs", serialize_with = "serialize_secs")]
        retry_in: Duration,
    },
    /// The source signalled abuse during this search.
    RateLimited,
    /// Login failed; the source is disabled for the rest of the run.
    AuthenticationFailed,
    /// Credentials are missing.
    NotConfigured,
    /// The source answered with a server error.
    Unavailable,
    /// An earlier search in the same run disabled the source.
    DisabledForRun,
    /// No source with that id is registered.
    UnknownSource,
    /// Transport or parse failure.
    Error {
        /// Rendered error.
        message: String,
    },
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

/// Result for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Filtered candidates, in source order. May be empty.
    Candidates(Vec<Candidate>),
    /// The source was skipped.
    Skipped(SkipReason),
}

/// Per-source outcomes of one search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    /// Outcome per requested source id.
    pub outcomes: BTreeMap<String, SourceOutcome>,
}

impl SearchReport {
    /// All candidates across sources, grouped by source id order.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.outcomes.values().flat_map(|outcome| match outcome {
            SourceOutcome::Candidates(candidates) => candidates.as_slice(),
            SourceOutcome::Skipped(_) => &[],
        })
    }

    /// Sources that were skipped, with the reason.
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.outcomes
            .iter()
            .filter_map(|(source_id, outcome)| match outcome {
                SourceOutcome::Skipped(reason) => Some((source_id.as_str(), reason)),
                SourceOutcome::Candidates(_) => None,
            })
    }
}

/// Sources disabled for the remainder of a batch of searches.
///
/// Cloning shares the set.
#[derive(Debug, Clone, Default)]
pub struct SearchRun {
    disabled: Arc<DashSet<String>>,
}

impl SearchRun {
    /// Starts an empty run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables a source for the rest of the run.
    pub fn disable(&self, source_id: &str) {
        self.disabled.insert(source_id.to_string());
    }

    /// Returns true when the source was disabled earlier in the run.
    #[must_use]
    pub fn is_disabled(&self, source_id: &str) -> bool {
        self.disabled.contains(source_id)
    }
}

/// Runs searches across sources.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct SearchOrchestrator {
    registry: Arc<SourceRegistry>,
    sessions: Arc<SessionManager>,
    resolver: Arc<EntityResolver>,
    throttle: Arc<Throttle>,
    credentials: Arc<dyn CredentialStore>,
    semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("registry", &self.registry)
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

impl SearchOrchestrator {
    /// Creates an orchestrator. `concurrency` is clamped to at least 1.
    #[must_use]
    pub fn new(
        registry: Arc<SourceRegistry>,
        sessions: Arc<SessionManager>,
        resolver: Arc<EntityResolver>,
        throttle: Arc<Throttle>,
        credentials: Arc<dyn CredentialStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            sessions,
            resolver,
            throttle,
            credentials,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Searches the given sources with a fresh [`SearchRun`].
    pub async fn search(&self, query: &SearchQuery, enabled_sources: &[String]) -> SearchReport {
        self.search_in_run(query, enabled_sources, &SearchRun::new())
            .await
    }

    /// Searches the given sources, honouring and updating `run`.
    ///
    /// Per-source work is spawned; dropping the returned future leaves
    /// in-flight sources to finish on their own.
    #[instrument(skip(self, query, run), fields(title = %query.title, kind = ?query.media_kind))]
    pub async fn search_in_run(
        &self,
        query: &SearchQuery,
        enabled_sources: &[String],
        run: &SearchRun,
    ) -> SearchReport {
        let source_ids: BTreeSet<&String> = enabled_sources.iter().collect();
        let query = Arc::new(query.clone());
        let mut report = SearchReport::default();
        let mut handles = Vec::with_capacity(source_ids.len());

        info!(sources = source_ids.len(), "starting search");

        for source_id in source_ids {
            if let Some(reason) = self.precheck(source_id, run) {
                debug!(source = %source_id, ?reason, "source skipped");
                report
                    .outcomes
                    .insert(source_id.clone(), SourceOutcome::Skipped(reason));
                continue;
            }

            let orchestrator = self.clone();
            let query = Arc::clone(&query);
            let run = run.clone();
            let task_source_id = source_id.clone();
            let handle = tokio::spawn(async move {
                orchestrator
                    .search_source(&task_source_id, &query, &run)
                    .await
            });
            handles.push((source_id.clone(), handle));
        }

        for (source_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(source = %source_id, error = %error, "source task failed");
                    SourceOutcome::Skipped(SkipReason::Error {
                        message: format!("source task failed: {error}"),
                    })
                }
            };
            report.outcomes.insert(source_id, outcome);
        }

        info!(
            candidates = report.candidates().count(),
            skipped = report.skipped().count(),
            "search finished"
        );
        report
    }

    fn precheck(&self, source_id: &str, run: &SearchRun) -> Option<SkipReason> {
        if run.is_disabled(source_id) {
            return Some(SkipReason::DisabledForRun);
        }
        if self.registry.get(source_id).is_none() {
            return Some(SkipReason::UnknownSource);
        }
        self.throttle
            .retry_in(source_id)
            .map(|retry_in| SkipReason::Throttled { retry_in })
    }

    async fn search_source(&self, source_id: &str, query: &SearchQuery, run: &SearchRun) -> SourceOutcome {
        let Some(source) = self.registry.get(source_id) else {
            return SourceOutcome::Skipped(SkipReason::UnknownSource);
        };
        let Ok(_permit) = self.semaphore.acquire().await else {
            return SourceOutcome::Skipped(SkipReason::Error {
                message: "search worker pool closed".to_string(),
            });
        };
        let Some(_lease) = self.registry.lease(source_id).await else {
            return SourceOutcome::Skipped(SkipReason::UnknownSource);
        };

        // Another search may have tripped the gate while this one waited.
        if let Some(retry_in) = self.throttle.retry_in(source_id) {
            return SourceOutcome::Skipped(SkipReason::Throttled { retry_in });
        }

        match self.pipeline(source.as_ref(), query).await {
            Ok(candidates) => {
                self.throttle.record_success(source_id);
                debug!(source = source_id, count = candidates.len(), "source done");
                SourceOutcome::Candidates(candidates)
            }
            Err(error) => self.classify(source_id, &error, run),
        }
    }

    async fn pipeline(
        &self,
        source: &dyn SubtitleSource,
        query: &SearchQuery,
    ) -> Result<Vec<Candidate>, SourceError> {
        let credentials = self.credentials.get_credentials(source.id());
        let session = self
            .sessions
            .acquire_session(source, credentials.as_ref())
            .await?;

        let Some(resolved_id) = self.resolve(source, &session, query).await? else {
            info!(source = source.id(), "title not found on source");
            return Ok(Vec::new());
        };

        let request = ListingRequest {
            resolved_id,
            media_kind: query.media_kind,
            season: query.season,
            title: query.title.clone(),
            year: query.year,
        };
        let listed = match source.list_candidates(&session, &request).await {
            Ok(listed) => listed,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(source = source.id(), "listing not found");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        let total = listed.len();
        let candidates: Vec<Candidate> = listed
            .into_iter()
            .filter(|candidate| query.accepts(candidate))
            .collect();
        debug!(source = source.id(), total, kept = candidates.len(), "filtered candidates");
        Ok(candidates)
    }

    async fn resolve(
        &self,
        source: &dyn SubtitleSource,
        session: &SourceSession,
        query: &SearchQuery,
    ) -> Result<Option<String>, SourceError> {
        for title in query.titles() {
            let resolved = match query.media_kind {
                MediaKind::Episode => {
                    self.resolver
                        .resolve(source, session, title, query.year, query.country.as_deref())
                        .await?
                }
                MediaKind::Movie => {
                    self.resolver
                        .resolve_movie(source, session, title, query.year)
                        .await?
                }
            };
            if resolved.is_some() {
                return Ok(resolved);
            }
        }
        Ok(None)
    }

    fn classify(&self, source_id: &str, error: &SourceError, run: &SearchRun) -> SourceOutcome {
        let reason = match error.kind() {
            ErrorKind::RateLimited => {
                let backoff = self.throttle.record_rate_limited(source_id, error.retry_after());
                warn!(source = source_id, backoff_secs = backoff.as_secs(), "source rate limited");
                SkipReason::RateLimited
            }
            ErrorKind::Unavailable => {
                self.throttle.record_unavailable(source_id);
                warn!(source = source_id, error = %error, "source unavailable");
                SkipReason::Unavailable
            }
            ErrorKind::Authentication | ErrorKind::CaptchaUnsolvable => {
                warn!(source = source_id, error = %error, "login failed; disabling source for this run");
                run.disable(source_id);
                SkipReason::AuthenticationFailed
            }
            ErrorKind::Configuration => {
                info!(source = source_id, "source not configured");
                SkipReason::NotConfigured
            }
            ErrorKind::NotFound => return SourceOutcome::Candidates(Vec::new()),
            ErrorKind::DownloadLimitExceeded | ErrorKind::Transport | ErrorKind::Parse => {
                warn!(source = source_id, error = %error, "source failed");
                SkipReason::Error {
                    message: error.to_string(),
                }
            }
        };
        SourceOutcome::Skipped(reason)
    }
}
