//! The subtitle-source contract and its implementations.
//!
//! Each site is one [`SubtitleSource`]. The trait splits the site's surface
//! into the steps the rest of the crate drives: session checks and login
//! ([`crate::session`]), the title index used for id resolution
//! ([`crate::resolver`]), candidate listing ([`crate::orchestrator`]) and
//! file retrieval ([`crate::download`]).
//!
//! Sources are stateless apart from their HTTP clients; everything
//! per-account lives in the [`SourceSession`] passed in.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use subscout_core::source::build_default_source_registry;
//!
//! let registry = build_default_source_registry(Duration::from_secs(60));
//! for id in registry.ids() {
//!     println!("{id}");
//! }
//! ```

pub mod addic7ed;
mod error;
pub mod http_client;
mod registry;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use addic7ed::Addic7edSource;
pub use error::{ErrorKind, SourceError};
pub use registry::SourceRegistry;

use crate::credentials::Credentials;
use crate::language::Language;
use crate::session::SourceSession;

/// Builds the registry of built-in sources.
///
/// A source whose client cannot be constructed is logged and left out.
#[must_use]
pub fn build_default_source_registry(timeout: Duration) -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    match Addic7edSource::new(timeout) {
        Ok(source) => registry.register(Arc::new(source)),
        Err(error) => warn!(
            error = %error,
            "addic7ed source unavailable; continuing with remaining sources"
        ),
    }

    registry
}

/// Whether a search targets a TV episode or a movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A TV episode.
    Episode,
    /// A feature film.
    Movie,
}

/// One subtitle file offered by a source.
///
/// Candidates are immutable once produced; `download_reference` is opaque
/// to everything but the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source that listed the file.
    pub source_id: String,
    /// Language with hearing-impaired/forced flags.
    pub language: Language,
    /// Release/version label (e.g. `720p.WEB-DL`).
    pub version: String,
    /// Uploader name, when the source shows one.
    pub uploader: Option<String>,
    /// Source-specific download path.
    pub download_reference: String,
    /// Page the file is listed on; sent as `Referer` when downloading.
    pub page_reference: Option<String>,
    /// Series or movie title.
    pub title: String,
    /// Episode title as listed, for episodes.
    pub episode_title: Option<String>,
    /// Season number for episodes.
    pub season: Option<u32>,
    /// Episode number for episodes.
    pub episode: Option<u32>,
    /// Release year, when known.
    pub year: Option<u16>,
}

/// One entry of a source's title index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleListing {
    /// Title exactly as the source lists it (may end in `(YYYY)`).
    pub title: String,
    /// Source-internal id.
    pub id: String,
}

/// Parameters for [`SubtitleSource::list_candidates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRequest {
    /// Source-internal id from the resolver.
    pub resolved_id: String,
    /// Episode or movie listing.
    pub media_kind: MediaKind,
    /// Season to list (episodes only).
    pub season: Option<u32>,
    /// Title the caller searched for, used to label candidates.
    pub title: String,
    /// Year the caller searched for.
    pub year: Option<u16>,
}

/// CAPTCHA found on a login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    /// reCAPTCHA site key.
    pub site_key: String,
    /// Page the challenge was served on.
    pub page_url: String,
    /// Form field the solved token goes into.
    pub field: String,
    /// Invisible (v3/execute) challenge.
    pub invisible: bool,
}

/// What the login page asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPage {
    /// Plain username/password form.
    Open,
    /// CAPTCHA-gated form.
    Captcha(CaptchaChallenge),
    /// The site requires a CAPTCHA but the key could not be found.
    CaptchaWithoutKey,
}

/// Solved CAPTCHA token and the field it belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaAnswer {
    /// Form field name.
    pub field: String,
    /// Solver token.
    pub token: String,
}

/// Classified answer to a login form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Session cookies issued.
    LoggedIn,
    /// The site told us to slow down.
    RateLimited,
    /// Wrong password or unknown user.
    InvalidCredentials,
    /// Anything else; worth another attempt.
    Unrecognized,
}

/// A downloaded file before verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSubtitle {
    /// Raw body.
    pub bytes: Vec<u8>,
    /// Declared `Content-Type`.
    pub content_type: Option<String>,
    /// Declared `Content-Length`.
    pub content_length: Option<u64>,
}

/// Trait for scraped subtitle sites.
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn SubtitleSource>`.
#[async_trait]
pub trait SubtitleSource: Send + Sync + std::fmt::Debug {
    /// Stable identifier, used for config sections, cache keys and logs.
    fn id(&self) -> &str;

    /// Whether searches need a logged-in session.
    fn requires_login(&self) -> bool {
        true
    }

    /// User-Agent this source presents; handed to the CAPTCHA solver.
    fn user_agent(&self) -> &str;

    /// Checks with one cheap request whether the session's cookies are still
    /// logged in. Cookies set by the response are absorbed into `session`.
    async fn verify_session(&self, session: &mut SourceSession) -> Result<bool, SourceError>;

    /// Loads the login page and reports any CAPTCHA on it.
    async fn open_login(&self, session: &mut SourceSession) -> Result<LoginPage, SourceError>;

    /// Submits the login form and classifies the answer.
    async fn submit_login(
        &self,
        session: &mut SourceSession,
        credentials: &Credentials,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<LoginOutcome, SourceError>;

    /// Fetches the full title index used for id resolution.
    async fn fetch_title_index(
        &self,
        session: &SourceSession,
    ) -> Result<Vec<TitleListing>, SourceError>;

    /// Looks up a movie id through the site's search, for sources whose
    /// movies are not in the title index.
    async fn search_movie_id(
        &self,
        _session: &SourceSession,
        _title: &str,
        _year: Option<u16>,
    ) -> Result<Option<String>, SourceError> {
        Ok(None)
    }

    /// Lists candidates for a resolved id, in site order.
    async fn list_candidates(
        &self,
        session: &SourceSession,
        request: &ListingRequest,
    ) -> Result<Vec<Candidate>, SourceError>;

    /// Downloads a candidate's file.
    async fn fetch(
        &self,
        session: &SourceSession,
        candidate: &Candidate,
    ) -> Result<FetchedSubtitle, SourceError>;
}
