//! Shared fakes for integration tests: an in-memory subtitle source with
//! call counters, CAPTCHA solvers, and runtime wiring.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use subscout_core::cache::MemoryCacheStore;
use subscout_core::clock::ManualClock;
use subscout_core::credentials::Credentials;
use subscout_core::session::captcha::{CaptchaError, CaptchaRequest, CaptchaSolver};
use subscout_core::source::{
    CaptchaAnswer, FetchedSubtitle, ListingRequest, LoginOutcome, LoginPage, TitleListing,
};
use subscout_core::{
    AppConfig, Candidate, Language, Runtime, SourceError, SourceRegistry, SourceSession,
    SubtitleSource,
};

/// Unix time the manual clock starts at in every test.
pub const START_UNIX: i64 = 1_760_000_000;

/// Failure a fake source can be told to produce.
#[derive(Debug, Clone)]
pub enum Failure {
    RateLimited(Option<Duration>),
    Unavailable,
    Parse,
    NotFound,
    DownloadLimit,
    /// Panics instead of returning an error.
    Panic,
}

impl Failure {
    fn to_error(&self, source_id: &str) -> SourceError {
        match self {
            Self::RateLimited(hint) => SourceError::rate_limited(source_id, *hint),
            Self::Unavailable => SourceError::Unavailable {
                source_id: source_id.to_string(),
                status: 503,
            },
            Self::Parse => SourceError::parse(source_id, "unexpected markup"),
            Self::NotFound => SourceError::NotFound {
                source_id: source_id.to_string(),
                reference: "missing".to_string(),
            },
            Self::DownloadLimit => SourceError::DownloadLimitExceeded {
                source_id: source_id.to_string(),
            },
            Self::Panic => panic!("{source_id} blew up"),
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory subtitle source.
#[derive(Debug)]
pub struct FakeSource {
    id: String,
    requires_login: bool,
    login_page: Mutex<LoginPage>,
    login_outcome: Mutex<LoginOutcome>,
    session_valid: AtomicBool,
    index: Mutex<Vec<TitleListing>>,
    movies: Mutex<Vec<(String, String)>>,
    candidates: Mutex<Vec<Candidate>>,
    listing_failure: Mutex<Option<Failure>>,
    verify_failure: Mutex<Option<Failure>>,
    fetch_result: Mutex<Result<FetchedSubtitle, Failure>>,
    pub index_fetches: AtomicUsize,
    pub movie_searches: AtomicUsize,
    pub login_opens: AtomicUsize,
    pub login_submits: AtomicUsize,
    pub verifies: AtomicUsize,
    pub listings: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            requires_login: true,
            login_page: Mutex::new(LoginPage::Open),
            login_outcome: Mutex::new(LoginOutcome::LoggedIn),
            session_valid: AtomicBool::new(true),
            index: Mutex::new(Vec::new()),
            movies: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            listing_failure: Mutex::new(None),
            verify_failure: Mutex::new(None),
            fetch_result: Mutex::new(Err(Failure::NotFound)),
            index_fetches: AtomicUsize::new(0),
            movie_searches: AtomicUsize::new(0),
            login_opens: AtomicUsize::new(0),
            login_submits: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.requires_login = false;
        self
    }

    pub fn with_index(self, entries: &[(&str, &str)]) -> Self {
        self.set_index(entries);
        self
    }

    pub fn with_movie(self, title: &str, id: &str) -> Self {
        locked(&self.movies).push((title.to_string(), id.to_string()));
        self
    }

    pub fn with_candidates(self, candidates: Vec<Candidate>) -> Self {
        *locked(&self.candidates) = candidates;
        self
    }

    pub fn with_login_page(self, page: LoginPage) -> Self {
        *locked(&self.login_page) = page;
        self
    }

    pub fn with_login_outcome(self, outcome: LoginOutcome) -> Self {
        *locked(&self.login_outcome) = outcome;
        self
    }

    pub fn failing_listing(self, failure: Failure) -> Self {
        *locked(&self.listing_failure) = Some(failure);
        self
    }

    pub fn with_file(self, body: &[u8], content_length: Option<u64>) -> Self {
        *locked(&self.fetch_result) = Ok(FetchedSubtitle {
            bytes: body.to_vec(),
            content_type: Some("application/x-subrip".to_string()),
            content_length,
        });
        self
    }

    pub fn failing_fetch(self, failure: Failure) -> Self {
        *locked(&self.fetch_result) = Err(failure);
        self
    }

    pub fn set_index(&self, entries: &[(&str, &str)]) {
        *locked(&self.index) = entries
            .iter()
            .map(|(title, id)| TitleListing {
                title: (*title).to_string(),
                id: (*id).to_string(),
            })
            .collect();
    }

    pub fn set_listing_failure(&self, failure: Option<Failure>) {
        *locked(&self.listing_failure) = failure;
    }

    /// Makes the next session check fail once.
    pub fn fail_next_verify(&self, failure: Failure) {
        *locked(&self.verify_failure) = Some(failure);
    }

    pub fn expire_sessions(&self) {
        self.session_valid.store(false, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubtitleSource for FakeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn requires_login(&self) -> bool {
        self.requires_login
    }

    fn user_agent(&self) -> &str {
        "FakeAgent/1.0"
    }

    async fn verify_session(&self, session: &mut SourceSession) -> Result<bool, SourceError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = locked(&self.verify_failure).take() {
            return Err(failure.to_error(&self.id));
        }
        Ok(session.authenticated && self.session_valid.load(Ordering::SeqCst))
    }

    async fn open_login(&self, session: &mut SourceSession) -> Result<LoginPage, SourceError> {
        self.login_opens.fetch_add(1, Ordering::SeqCst);
        session.cookies.insert("visitor", "1");
        Ok(locked(&self.login_page).clone())
    }

    async fn submit_login(
        &self,
        session: &mut SourceSession,
        _credentials: &Credentials,
        _captcha: Option<&CaptchaAnswer>,
    ) -> Result<LoginOutcome, SourceError> {
        self.login_submits.fetch_add(1, Ordering::SeqCst);
        let outcome = *locked(&self.login_outcome);
        if outcome == LoginOutcome::LoggedIn {
            session.cookies.insert("sid", "fake-session");
            self.session_valid.store(true, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    async fn fetch_title_index(
        &self,
        _session: &SourceSession,
    ) -> Result<Vec<TitleListing>, SourceError> {
        self.index_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(locked(&self.index).clone())
    }

    async fn search_movie_id(
        &self,
        _session: &SourceSession,
        title: &str,
        _year: Option<u16>,
    ) -> Result<Option<String>, SourceError> {
        self.movie_searches.fetch_add(1, Ordering::SeqCst);
        Ok(locked(&self.movies)
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(title))
            .map(|(_, id)| id.clone()))
    }

    async fn list_candidates(
        &self,
        _session: &SourceSession,
        _request: &ListingRequest,
    ) -> Result<Vec<Candidate>, SourceError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = locked(&self.listing_failure).as_ref() {
            return Err(failure.to_error(&self.id));
        }
        Ok(locked(&self.candidates).clone())
    }

    async fn fetch(
        &self,
        _session: &SourceSession,
        _candidate: &Candidate,
    ) -> Result<FetchedSubtitle, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        locked(&self.fetch_result)
            .clone()
            .map_err(|failure| failure.to_error(&self.id))
    }
}

/// Solver that never succeeds.
#[derive(Debug, Default)]
pub struct FailingSolver {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CaptchaSolver for FailingSolver {
    async fn solve(&self, _request: &CaptchaRequest) -> Result<String, CaptchaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CaptchaError::Failed {
            reason: "solver gave up".to_string(),
        })
    }
}

/// Solver that always returns the same token.
#[derive(Debug)]
pub struct FixedSolver {
    pub token: String,
    pub calls: AtomicUsize,
    pub last_site_key: Mutex<Option<String>>,
}

impl FixedSolver {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
            last_site_key: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, request: &CaptchaRequest) -> Result<String, CaptchaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *locked(&self.last_site_key) = Some(request.site_key.clone());
        Ok(self.token.clone())
    }
}

/// A complete candidate for season/episode in the given language code.
pub fn candidate(source_id: &str, language: &str, season: u32, episode: u32, version: &str) -> Candidate {
    Candidate {
        source_id: source_id.to_string(),
        language: language.parse::<Language>().unwrap_or_else(|_| Language::new("und")),
        version: version.to_string(),
        uploader: None,
        download_reference: format!("updated/{season}/{episode}/{version}"),
        page_reference: None,
        title: "The Show".to_string(),
        episode_title: None,
        season: Some(season),
        episode: Some(episode),
        year: None,
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at_unix(START_UNIX))
}

/// Runtime over the given sources with an in-memory cache.
pub fn runtime_with(
    sources: Vec<Arc<dyn SubtitleSource>>,
    solver: Arc<dyn CaptchaSolver>,
    clock: Arc<ManualClock>,
) -> Runtime {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    let cache = Arc::new(MemoryCacheStore::new(clock.clone()));
    Runtime::assemble(AppConfig::default(), registry, cache, None, solver, clock)
}

/// Gives every listed source the same working account.
pub fn configure_accounts(runtime: &Runtime, source_ids: &[&str]) {
    for source_id in source_ids {
        runtime
            .credentials()
            .set(source_id, Credentials::new("alice", "correct horse"));
    }
}
