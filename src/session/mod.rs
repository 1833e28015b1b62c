//! Per-source login session lifecycle.
//!
//! [`SessionManager::acquire_session`] hands out a logged-in
//! [`SourceSession`] for a source, doing as little network work as possible:
//!
//! 1. A session verified within the freshness window is reused as is.
//! 2. An older in-memory or persisted session is re-checked with one cheap
//!    request ([`SubtitleSource::verify_session`]).
//! 3. Otherwise a full login runs: login page, CAPTCHA solve when the page
//!    is gated, form submission. Attempts are bounded by the login
//!    [`RetryPolicy`]; wrong credentials are never retried.
//!
//! Concurrent callers for one source wait on the same slot, so a burst of
//! searches triggers a single login.

pub mod captcha;
mod store;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use captcha::{CaptchaError, CaptchaRequest, CaptchaSolver, UnconfiguredSolver};
pub use store::{SessionStore, SessionStoreError};

use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::retry::{Attempt, RetryPolicy, retry};
use crate::source::http_client::CookieState;
use crate::source::{CaptchaAnswer, ErrorKind, LoginOutcome, LoginPage, SourceError, SubtitleSource};

/// Default window in which a verified session is reused without a check.
const DEFAULT_FRESHNESS: Duration = Duration::from_secs(30 * 60);

/// Default upper bound for one CAPTCHA solve.
const DEFAULT_CAPTCHA_TIMEOUT: Duration = Duration::from_secs(120);

/// Login attempts (CAPTCHA solve plus submission) before giving up.
const LOGIN_ATTEMPTS: u32 = 3;

/// Authenticated (or anonymous) state for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSession {
    /// Source identifier.
    pub source_id: String,
    /// Whether the cookies belong to a logged-in account.
    pub authenticated: bool,
    /// Cookies sent with every request.
    pub cookies: CookieState,
    /// Last time the session was known to be valid.
    pub last_verified_at: Option<SystemTime>,
    credentials_fingerprint: Option<String>,
}

impl SourceSession {
    /// Creates an empty, unauthenticated session.
    #[must_use]
    pub fn new(source_id: &str, credentials_fingerprint: Option<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            authenticated: false,
            cookies: CookieState::new(),
            last_verified_at: None,
            credentials_fingerprint,
        }
    }

    /// Returns true when verified within `freshness` of `now`.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime, freshness: Duration) -> bool {
        self.last_verified_at
            .and_then(|verified| now.duration_since(verified).ok())
            .is_some_and(|age| age < freshness)
    }

    /// Records that the session was just confirmed valid.
    pub fn mark_verified(&mut self, now: SystemTime) {
        self.last_verified_at = Some(now);
    }

    /// Returns true when the session was created for these credentials.
    #[must_use]
    pub fn belongs_to(&self, fingerprint: &str) -> bool {
        self.credentials_fingerprint.as_deref() == Some(fingerprint)
    }
}

/// Session manager tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window in which a verified session is reused without a check.
    pub freshness: Duration,
    /// Upper bound for one CAPTCHA solve.
    pub captcha_timeout: Duration,
    /// Bound on login attempts.
    pub login_policy: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            freshness: DEFAULT_FRESHNESS,
            captcha_timeout: DEFAULT_CAPTCHA_TIMEOUT,
            login_policy: RetryPolicy::new(
                LOGIN_ATTEMPTS,
                Duration::from_secs(2),
                Duration::from_secs(10),
                2.0,
            ),
        }
    }
}

type Slot = Arc<Mutex<Option<SourceSession>>>;

/// Owns one session slot per source.
#[derive(Debug)]
pub struct SessionManager {
    solver: Arc<dyn CaptchaSolver>,
    store: Option<SessionStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    slots: DashMap<String, Slot>,
}

impl SessionManager {
    /// Creates a manager. Without a `store`, sessions live only in memory.
    #[must_use]
    pub fn new(
        solver: Arc<dyn CaptchaSolver>,
        store: Option<SessionStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            solver,
            store,
            clock,
            config,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, source_id: &str) -> Slot {
        self.slots
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Returns a usable session for `source`, logging in if needed.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Configuration`] when the source needs credentials and
    ///   none (or incomplete ones) are given
    /// - [`SourceError::Authentication`] when the site rejects them
    /// - [`SourceError::CaptchaUnsolvable`] when the CAPTCHA cannot be solved
    /// - [`SourceError::RateLimited`] when the site refuses to serve a login
    #[instrument(skip(self, source, credentials), fields(source = source.id()))]
    pub async fn acquire_session(
        &self,
        source: &dyn SubtitleSource,
        credentials: Option<&Credentials>,
    ) -> Result<SourceSession, SourceError> {
        let source_id = source.id();
        let slot = self.slot(source_id);
        let mut guard = slot.lock().await;

        if !source.requires_login() {
            let session = guard
                .get_or_insert_with(|| SourceSession::new(source_id, None))
                .clone();
            return Ok(session);
        }

        let credentials = credentials
            .filter(|credentials| !credentials.is_incomplete())
            .ok_or_else(|| SourceError::configuration(source_id, "username and password are required"))?;
        let fingerprint = credentials.fingerprint();
        let now = self.clock.now();

        if let Some(session) = guard.as_ref()
            && session.belongs_to(&fingerprint)
            && session.is_fresh(now, self.config.freshness)
        {
            debug!("reusing fresh session");
            return Ok(session.clone());
        }

        let known = match guard.take() {
            Some(session) if session.belongs_to(&fingerprint) => Some(session),
            _ => self.load_persisted(source_id, &fingerprint).await,
        };

        if let Some(mut session) = known {
            match source.verify_session(&mut session).await {
                Ok(true) => {
                    debug!("session still valid");
                    session.mark_verified(now);
                    self.persist(&session).await;
                    *guard = Some(session.clone());
                    return Ok(session);
                }
                Ok(false) => info!("session expired; logging in again"),
                Err(error) if error.kind() == ErrorKind::RateLimited => {
                    *guard = Some(session);
                    return Err(error);
                }
                Err(error) => warn!(error = %error, "session check failed; logging in again"),
            }
        }

        let session = self.login(source, credentials, &fingerprint).await?;
        self.persist(&session).await;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn login(
        &self,
        source: &dyn SubtitleSource,
        credentials: &Credentials,
        fingerprint: &str,
    ) -> Result<SourceSession, SourceError> {
        retry(&self.config.login_policy, move |attempt| async move {
            self.login_attempt(source, credentials, fingerprint, attempt)
                .await
        })
        .await
    }

    async fn login_attempt(
        &self,
        source: &dyn SubtitleSource,
        credentials: &Credentials,
        fingerprint: &str,
        attempt: u32,
    ) -> Attempt<SourceSession, SourceError> {
        let source_id = source.id();
        let mut session = SourceSession::new(source_id, Some(fingerprint.to_string()));
        debug!(attempt, "logging in");

        let page = match source.open_login(&mut session).await {
            Ok(page) => page,
            Err(error) => return Attempt::Fail(error),
        };

        let answer = match page {
            LoginPage::Open => None,
            LoginPage::CaptchaWithoutKey => {
                return Attempt::Fail(SourceError::captcha_unsolvable(
                    source_id,
                    attempt,
                    "site key not found on login page",
                ));
            }
            LoginPage::Captcha(challenge) => {
                let request = CaptchaRequest {
                    site_key: challenge.site_key,
                    page_url: challenge.page_url,
                    user_agent: source.user_agent().to_string(),
                    cookies: session.cookies.header_value(),
                    invisible: challenge.invisible,
                };
                let solved =
                    tokio::time::timeout(self.config.captcha_timeout, self.solver.solve(&request))
                        .await;
                match solved {
                    Ok(Ok(token)) => Some(CaptchaAnswer {
                        field: challenge.field,
                        token,
                    }),
                    Ok(Err(error)) => {
                        warn!(attempt, error = %error, "CAPTCHA not solved");
                        return Attempt::Retry(SourceError::captcha_unsolvable(
                            source_id,
                            attempt,
                            &error.to_string(),
                        ));
                    }
                    Err(_) => {
                        warn!(attempt, "CAPTCHA solver timed out");
                        return Attempt::Retry(SourceError::captcha_unsolvable(
                            source_id,
                            attempt,
                            "solver timed out",
                        ));
                    }
                }
            }
        };

        match source
            .submit_login(&mut session, credentials, answer.as_ref())
            .await
        {
            Ok(LoginOutcome::LoggedIn) => {
                info!(attempt, "logged in");
                session.authenticated = true;
                session.mark_verified(self.clock.now());
                Attempt::Done(session)
            }
            Ok(LoginOutcome::RateLimited) => {
                Attempt::Fail(SourceError::rate_limited(source_id, None))
            }
            Ok(LoginOutcome::InvalidCredentials) => Attempt::Fail(SourceError::authentication(
                source_id,
                &credentials.username,
            )),
            Ok(LoginOutcome::Unrecognized) => {
                warn!(attempt, "unrecognized login response");
                Attempt::Retry(SourceError::authentication(
                    source_id,
                    &credentials.username,
                ))
            }
            Err(error) => Attempt::Fail(error),
        }
    }

    async fn load_persisted(&self, source_id: &str, fingerprint: &str) -> Option<SourceSession> {
        let store = self.store.as_ref()?;
        match store.load(source_id).await {
            Ok(Some(session)) if session.belongs_to(fingerprint) => Some(session),
            Ok(Some(_)) => {
                debug!("persisted session belongs to other credentials; ignoring");
                None
            }
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, "could not load persisted session");
                None
            }
        }
    }

    async fn persist(&self, session: &SourceSession) {
        if let Some(store) = &self.store
            && let Err(error) = store.save(session).await
        {
            warn!(source = %session.source_id, error = %error, "could not persist session");
        }
    }

    /// Drops the in-memory and persisted session of a source.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, source_id: &str) {
        let slot = self.slots.get(source_id).map(|slot| slot.clone());
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
        if let Some(store) = &self.store {
            match store.delete(source_id).await {
                Ok(true) => debug!("persisted session deleted"),
                Ok(false) => {}
                Err(error) => warn!(error = %error, "could not delete persisted session"),
            }
        }
        info!(source = source_id, "session invalidated");
    }

    /// Returns the in-memory session of a source, if any.
    pub async fn current(&self, source_id: &str) -> Option<SourceSession> {
        let slot = self.slots.get(source_id).map(|slot| slot.clone())?;
        let guard = slot.lock().await;
        guard.clone()
    }
}
