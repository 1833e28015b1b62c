//! addic7ed.com scraper.
//!
//! Login is CAPTCHA-gated and required for every request that matters.
//! TV shows resolve through the show picker on the home page; movies through
//! the site search. Season listings come from the site's XHR endpoint and
//! movie subtitles from the movie page.

pub mod language;
pub mod parse;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::http_client::{Redirects, build_source_http_client};
use super::{
    CaptchaAnswer, CaptchaChallenge, Candidate, FetchedSubtitle, ListingRequest, LoginOutcome,
    LoginPage, MediaKind, SourceError, SubtitleSource, TitleListing,
};
use crate::credentials::Credentials;
use crate::session::SourceSession;
use crate::session::captcha::extract_recaptcha;
use crate::throttle::parse_retry_after;
use crate::user_agent::random_browser_user_agent;

/// Identifier of this source.
pub const SOURCE_ID: &str = "addic7ed";

const DEFAULT_BASE_URL: &str = "https://www.addic7ed.com/";

/// Body marker of the site's abuse page.
const SLOW_DOWN_MARKER: &str = "relax, slow down";

/// Body markers of a rejected login.
const BAD_LOGIN_MARKERS: [&str; 2] = ["Wrong password", "doesn't exist"];

/// addic7ed.com source.
pub struct Addic7edSource {
    base_url: Url,
    user_agent: String,
    client: Client,
    manual_redirect_client: Client,
}

impl std::fmt::Debug for Addic7edSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addic7edSource")
            .field("base_url", &self.base_url.as_str())
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl Addic7edSource {
    /// Creates a source against the public site.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if client construction fails.
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    /// Creates a source against a custom host (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the URL is invalid or client construction fails.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|error| {
            SourceError::configuration(SOURCE_ID, &format!("invalid base URL '{normalized}': {error}"))
        })?;
        let user_agent = random_browser_user_agent();

        Ok(Self {
            client: build_source_http_client(SOURCE_ID, &user_agent, timeout, Redirects::Follow)?,
            manual_redirect_client: build_source_http_client(
                SOURCE_ID,
                &user_agent,
                timeout,
                Redirects::Manual,
            )?,
            base_url,
            user_agent,
        })
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url.join(path).map_err(|error| {
            SourceError::parse(SOURCE_ID, &format!("invalid path '{path}': {error}"))
        })
    }

    fn request(
        &self,
        client: &Client,
        url: Url,
        session: &SourceSession,
        referer: Option<&str>,
    ) -> RequestBuilder {
        let referer = referer.unwrap_or(self.base_url.as_str());
        let mut request = client.get(url).header(REFERER, referer);
        if let Some(cookies) = session.cookies.header_value() {
            request = request.header(COOKIE, cookies);
        }
        request
    }

    async fn send(request: RequestBuilder, context: &str) -> Result<Response, SourceError> {
        request
            .send()
            .await
            .map_err(|error| SourceError::transport(SOURCE_ID, context, error))
    }

    async fn body(response: Response, context: &str) -> Result<String, SourceError> {
        response
            .text()
            .await
            .map_err(|error| SourceError::transport(SOURCE_ID, context, error))
    }

    /// Maps abuse and server-error statuses to errors.
    fn check_status(response: &Response) -> Result<(), SourceError> {
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Err(SourceError::rate_limited(SOURCE_ID, None));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return Err(SourceError::rate_limited(SOURCE_ID, hint));
        }
        if status.is_server_error() {
            return Err(SourceError::Unavailable {
                source_id: SOURCE_ID.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Fetches an HTML page, treating the abuse page as a rate limit.
    async fn fetch_page(&self, request: RequestBuilder, context: &str) -> Result<String, SourceError> {
        let response = Self::send(request, context).await?;
        Self::check_status(&response)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::parse(
                SOURCE_ID,
                &format!("HTTP {} while {context}", status.as_u16()),
            ));
        }
        let body = Self::body(response, context).await?;
        if body.contains(SLOW_DOWN_MARKER) {
            return Err(SourceError::rate_limited(SOURCE_ID, None));
        }
        Ok(body)
    }

    async fn list_episodes(
        &self,
        session: &SourceSession,
        request: &ListingRequest,
    ) -> Result<Vec<Candidate>, SourceError> {
        let Some(season) = request.season else {
            return Err(SourceError::parse(SOURCE_ID, "episode listing needs a season"));
        };
        let show_page = self.url(&format!("show/{}", request.resolved_id))?;
        let mut url = self.url("ajax_loadShow.php")?;
        url.set_query(Some(&format!(
            "show={}&season={season}",
            urlencoding::encode(&request.resolved_id)
        )));

        info!(show_id = %request.resolved_id, season, "loading season listing");
        let html = self
            .fetch_page(
                self.request(&self.client, url, session, Some(show_page.as_str()))
                    .header("X-Requested-With", "XMLHttpRequest"),
                "loading season listing",
            )
            .await?;
        if html.trim().is_empty() {
            error!(show_id = %request.resolved_id, "no data returned for season listing");
            return Ok(Vec::new());
        }

        Ok(parse::parse_episode_rows(
            &html,
            &self.base_url,
            &request.title,
            request.year,
        ))
    }

    async fn list_movie(
        &self,
        session: &SourceSession,
        request: &ListingRequest,
    ) -> Result<Vec<Candidate>, SourceError> {
        let page = self.url(&format!("movie/{}", request.resolved_id))?;

        info!(movie_id = %request.resolved_id, "loading movie page");
        let html = self
            .fetch_page(
                self.request(&self.client, page.clone(), session, None)
                    .header("X-Requested-With", "XMLHttpRequest"),
                "loading movie page",
            )
            .await?;
        if html.trim().is_empty() {
            error!(movie_id = %request.resolved_id, "no data returned for movie page");
            return Ok(Vec::new());
        }

        Ok(parse::parse_movie_tables(
            &html,
            &page,
            &request.title,
            request.year,
        ))
    }
}

#[async_trait]
impl SubtitleSource for Addic7edSource {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[instrument(skip(self, session), fields(source = SOURCE_ID))]
    async fn verify_session(&self, session: &mut SourceSession) -> Result<bool, SourceError> {
        if session.cookies.is_empty() {
            return Ok(false);
        }
        let url = self.url("panel.php")?;
        let response = Self::send(
            self.request(&self.manual_redirect_client, url, session, None),
            "checking session",
        )
        .await?;
        Self::check_status(&response)?;
        session.cookies.absorb(response.headers());

        if response.status() == StatusCode::FOUND {
            info!("login expired");
            return Ok(false);
        }
        let valid = response.status().is_success();
        if valid {
            info!("re-using previous login");
        }
        Ok(valid)
    }

    #[instrument(skip(self, session), fields(source = SOURCE_ID))]
    async fn open_login(&self, session: &mut SourceSession) -> Result<LoginPage, SourceError> {
        let url = self.url("login.php")?;
        let response = Self::send(
            self.request(&self.client, url.clone(), session, None),
            "opening login page",
        )
        .await?;
        Self::check_status(&response)?;
        session.cookies.absorb(response.headers());
        let html = Self::body(response, "reading login page").await?;

        if !html.contains("g-recaptcha") && !html.contains("grecaptcha") {
            return Ok(LoginPage::Open);
        }

        info!("login is CAPTCHA-gated; solving may take a couple of minutes");
        Ok(match extract_recaptcha(&html) {
            Some(markup) => LoginPage::Captcha(CaptchaChallenge {
                site_key: markup.site_key,
                page_url: url.to_string(),
                field: markup.field.to_string(),
                invisible: true,
            }),
            None => {
                error!("CAPTCHA site key not found on login page");
                LoginPage::CaptchaWithoutKey
            }
        })
    }

    #[instrument(skip_all, fields(source = SOURCE_ID, username = %credentials.username))]
    async fn submit_login(
        &self,
        session: &mut SourceSession,
        credentials: &Credentials,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<LoginOutcome, SourceError> {
        let mut fields = vec![
            ("username", credentials.username.as_str()),
            ("password", credentials.password()),
            ("Submit", "Log in"),
            ("url", ""),
            ("remember", "true"),
        ];
        if let Some(answer) = captcha {
            fields.push((answer.field.as_str(), answer.token.as_str()));
        }
        let body = fields
            .iter()
            .map(|(name, value)| {
                format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");

        let url = self.url("dologin.php")?;
        let referer = self.url("login.php")?;
        let mut request = self
            .manual_redirect_client
            .post(url)
            .header(REFERER, referer.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if let Some(cookies) = session.cookies.header_value() {
            request = request.header(COOKIE, cookies);
        }

        let response = Self::send(request, "submitting login").await?;
        let status = response.status();
        session.cookies.absorb(response.headers());
        let html = Self::body(response, "reading login response").await?;

        if html.contains(SLOW_DOWN_MARKER) {
            warn!("login refused: slow down");
            return Ok(LoginOutcome::RateLimited);
        }
        if BAD_LOGIN_MARKERS.iter().any(|marker| html.contains(marker)) {
            return Ok(LoginOutcome::InvalidCredentials);
        }
        if status == StatusCode::FOUND {
            return Ok(LoginOutcome::LoggedIn);
        }
        debug!(status = status.as_u16(), "login response not recognized");
        Ok(LoginOutcome::Unrecognized)
    }

    #[instrument(skip_all, fields(source = SOURCE_ID))]
    async fn fetch_title_index(
        &self,
        session: &SourceSession,
    ) -> Result<Vec<TitleListing>, SourceError> {
        info!("getting show ids");
        let html = self
            .fetch_page(
                self.request(&self.client, self.base_url.clone(), session, None),
                "loading show index",
            )
            .await?;
        let listings = parse::parse_show_index(&html);
        debug!(count = listings.len(), "show listings found");
        Ok(listings)
    }

    #[instrument(skip(self, session), fields(source = SOURCE_ID))]
    async fn search_movie_id(
        &self,
        session: &SourceSession,
        title: &str,
        year: Option<u16>,
    ) -> Result<Option<String>, SourceError> {
        let mut url = self.url("search.php")?;
        url.set_query(Some(&format!("search={}", urlencoding::encode(title))));
        let html = self
            .fetch_page(
                self.request(&self.client, url, session, None),
                "searching movies",
            )
            .await?;
        let movie_id = parse::parse_movie_search(&html, title, year);
        debug!(?movie_id, "movie search finished");
        Ok(movie_id)
    }

    #[instrument(skip_all, fields(source = SOURCE_ID, id = %request.resolved_id, kind = ?request.media_kind))]
    async fn list_candidates(
        &self,
        session: &SourceSession,
        request: &ListingRequest,
    ) -> Result<Vec<Candidate>, SourceError> {
        match request.media_kind {
            MediaKind::Episode => self.list_episodes(session, request).await,
            MediaKind::Movie => self.list_movie(session, request).await,
        }
    }

    #[instrument(skip_all, fields(source = SOURCE_ID, reference = %candidate.download_reference))]
    async fn fetch(
        &self,
        session: &SourceSession,
        candidate: &Candidate,
    ) -> Result<FetchedSubtitle, SourceError> {
        let url = self.url(&candidate.download_reference)?;
        let request = self.request(
            &self.client,
            url,
            session,
            candidate.page_reference.as_deref(),
        );

        let response = Self::send(request, "downloading subtitle").await?;
        Self::check_status(&response)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound {
                source_id: SOURCE_ID.to_string(),
                reference: candidate.download_reference.clone(),
            });
        }
        if !status.is_success() {
            return Err(SourceError::parse(
                SOURCE_ID,
                &format!("HTTP {} while downloading subtitle", status.as_u16()),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/html"))
        {
            // The site answers quota exhaustion with an HTML page instead of the file.
            return Err(SourceError::DownloadLimitExceeded {
                source_id: SOURCE_ID.to_string(),
            });
        }
        let content_length = response.content_length();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| SourceError::transport(SOURCE_ID, "reading subtitle body", error))?;

        Ok(FetchedSubtitle {
            bytes: bytes.to_vec(),
            content_type,
            content_length,
        })
    }
}
