//! CAPTCHA solving seam for gated logins.
//!
//! Solving is delegated to an external service behind [`CaptchaSolver`].
//! Without one configured, [`UnconfiguredSolver`] fails every request and
//! CAPTCHA-gated sources end up skipped as unsolvable.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::source::utils::{compile_static_regex, first_capture};

/// Classic widget markup: `<div class="g-recaptcha" data-sitekey="...">`.
static WIDGET_SITE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"g-recaptcha.+?data-sitekey="(.+?)""#));

/// Script-driven markup: `grecaptcha.execute('...', {...})`.
static EXECUTE_SITE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"grecaptcha\.execute\('(.+?)',"));

/// Form field receiving the token for the widget markup.
pub const WIDGET_RESPONSE_FIELD: &str = "g-recaptcha-response";

/// Form field receiving the token for the script-driven markup.
pub const EXECUTE_RESPONSE_FIELD: &str = "recaptcha_response";

/// Site key and token field found in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecaptchaMarkup {
    /// reCAPTCHA site key.
    pub site_key: String,
    /// Form field the token is posted in.
    pub field: &'static str,
}

/// Finds a reCAPTCHA site key in a login page.
///
/// The widget markup is tried before the script-driven markup.
#[must_use]
pub fn extract_recaptcha(html: &str) -> Option<RecaptchaMarkup> {
    if let Some(site_key) = first_capture(html, &WIDGET_SITE_KEY_RE) {
        return Some(RecaptchaMarkup {
            site_key,
            field: WIDGET_RESPONSE_FIELD,
        });
    }
    first_capture(html, &EXECUTE_SITE_KEY_RE).map(|site_key| RecaptchaMarkup {
        site_key,
        field: EXECUTE_RESPONSE_FIELD,
    })
}

/// Everything a solver service needs to solve one challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptchaRequest {
    /// reCAPTCHA site key.
    pub site_key: String,
    /// Page the challenge was served on.
    pub page_url: String,
    /// User-Agent the token must be valid for.
    pub user_agent: String,
    /// `Cookie` header of the session, if any.
    pub cookies: Option<String>,
    /// Invisible challenge.
    pub invisible: bool,
}

impl fmt::Debug for CaptchaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaRequest")
            .field("site_key", &self.site_key)
            .field("page_url", &self.page_url)
            .field("invisible", &self.invisible)
            .finish_non_exhaustive()
    }
}

/// Errors from a CAPTCHA solver.
#[derive(Debug, Clone, Error)]
pub enum CaptchaError {
    /// No solver service is configured.
    #[error("no CAPTCHA solver configured\n  Suggestion: configure a solver service to use CAPTCHA-gated sources")]
    NotConfigured,

    /// The solver service gave up or refused.
    #[error("CAPTCHA solver failed: {reason}")]
    Failed {
        /// Solver-reported reason.
        reason: String,
    },
}

/// External CAPTCHA solving service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync + fmt::Debug {
    /// Solves a challenge, returning the response token.
    async fn solve(&self, request: &CaptchaRequest) -> Result<String, CaptchaError>;
}

/// Solver used when none is configured; always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSolver;

#[async_trait]
impl CaptchaSolver for UnconfiguredSolver {
    async fn solve(&self, _request: &CaptchaRequest) -> Result<String, CaptchaError> {
        Err(CaptchaError::NotConfigured)
    }
}
