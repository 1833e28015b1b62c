//! Error types for source operations.
//!
//! Errors follow the What/Why/Suggestion pattern used across the project.
//! [`SourceError::kind`] gives the copyable classification the orchestrator
//! and downloader branch on.

use std::time::Duration;

use thiserror::Error;

/// Classification of a [`SourceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or incomplete credentials.
    Configuration,
    /// The source rejected the credentials.
    Authentication,
    /// The source signalled abuse.
    RateLimited,
    /// The download quota is used up.
    DownloadLimitExceeded,
    /// The login CAPTCHA could not be solved.
    CaptchaUnsolvable,
    /// The requested item does not exist.
    NotFound,
    /// The source answered with a server error.
    Unavailable,
    /// Network failure or timeout.
    Transport,
    /// The response did not have the expected shape.
    Parse,
}

/// Errors raised while talking to a subtitle source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Credentials are missing or incomplete.
    #[error(
        "source '{source_id}' is not configured: {reason}\n  Suggestion: set username and password under [sources.{source_id}] in the config file"
    )]
    Configuration {
        /// Source identifier.
        source_id: String,
        /// What is missing.
        reason: String,
    },

    /// Login was rejected.
    #[error(
        "login to '{source_id}' failed for user '{username}'\n  Suggestion: check the username and password configured for this source"
    )]
    Authentication {
        /// Source identifier.
        source_id: String,
        /// Account that failed to log in.
        username: String,
    },

    /// The source asked us to slow down.
    #[error(
        "'{source_id}' is rate limiting requests{}\n  Suggestion: wait for the backoff to expire or reset it with `subscout reset-throttle {source_id}`",
        describe_retry_after(.retry_after)
    )]
    RateLimited {
        /// Source identifier.
        source_id: String,
        /// Server-provided wait, if any.
        retry_after: Option<Duration>,
    },

    /// The account's download quota is exhausted.
    #[error(
        "download quota reached on '{source_id}'\n  Suggestion: downloads resume automatically after the quota window"
    )]
    DownloadLimitExceeded {
        /// Source identifier.
        source_id: String,
    },

    /// CAPTCHA challenge could not be solved.
    #[error(
        "could not solve login CAPTCHA for '{source_id}' after {attempts} attempt(s): {reason}\n  Suggestion: check the CAPTCHA solver configuration"
    )]
    CaptchaUnsolvable {
        /// Source identifier.
        source_id: String,
        /// Attempts made.
        attempts: u32,
        /// Why the last attempt failed.
        reason: String,
    },

    /// The item does not exist on the source.
    #[error("'{reference}' not found on '{source_id}'")]
    NotFound {
        /// Source identifier.
        source_id: String,
        /// Reference that was requested.
        reference: String,
    },

    /// The source answered with a server error.
    #[error("'{source_id}' is unavailable (HTTP {status})\n  Suggestion: the site may be down; try again later")]
    Unavailable {
        /// Source identifier.
        source_id: String,
        /// HTTP status received.
        status: u16,
    },

    /// Network-level failure.
    #[error("request to '{source_id}' failed while {context}: {source}")]
    Transport {
        /// Source identifier.
        source_id: String,
        /// What was being done.
        context: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Unexpected response shape.
    #[error("unexpected response from '{source_id}': {reason}")]
    Parse {
        /// Source identifier.
        source_id: String,
        /// What did not match.
        reason: String,
    },
}

fn describe_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs()),
        None => String::new(),
    }
}

impl SourceError {
    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::DownloadLimitExceeded { .. } => ErrorKind::DownloadLimitExceeded,
            Self::CaptchaUnsolvable { .. } => ErrorKind::CaptchaUnsolvable,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Parse { .. } => ErrorKind::Parse,
        }
    }

    /// Creates a `Configuration` error.
    #[must_use]
    pub fn configuration(source_id: &str, reason: &str) -> Self {
        Self::Configuration {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates an `Authentication` error.
    #[must_use]
    pub fn authentication(source_id: &str, username: &str) -> Self {
        Self::Authentication {
            source_id: source_id.to_string(),
            username: username.to_string(),
        }
    }

    /// Creates a `RateLimited` error.
    #[must_use]
    pub fn rate_limited(source_id: &str, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            source_id: source_id.to_string(),
            retry_after,
        }
    }

    /// Creates a `CaptchaUnsolvable` error.
    #[must_use]
    pub fn captcha_unsolvable(source_id: &str, attempts: u32, reason: &str) -> Self {
        Self::CaptchaUnsolvable {
            source_id: source_id.to_string(),
            attempts,
            reason: reason.to_string(),
        }
    }

    /// Creates a `Transport` error.
    #[must_use]
    pub fn transport(source_id: &str, context: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            source_id: source_id.to_string(),
            context: context.to_string(),
            source,
        }
    }

    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(source_id: &str, reason: &str) -> Self {
        Self::Parse {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns the server's retry hint for `RateLimited` errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
