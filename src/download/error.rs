//! Error types for fetching a chosen candidate.

use std::time::Duration;

use thiserror::Error;

use crate::source::SourceError;

/// Errors from [`Downloader::fetch`](super::Downloader::fetch).
///
/// Verification failures never carry partial bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No source with this id is registered.
    #[error("unknown source '{source_id}'\n  Suggestion: check the source id against the [sources] tables in the config file")]
    UnknownSource {
        /// Requested id.
        source_id: String,
    },

    /// The download quota of the source is used up.
    #[error("download limit reached for '{source_id}'; retry in {}s", retry_in.as_secs())]
    DownloadLimitExceeded {
        /// Source identifier.
        source_id: String,
        /// Time until downloads are allowed again.
        retry_in: Duration,
    },

    /// The source is backing off.
    #[error("source '{source_id}' is rate limited; retry in {}s\n  Suggestion: wait, or run `subscout reset-throttle {source_id}`", retry_in.as_secs())]
    RateLimited {
        /// Source identifier.
        source_id: String,
        /// Time until the source may be queried again.
        retry_in: Duration,
    },

    /// The file does not exist on the source.
    #[error("subtitle not found on '{source_id}': {reference}")]
    NotFound {
        /// Source identifier.
        source_id: String,
        /// Download reference that was requested.
        reference: String,
    },

    /// The body is empty.
    #[error("empty subtitle file from '{source_id}'")]
    Empty {
        /// Source identifier.
        source_id: String,
    },

    /// The body is an HTML page, not a subtitle.
    #[error("'{source_id}' returned an HTML page instead of a subtitle file")]
    HtmlBody {
        /// Source identifier.
        source_id: String,
    },

    /// Downloaded size does not match `Content-Length`.
    #[error("integrity check failed for '{source_id}': expected {expected_bytes} bytes, got {actual_bytes}")]
    Integrity {
        /// Source identifier.
        source_id: String,
        /// Declared size.
        expected_bytes: u64,
        /// Received size.
        actual_bytes: u64,
    },

    /// Any other source failure (session, transport, parse).
    #[error(transparent)]
    Source(#[from] SourceError),
}
