//! Fetching and verifying a chosen candidate.
//!
//! [`Downloader::fetch`] runs under the source's lease, the same one a
//! search holds, so a download never races a login or an invalidation of
//! that source. Abuse signals seen while downloading feed the shared
//! [`Throttle`]: a quota page blocks further downloads, a rate-limit answer
//! blocks the whole source.
//!
//! A body is returned only after verification accepts it.

mod error;
mod verify;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub use error::FetchError;

use crate::credentials::CredentialStore;
use crate::session::SessionManager;
use crate::source::{Candidate, ErrorKind, SourceError, SourceRegistry};
use crate::throttle::Throttle;

/// Downloads subtitle files through their source.
#[derive(Clone)]
pub struct Downloader {
    registry: Arc<SourceRegistry>,
    sessions: Arc<SessionManager>,
    throttle: Arc<Throttle>,
    credentials: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader sharing state with the search side.
    #[must_use]
    pub fn new(
        registry: Arc<SourceRegistry>,
        sessions: Arc<SessionManager>,
        throttle: Arc<Throttle>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            registry,
            sessions,
            throttle,
            credentials,
        }
    }

    /// Downloads and verifies the file behind `candidate`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::RateLimited`] / [`FetchError::DownloadLimitExceeded`]
    ///   when the throttle gate is closed, or the source closes it now
    /// - [`FetchError::NotFound`] when the file is gone
    /// - [`FetchError::Empty`], [`FetchError::HtmlBody`],
    ///   [`FetchError::Integrity`] when verification fails
    /// - [`FetchError::Source`] for session and transport failures
    #[instrument(skip(self, candidate), fields(reference = %candidate.download_reference))]
    pub async fn fetch(&self, source_id: &str, candidate: &Candidate) -> Result<Vec<u8>, FetchError> {
        let unknown = || FetchError::UnknownSource {
            source_id: source_id.to_string(),
        };
        let source = self.registry.get(source_id).ok_or_else(unknown)?;
        self.check_gate(source_id)?;

        let _lease = self.registry.lease(source_id).await.ok_or_else(unknown)?;
        self.check_gate(source_id)?;

        let credentials = self.credentials.get_credentials(source_id);
        let session = match self
            .sessions
            .acquire_session(source.as_ref(), credentials.as_ref())
            .await
        {
            Ok(session) => session,
            Err(error) => return Err(self.record_failure(source_id, error)),
        };

        let fetched = match source.fetch(&session, candidate).await {
            Ok(fetched) => fetched,
            Err(error) => return Err(self.record_failure(source_id, error)),
        };

        if let Err(error) = verify::verify(source_id, &fetched) {
            if matches!(error, FetchError::HtmlBody { .. }) {
                // An HTML body in place of a file is how quota pages look.
                self.throttle.record_download_limited(source_id);
            }
            warn!(error = %error, "downloaded file rejected");
            return Err(error);
        }

        self.throttle.record_success(source_id);
        info!(bytes = fetched.bytes.len(), "subtitle downloaded");
        Ok(fetched.bytes)
    }

    fn check_gate(&self, source_id: &str) -> Result<(), FetchError> {
        if let Some(retry_in) = self.throttle.retry_in(source_id) {
            debug!(retry_secs = retry_in.as_secs(), "source backing off");
            return Err(FetchError::RateLimited {
                source_id: source_id.to_string(),
                retry_in,
            });
        }
        if let Some(retry_in) = self.throttle.download_retry_in(source_id) {
            debug!(retry_secs = retry_in.as_secs(), "download quota exhausted");
            return Err(FetchError::DownloadLimitExceeded {
                source_id: source_id.to_string(),
                retry_in,
            });
        }
        Ok(())
    }

    fn record_failure(&self, source_id: &str, error: SourceError) -> FetchError {
        match error {
            SourceError::DownloadLimitExceeded { .. } => {
                let retry_in = self.throttle.record_download_limited(source_id);
                FetchError::DownloadLimitExceeded {
                    source_id: source_id.to_string(),
                    retry_in,
                }
            }
            SourceError::RateLimited { retry_after, .. } => {
                let retry_in = self.throttle.record_rate_limited(source_id, retry_after);
                FetchError::RateLimited {
                    source_id: source_id.to_string(),
                    retry_in,
                }
            }
            SourceError::NotFound { reference, .. } => FetchError::NotFound {
                source_id: source_id.to_string(),
                reference,
            },
            error => {
                if error.kind() == ErrorKind::Unavailable {
                    self.throttle.record_unavailable(source_id);
                }
                FetchError::Source(error)
            }
        }
    }
}
