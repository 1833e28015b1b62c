//! Post-download checks on a fetched subtitle body.

use tracing::debug;

use super::FetchError;
use crate::source::FetchedSubtitle;
use crate::source::utils::looks_like_html;

/// Accepts a body only when it is non-empty, not an HTML page, and exactly
/// as long as the declared `Content-Length` (when one was sent).
pub(crate) fn verify(source_id: &str, fetched: &FetchedSubtitle) -> Result<(), FetchError> {
    let actual = fetched.bytes.len() as u64;
    if actual == 0 {
        return Err(FetchError::Empty {
            source_id: source_id.to_string(),
        });
    }
    if looks_like_html(fetched.content_type.as_deref(), &fetched.bytes) {
        return Err(FetchError::HtmlBody {
            source_id: source_id.to_string(),
        });
    }
    if let Some(expected) = fetched.content_length
        && expected != actual
    {
        return Err(FetchError::Integrity {
            source_id: source_id.to_string(),
            expected_bytes: expected,
            actual_bytes: actual,
        });
    }
    debug!(source = source_id, bytes = actual, "subtitle verified");
    Ok(())
}
