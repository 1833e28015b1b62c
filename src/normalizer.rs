//! Title sanitization and fuzzy lookup-key generation.
//!
//! Source listings and caller-supplied titles disagree on case, punctuation,
//! apostrophes and ampersands. Both sides are passed through [`sanitize`]
//! before they meet in an index, and callers try the ordered alternatives
//! from [`key_variants`].

use std::sync::LazyLock;

use regex::Regex;

use crate::source::utils::compile_static_regex;

/// Characters replaced by a single space.
const SPACED_CHARACTERS: [char; 7] = ['-', ':', '(', ')', '.', ',', '/'];

/// Characters removed outright.
const DROPPED_CHARACTERS: [char; 2] = ['\'', '\u{2019}'];

/// Listing titles of the form `Name (2019)` or `Name (US)`.
static LISTING_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^(?P<name>.+?)\s*\((?P<suffix>\d{4})\)\s*$"));

/// Normalizes a title for lookup: lowercase, punctuation to spaces,
/// apostrophes removed, whitespace collapsed and trimmed.
///
/// `sanitize(sanitize(t)) == sanitize(t)` for every input.
///
/// # Examples
///
/// ```
/// use subscout_core::normalizer::sanitize;
///
/// assert_eq!(sanitize("Marvel's Agents of S.H.I.E.L.D."), "marvels agents of s h i e l d");
/// assert_eq!(sanitize("  The   Show (2020) "), "the show 2020");
/// ```
#[must_use]
pub fn sanitize(title: &str) -> String {
    let replaced: String = title
        .chars()
        .filter(|c| !DROPPED_CHARACTERS.contains(c))
        .map(|c| if SPACED_CHARACTERS.contains(&c) { ' ' } else { c })
        .collect();

    replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Returns the ordered, de-duplicated lookup keys for a title.
///
/// Order: plain sanitized title, title with periods removed, title with
/// `&` spelled out as `and`.
///
/// # Examples
///
/// ```
/// use subscout_core::normalizer::key_variants;
///
/// assert_eq!(
///     key_variants("Law & Order: S.V.U."),
///     vec!["law & order s v u", "law & order svu", "law and order s v u"]
/// );
/// ```
#[must_use]
pub fn key_variants(title: &str) -> Vec<String> {
    let candidates = [
        sanitize(title),
        sanitize(&title.replace('.', "")),
        sanitize(&title.replace('&', "and")),
    ];

    let mut keys: Vec<String> = Vec::with_capacity(candidates.len());
    for key in candidates {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Splits a raw listing title into its sanitized form and, when the listing
/// carries a trailing `(YYYY)`, the sanitized name without the year.
///
/// # Examples
///
/// ```
/// use subscout_core::normalizer::split_listing_title;
///
/// assert_eq!(
///     split_listing_title("The Show (2020)"),
///     ("the show 2020".to_string(), Some("the show".to_string()))
/// );
/// assert_eq!(split_listing_title("The Show"), ("the show".to_string(), None));
/// ```
#[must_use]
pub fn split_listing_title(raw: &str) -> (String, Option<String>) {
    let full = sanitize(raw);
    let bare = LISTING_SUFFIX_RE
        .captures(raw.trim())
        .and_then(|caps| caps.name("name").map(|m| sanitize(m.as_str())))
        .filter(|bare| !bare.is_empty() && *bare != full);
    (full, bare)
}
