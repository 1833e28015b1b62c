//! Sanitized title → source id index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalizer::split_listing_title;
use crate::source::{SourceError, TitleListing};

/// Lookup table built from a source's full title listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdIndex {
    entries: HashMap<String, String>,
}

impl IdIndex {
    /// Builds the index from raw listings.
    ///
    /// Every title is indexed under its sanitized form (`"the show 2020"`).
    /// Titles carrying a `(YYYY)` suffix are also indexed without the year
    /// unless that key already belongs to another listing. For duplicate
    /// keys the first listing wins. Ids that are `0` or not numeric are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Parse`] when no usable listing remains.
    pub fn from_listings(source_id: &str, listings: &[TitleListing]) -> Result<Self, SourceError> {
        let usable: Vec<(String, Option<String>, &str)> = listings
            .iter()
            .filter(|listing| is_usable_id(&listing.id))
            .map(|listing| {
                let (full, bare) = split_listing_title(&listing.title);
                (full, bare, listing.id.trim())
            })
            .filter(|(full, ..)| !full.is_empty())
            .collect();

        let mut entries = HashMap::with_capacity(usable.len() * 2);
        for (full, _, id) in &usable {
            entries
                .entry(full.clone())
                .or_insert_with(|| (*id).to_string());
        }
        for (_, bare, id) in &usable {
            if let Some(bare) = bare {
                entries
                    .entry(bare.clone())
                    .or_insert_with(|| (*id).to_string());
            }
        }

        if entries.is_empty() {
            return Err(SourceError::parse(source_id, "title index is empty"));
        }
        debug!(
            source = source_id,
            listings = listings.len(),
            keys = entries.len(),
            "built title index"
        );
        Ok(Self { entries })
    }

    /// Returns the id stored under an exact key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the index has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the id for the first variant that matches.
    ///
    /// For each key variant, in order: `"<key> <country>"`, then
    /// `"<key> <year>"`, then `"<key>"`.
    #[must_use]
    pub fn lookup(&self, variants: &[String], year: Option<u16>, country: Option<&str>) -> Option<String> {
        let country = country
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty());

        for key in variants {
            if let Some(country) = &country
                && let Some(id) = self.get(&format!("{key} {country}"))
            {
                return Some(id.to_string());
            }
            if let Some(year) = year
                && let Some(id) = self.get(&format!("{key} {year}"))
            {
                return Some(id.to_string());
            }
            if let Some(id) = self.get(key) {
                return Some(id.to_string());
            }
        }
        None
    }
}

fn is_usable_id(id: &str) -> bool {
    let id = id.trim();
    id.chars().all(|c| c.is_ascii_digit()) && !id.trim_start_matches('0').is_empty()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::normalizer::key_variants;

    fn listing(title: &str, id: &str) -> TitleListing {
        TitleListing {
            title: title.to_string(),
            id: id.to_string(),
        }
    }

    #[test]
    fn test_year_and_bare_keys() {
        let index = IdIndex::from_listings(
            "src",
            &[listing("The Show (2020)", "2"), listing("The Show", "1")],
        )
        .unwrap();
        assert_eq!(index.get("the show 2020"), Some("2"));
        assert_eq!(index.get("the show"), Some("1"));

        let variants = key_variants("The Show");
        assert_eq!(index.lookup(&variants, Some(2020), None).as_deref(), Some("2"));
        assert_eq!(index.lookup(&variants, None, None).as_deref(), Some("1"));
        assert_eq!(index.lookup(&variants, Some(1999), None).as_deref(), Some("1"));
    }

    #[test]
    fn test_bare_key_added_when_absent() {
        let index = IdIndex::from_listings("src", &[listing("Only Remake (2019)", "7")]).unwrap();
        assert_eq!(index.get("only remake"), Some("7"));
    }

    #[test]
    fn test_first_listing_wins_ties() {
        let index =
            IdIndex::from_listings("src", &[listing("Dup", "3"), listing("DUP", "4")]).unwrap();
        assert_eq!(index.get("dup"), Some("3"));
    }

    #[test]
    fn test_country_tier_before_year() {
        let index = IdIndex::from_listings(
            "src",
            &[
                listing("The Office (US)", "10"),
                listing("The Office (2005)", "11"),
                listing("The Office", "12"),
            ],
        )
        .unwrap();
        let variants = key_variants("The Office");
        assert_eq!(index.lookup(&variants, Some(2005), Some("US")).as_deref(), Some("10"));
        assert_eq!(index.lookup(&variants, Some(2005), None).as_deref(), Some("11"));
    }

    #[test]
    fn test_skips_placeholder_and_non_numeric_ids() {
        let index = IdIndex::from_listings(
            "src",
            &[listing("[Select a show]", "0"), listing("Bad", "abc"), listing("Good", "5")],
        )
        .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("good"), Some("5"));
    }

    #[test]
    fn test_empty_index_is_parse_error() {
        let result = IdIndex::from_listings("src", &[listing("Placeholder", "0")]);
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }

    #[test]
    fn test_variant_order_ampersand() {
        let index = IdIndex::from_listings("src", &[listing("Law and Order", "9")]).unwrap();
        assert_eq!(
            index.lookup(&key_variants("Law & Order"), None, None).as_deref(),
            Some("9")
        );
    }
}
