//! Canonical language model shared by every source.
//!
//! A [`Language`] is an ISO 639-3 code with optional country and script
//! qualifiers, plus the hearing-impaired and forced variant flags. Sources
//! convert their own markers (display names, flags, ids) into this model; see
//! `source::addic7ed::language` for an example.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// ISO 639-1 to ISO 639-3 codes for languages sources commonly list.
const ALPHA2_TO_ALPHA3: &[(&str, &str)] = &[
    ("ar", "ara"),
    ("az", "aze"),
    ("bg", "bul"),
    ("bn", "ben"),
    ("bs", "bos"),
    ("ca", "cat"),
    ("cs", "ces"),
    ("da", "dan"),
    ("de", "deu"),
    ("el", "ell"),
    ("en", "eng"),
    ("es", "spa"),
    ("eu", "eus"),
    ("fa", "fas"),
    ("fi", "fin"),
    ("fr", "fra"),
    ("gl", "glg"),
    ("he", "heb"),
    ("hr", "hrv"),
    ("hu", "hun"),
    ("hy", "hye"),
    ("id", "ind"),
    ("it", "ita"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("mk", "mkd"),
    ("ms", "msa"),
    ("nl", "nld"),
    ("no", "nor"),
    ("pl", "pol"),
    ("pt", "por"),
    ("ro", "ron"),
    ("ru", "rus"),
    ("sk", "slk"),
    ("sl", "slv"),
    ("sq", "sqi"),
    ("sr", "srp"),
    ("sv", "swe"),
    ("th", "tha"),
    ("tr", "tur"),
    ("uk", "ukr"),
    ("vi", "vie"),
    ("zh", "zho"),
];

/// Error returned when a language code cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized language code '{code}'\n  Suggestion: use an ISO 639-1/639-3 code such as 'en', 'eng' or 'pt-BR', optionally suffixed with ':hi' or ':forced'")]
pub struct LanguageParseError {
    /// The code that failed to parse.
    pub code: String,
}

/// A canonical subtitle language with variant flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language {
    /// ISO 639-3 code, lowercase.
    pub alpha3: String,
    /// ISO 3166 country qualifier, uppercase (e.g. `BR` for Brazilian Portuguese).
    pub country: Option<String>,
    /// ISO 15924 script qualifier, title case (e.g. `Latn`).
    pub script: Option<String>,
    /// Hearing-impaired captions (sound descriptions, speaker labels).
    pub hi: bool,
    /// Forced subtitles (foreign-dialogue parts only).
    pub forced: bool,
}

impl Language {
    /// Creates a plain language from an ISO 639-3 code.
    #[must_use]
    pub fn new(alpha3: &str) -> Self {
        Self {
            alpha3: alpha3.to_ascii_lowercase(),
            country: None,
            script: None,
            hi: false,
            forced: false,
        }
    }

    /// Adds a country qualifier.
    #[must_use]
    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_ascii_uppercase());
        self
    }

    /// Adds a script qualifier.
    #[must_use]
    pub fn with_script(mut self, script: &str) -> Self {
        self.script = Some(title_case(script));
        self
    }

    /// Returns a copy with the variant flags replaced.
    #[must_use]
    pub fn rebuild(&self, hi: bool, forced: bool) -> Self {
        Self {
            hi,
            forced,
            ..self.clone()
        }
    }

    /// Returns the language without variant flags.
    #[must_use]
    pub fn base(&self) -> Self {
        self.rebuild(false, false)
    }

    /// Returns true when this language satisfies a requested language.
    ///
    /// Base language (code, country, script) and the forced flag must match.
    /// The hearing-impaired flag is left to the scorer.
    #[must_use]
    pub fn satisfies(&self, wanted: &Language) -> bool {
        self.alpha3 == wanted.alpha3
            && self.country == wanted.country
            && self.script == wanted.script
            && self.forced == wanted.forced
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alpha3)?;
        if let Some(script) = &self.script {
            write!(f, "-{script}")?;
        }
        if let Some(country) = &self.country {
            write!(f, "-{country}")?;
        }
        if self.forced {
            f.write_str(":forced")?;
        } else if self.hi {
            f.write_str(":hi")?;
        }
        Ok(())
    }
}

impl FromStr for Language {
    type Err = LanguageParseError;

    /// Parses `en`, `eng`, `pt-BR`, `sr-Latn`, `en:hi`, `en:forced`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let error = || LanguageParseError {
            code: raw.to_string(),
        };
        let (tag, flag) = match raw.trim().split_once(':') {
            Some((tag, flag)) => (tag, Some(flag.to_ascii_lowercase())),
            None => (raw.trim(), None),
        };

        let mut parts = tag.split(['-', '_']);
        let primary = parts.next().unwrap_or_default().to_ascii_lowercase();
        let alpha3 = match primary.len() {
            2 => ALPHA2_TO_ALPHA3
                .iter()
                .find(|(alpha2, _)| *alpha2 == primary)
                .map(|(_, alpha3)| (*alpha3).to_string())
                .ok_or_else(error)?,
            3 if primary.chars().all(|c| c.is_ascii_lowercase()) => primary,
            _ => return Err(error()),
        };

        let mut language = Language::new(&alpha3);
        for qualifier in parts {
            match qualifier.len() {
                2 => language = language.with_country(qualifier),
                4 => language = language.with_script(qualifier),
                _ => return Err(error()),
            }
        }

        match flag.as_deref() {
            None => {}
            Some("hi") => language.hi = true,
            Some("forced") => language.forced = true,
            Some(_) => return Err(error()),
        }
        Ok(language)
    }
}

fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alpha2_and_alpha3() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::new("eng"));
        assert_eq!("spa".parse::<Language>().unwrap(), Language::new("spa"));
    }

    #[test]
    fn test_parse_qualifiers_and_flags() {
        let lang: Language = "pt-BR:hi".parse().unwrap();
        assert_eq!(lang.alpha3, "por");
        assert_eq!(lang.country.as_deref(), Some("BR"));
        assert!(lang.hi);

        let lang: Language = "sr-latn".parse().unwrap();
        assert_eq!(lang.script.as_deref(), Some("Latn"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("english".parse::<Language>().is_err());
        assert!("xx".parse::<Language>().is_err());
        assert!("en:loud".parse::<Language>().is_err());
    }

    #[test]
    fn test_rebuild_sets_flags() {
        let hi = Language::new("eng").rebuild(true, false);
        assert!(hi.hi);
        assert_eq!(hi.base(), Language::new("eng"));
        assert_eq!(hi.to_string(), "eng:hi");
    }

    #[test]
    fn test_satisfies_ignores_hi_but_not_forced() {
        let wanted = Language::new("eng");
        assert!(Language::new("eng").rebuild(true, false).satisfies(&wanted));
        assert!(!Language::new("eng").rebuild(false, true).satisfies(&wanted));
        assert!(!Language::new("spa").satisfies(&wanted));
        assert!(!Language::new("por").with_country("BR").satisfies(&Language::new("por")));
    }
}
