//! Language display names used by addic7ed listings.

use crate::language::Language;

/// Names that need a country or script qualifier, or differ from the
/// English name of the base language.
const QUALIFIED_NAMES: &[(&str, &str, Option<&str>, Option<&str>)] = &[
    ("Portuguese (Brazilian)", "por", Some("BR"), None),
    ("French (Canadian)", "fra", Some("CA"), None),
    ("Serbian (Latin)", "srp", None, Some("Latn")),
    ("Serbian (Cyrillic)", "srp", None, Some("Cyrl")),
    ("Spanish (Latin America)", "spa", None, None),
    ("Spanish (Spain)", "spa", None, None),
    ("Chinese (Traditional)", "zho", None, None),
    ("Chinese (Simplified)", "zho", None, None),
    ("Gallego", "glg", None, None),
];

/// Plain English language names.
const PLAIN_NAMES: &[(&str, &str)] = &[
    ("Albanian", "sqi"),
    ("Arabic", "ara"),
    ("Armenian", "hye"),
    ("Azerbaijani", "aze"),
    ("Basque", "eus"),
    ("Bengali", "ben"),
    ("Bosnian", "bos"),
    ("Bulgarian", "bul"),
    ("Catalan", "cat"),
    ("Chinese", "zho"),
    ("Croatian", "hrv"),
    ("Czech", "ces"),
    ("Danish", "dan"),
    ("Dutch", "nld"),
    ("English", "eng"),
    ("Finnish", "fin"),
    ("French", "fra"),
    ("Galician", "glg"),
    ("German", "deu"),
    ("Greek", "ell"),
    ("Hebrew", "heb"),
    ("Hungarian", "hun"),
    ("Indonesian", "ind"),
    ("Italian", "ita"),
    ("Japanese", "jpn"),
    ("Korean", "kor"),
    ("Macedonian", "mkd"),
    ("Malay", "msa"),
    ("Norwegian", "nor"),
    ("Persian", "fas"),
    ("Polish", "pol"),
    ("Portuguese", "por"),
    ("Romanian", "ron"),
    ("Russian", "rus"),
    ("Serbian", "srp"),
    ("Slovak", "slk"),
    ("Slovenian", "slv"),
    ("Spanish", "spa"),
    ("Swedish", "swe"),
    ("Thai", "tha"),
    ("Turkish", "tur"),
    ("Ukrainian", "ukr"),
    ("Vietnamese", "vie"),
];

/// Converts an addic7ed language label into a [`Language`].
///
/// Returns `None` for labels the site uses that have no mapping.
#[must_use]
pub fn from_addic7ed_name(name: &str) -> Option<Language> {
    let name = name.trim();

    if let Some((_, alpha3, country, script)) = QUALIFIED_NAMES
        .iter()
        .find(|(label, ..)| label.eq_ignore_ascii_case(name))
    {
        let mut language = Language::new(alpha3);
        if let Some(country) = country {
            language = language.with_country(country);
        }
        if let Some(script) = script {
            language = language.with_script(script);
        }
        return Some(language);
    }

    PLAIN_NAMES
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name))
        .map(|(_, alpha3)| Language::new(alpha3))
}
