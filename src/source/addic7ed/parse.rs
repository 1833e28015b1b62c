//! HTML parsing for addic7ed pages.
//!
//! Parsers never fail: rows that do not have the expected shape are
//! skipped with a debug log, and the caller decides whether an empty result
//! is an error.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::SOURCE_ID;
use super::language::from_addic7ed_name;
use crate::normalizer::sanitize;
use crate::source::utils::{compile_static_regex, compile_static_selector, element_text};
use crate::source::{Candidate, TitleListing};

static SHOW_OPTION: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("select#qsShow option"));
static SEARCH_LINK: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("table.tabel a[href]"));
static EPISODE_ROW: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tr.epeven"));
static CELL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("td"));
static LINK: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a[href]"));
static MOVIE_TABLE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("table.tabel95"));
static NEWS_TITLE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("td.NewsTitle"));
static UPLOADER: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"a[href^="/user/"]"#));
static LANGUAGE_CELL: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("td.language"));
static STATUS_CELL: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("td.language + td"));
static DOWNLOAD_BUTTON: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector("a.buttonDownload[href]"));
static HI_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| compile_static_selector(r#"img[src$="hi.jpg"]"#));

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"Version\s(.+?),"));
static TITLE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^(.+)\s\((\d{4})\)$"));

/// Reads the show picker on the home page.
#[must_use]
pub fn parse_show_index(html: &str) -> Vec<TitleListing> {
    let document = Html::parse_document(html);
    document
        .select(&SHOW_OPTION)
        .filter_map(|option| {
            let id = option.value().attr("value")?.trim().to_string();
            let title = element_text(&option);
            (!title.is_empty()).then_some(TitleListing { title, id })
        })
        .collect()
}

/// Finds a movie id in search results by sanitized title and year.
///
/// Without a year, the first title match wins.
#[must_use]
pub fn parse_movie_search(html: &str, title: &str, year: Option<u16>) -> Option<String> {
    let document = Html::parse_document(html);
    let wanted = sanitize(title);

    for link in document.select(&SEARCH_LINK) {
        let href = link.value().attr("href").unwrap_or_default();
        let Some((kind, media_id)) = href.trim_start_matches('/').split_once('/') else {
            continue;
        };
        if kind != "movie" || media_id.is_empty() {
            continue;
        }

        let text = element_text(&link);
        let Some(caps) = TITLE_YEAR_RE.captures(&text) else {
            continue;
        };
        let name_matches = sanitize(&caps[1]) == wanted;
        let year_matches = year.is_none_or(|year| caps[2] == year.to_string());
        if name_matches && year_matches {
            return Some(media_id.to_string());
        }
    }

    debug!(title, ?year, "movie not found in search results");
    None
}

/// Reads the rows of a season listing (`ajax_loadShow.php`).
///
/// Column layout: season, episode, title/link, language, version, status,
/// hearing impaired, (two unused), download link.
#[must_use]
pub fn parse_episode_rows(html: &str, base: &Url, series: &str, year: Option<u16>) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();

    for row in document.select(&EPISODE_ROW) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
        if cells.len() < 10 {
            debug!(cells = cells.len(), "skipping short listing row");
            continue;
        }

        let status = element_text(&cells[5]);
        if status.contains('%') {
            debug!(status, "skipping incomplete subtitle");
            continue;
        }

        let language_name = element_text(&cells[3]);
        let Some(language) = from_addic7ed_name(&language_name) else {
            debug!(language = language_name, "skipping unknown language");
            continue;
        };
        let hearing_impaired = !element_text(&cells[6]).is_empty();

        let (Ok(season), Ok(episode)) = (
            element_text(&cells[0]).parse::<u32>(),
            element_text(&cells[1]).parse::<u32>(),
        ) else {
            debug!("skipping row without season/episode numbers");
            continue;
        };

        let Some(download_href) = first_href(&cells[9]) else {
            debug!("skipping row without download link");
            continue;
        };
        let page_reference = first_href(&cells[2]).and_then(|href| base.join(&href).ok());

        candidates.push(Candidate {
            source_id: SOURCE_ID.to_string(),
            language: language.rebuild(hearing_impaired, false),
            version: element_text(&cells[4]),
            uploader: None,
            download_reference: download_href.trim_start_matches('/').to_string(),
            page_reference: page_reference.map(String::from),
            title: series.to_string(),
            episode_title: Some(element_text(&cells[2])).filter(|t| !t.is_empty()),
            season: Some(season),
            episode: Some(episode),
            year,
        });
    }

    candidates
}

/// Reads the subtitle tables of a movie page (`movie/<id>`).
#[must_use]
pub fn parse_movie_tables(
    html: &str,
    page_url: &Url,
    title: &str,
    year: Option<u16>,
) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();

    for table in document.select(&MOVIE_TABLE) {
        let Some(news_title) = table.select(&NEWS_TITLE).next() else {
            continue;
        };

        let status = table
            .select(&STATUS_CELL)
            .next()
            .map(|cell| element_text(&cell))
            .unwrap_or_default();
        if status.contains('%') {
            debug!(status, "skipping incomplete subtitle");
            continue;
        }

        let Some(language_cell) = table.select(&LANGUAGE_CELL).next() else {
            continue;
        };
        // The language cell also holds favorite links; the name is the first text node.
        let language_name = language_cell
            .text()
            .map(str::trim)
            .find(|text| !text.is_empty())
            .unwrap_or_default();
        let Some(language) = from_addic7ed_name(language_name) else {
            debug!(language = language_name, "skipping unknown language");
            continue;
        };

        let Some(download_href) = table
            .select(&DOWNLOAD_BUTTON)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            debug!("skipping table without download link");
            continue;
        };

        let hearing_impaired = table.select(&HI_IMAGE).next().is_some();
        let version = VERSION_RE
            .captures(&element_text(&news_title))
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default();
        let uploader = table
            .select(&UPLOADER)
            .next()
            .map(|link| element_text(&link))
            .filter(|name| !name.is_empty());

        candidates.push(Candidate {
            source_id: SOURCE_ID.to_string(),
            language: language.rebuild(hearing_impaired, false),
            version,
            uploader,
            download_reference: download_href.trim_start_matches('/').to_string(),
            page_reference: Some(page_url.to_string()),
            title: title.to_string(),
            episode_title: None,
            season: None,
            episode: None,
            year,
        });
    }

    candidates
}

fn first_href(cell: &ElementRef<'_>) -> Option<String> {
    cell.select(&LINK)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_string)
}
