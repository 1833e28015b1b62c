//! End-to-end tests of the addic7ed scraper against a mock site.

mod support;

use std::sync::Arc;
use std::time::Duration;

use subscout_core::session::captcha::CaptchaSolver;
use subscout_core::source::addic7ed::Addic7edSource;
use subscout_core::{
    FetchError, Language, Runtime, SearchQuery, SkipReason, SourceOutcome, UnconfiguredSolver,
};
use support::{FixedSolver, configure_accounts, manual_clock, runtime_with};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCES: &[&str] = &["addic7ed"];
const SRT: &[u8] = b"1\n00:00:01,000 --> 00:00:02,000\nHi.\n";

const OPEN_LOGIN: &str = r#"<html><body><form action="dologin.php" method="post">
    <input name="username"><input name="password" type="password"></form></body></html>"#;

const GATED_LOGIN: &str = r#"<html><body><form action="dologin.php" method="post">
    <div class="g-recaptcha" data-sitekey="6LcTestKey"></div></form></body></html>"#;

const HOME: &str = r#"<html><body><select id="qsShow">
    <option value="0">[Select a TV Show]</option>
    <option value="1">The Show</option>
    <option value="2">The Show (2020)</option>
    </select></body></html>"#;

fn row(episode: u32, language: &str, status: &str, link: &str) -> String {
    format!(
        r#"<tr class="epeven completed"><td>1</td><td>{episode}</td>
        <td><a href="/serie/The_Show/1/{episode}/Pilot">Pilot</a></td>
        <td>{language}</td><td class="c">WEB</td><td class="c">{status}</td>
        <td class="c"></td><td class="c"></td><td class="c"></td>
        <td class="c"><a href="{link}">Download</a></td></tr>"#
    )
}

fn season_listing() -> String {
    format!(
        "<table>{}{}{}{}</table>",
        row(2, "English", "Completed", "/updated/1/100/0"),
        row(2, "Spanish", "Completed", "/updated/5/101/0"),
        row(2, "English", "75% Completed", "/updated/1/102/0"),
        row(3, "English", "Completed", "/updated/1/103/0"),
    )
}

async fn mount_login(server: &MockServer, login_page: &str) {
    Mock::given(method("GET"))
        .and(path("/login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dologin.php"))
        .and(body_string_contains("username=alice"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/index.php")
                .insert_header("Set-Cookie", "PHPSESSID=abc123; path=/"),
        )
        .mount(server)
        .await;
}

async fn mount_show(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ajax_loadShow.php"))
        .and(query_param("show", "1"))
        .and(query_param("season", "1"))
        .and(header("Cookie", "PHPSESSID=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(season_listing()))
        .mount(server)
        .await;
}

fn runtime_for(server: &MockServer, solver: Arc<dyn CaptchaSolver>) -> Runtime {
    let source = Addic7edSource::with_base_url(&server.uri(), Duration::from_secs(10)).unwrap();
    let runtime = runtime_with(vec![Arc::new(source)], solver, manual_clock());
    configure_accounts(&runtime, SOURCES);
    runtime
}

fn query() -> SearchQuery {
    SearchQuery::episode("The Show", 1, 2).with_languages(vec![Language::new("eng")])
}

fn ids() -> Vec<String> {
    SOURCES.iter().map(|id| (*id).to_string()).collect()
}

#[tokio::test]
async fn test_search_and_download_complete_english_episode() {
    let server = MockServer::start().await;
    mount_login(&server, OPEN_LOGIN).await;
    mount_show(&server).await;
    Mock::given(method("GET"))
        .and(path("/updated/1/100/0"))
        .and(header(
            "Referer",
            format!("{}/serie/The_Show/1/2/Pilot", server.uri()).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SRT, "application/x-subrip"))
        .expect(1)
        .mount(&server)
        .await;
    let runtime = runtime_for(&server, Arc::new(UnconfiguredSolver));

    let report = runtime.orchestrator().search(&query(), &ids()).await;
    let found: Vec<_> = report.candidates().cloned().collect();
    assert_eq!(found.len(), 1, "{report:?}");
    let chosen = &found[0];
    assert_eq!(chosen.download_reference, "updated/1/100/0");
    assert_eq!(chosen.season, Some(1));
    assert_eq!(chosen.title, "The Show");

    let bytes = runtime.downloader().fetch("addic7ed", chosen).await.unwrap();
    assert_eq!(bytes, SRT);
}

#[tokio::test]
async fn test_captcha_token_is_posted_with_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(GATED_LOGIN))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dologin.php"))
        .and(body_string_contains("g-recaptcha-response=tok-42"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Set-Cookie", "PHPSESSID=abc123; path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_show(&server).await;
    let solver = Arc::new(FixedSolver::new("tok-42"));
    let runtime = runtime_for(&server, solver.clone());

    let report = runtime.orchestrator().search(&query(), &ids()).await;

    assert_eq!(report.candidates().count(), 1, "{report:?}");
    assert_eq!(
        solver.last_site_key.lock().unwrap().as_deref(),
        Some("6LcTestKey")
    );
}

#[tokio::test]
async fn test_wrong_password_skips_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OPEN_LOGIN))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dologin.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Wrong password</p>"))
        .expect(1)
        .mount(&server)
        .await;
    let runtime = runtime_for(&server, Arc::new(UnconfiguredSolver));

    let report = runtime.orchestrator().search(&query(), &ids()).await;

    assert_eq!(
        report.outcomes["addic7ed"],
        SourceOutcome::Skipped(SkipReason::AuthenticationFailed)
    );
}

#[tokio::test]
async fn test_not_modified_listing_is_rate_limit() {
    let server = MockServer::start().await;
    mount_login(&server, OPEN_LOGIN).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOME))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ajax_loadShow.php"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    let runtime = runtime_for(&server, Arc::new(UnconfiguredSolver));

    let report = runtime.orchestrator().search(&query(), &ids()).await;

    assert_eq!(
        report.outcomes["addic7ed"],
        SourceOutcome::Skipped(SkipReason::RateLimited)
    );
    assert!(!runtime.throttle().is_available("addic7ed"));
}

#[tokio::test]
async fn test_html_download_is_quota_exhaustion() {
    let server = MockServer::start().await;
    mount_login(&server, OPEN_LOGIN).await;
    mount_show(&server).await;
    Mock::given(method("GET"))
        .and(path("/updated/1/100/0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html>Daily Download count exceeded</html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;
    let runtime = runtime_for(&server, Arc::new(UnconfiguredSolver));

    let report = runtime.orchestrator().search(&query(), &ids()).await;
    let chosen = report.candidates().next().cloned().unwrap();
    let downloader = runtime.downloader();

    let first = downloader.fetch("addic7ed", &chosen).await.unwrap_err();
    let second = downloader.fetch("addic7ed", &chosen).await.unwrap_err();

    assert!(matches!(first, FetchError::DownloadLimitExceeded { .. }), "{first:?}");
    assert!(matches!(second, FetchError::DownloadLimitExceeded { .. }), "{second:?}");
}

#[tokio::test]
async fn test_server_error_marks_source_unavailable() {
    let server = MockServer::start().await;
    mount_login(&server, OPEN_LOGIN).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let runtime = runtime_for(&server, Arc::new(UnconfiguredSolver));

    let report = runtime.orchestrator().search(&query(), &ids()).await;

    assert_eq!(
        report.outcomes["addic7ed"],
        SourceOutcome::Skipped(SkipReason::Unavailable)
    );
}
