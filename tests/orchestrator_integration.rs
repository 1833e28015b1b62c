//! Integration tests for multi-source search.
//!
//! Sources are in-memory fakes; time is paused so login retries and
//! throttle windows run instantly.

mod support;

use std::sync::Arc;
use std::time::Duration;

use subscout_core::source::LoginOutcome;
use subscout_core::{
    Language, SearchQuery, SearchRun, SkipReason, SourceOutcome, SubtitleSource, ThrottleStatus,
    UnconfiguredSolver,
};
use support::{Failure, FakeSource, candidate, configure_accounts, manual_clock, runtime_with};

fn english_episode_query() -> SearchQuery {
    SearchQuery::episode("The Show", 1, 2).with_languages(vec![Language::new("eng")])
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_search_isolates_failing_sources() {
    let auth = Arc::new(
        FakeSource::new("auth")
            .with_index(&[("The Show", "1")])
            .with_login_outcome(LoginOutcome::InvalidCredentials),
    );
    let limited = Arc::new(
        FakeSource::new("limited")
            .with_index(&[("The Show", "4")])
            .failing_listing(Failure::RateLimited(Some(Duration::from_secs(60)))),
    );
    let good = Arc::new(FakeSource::new("good").with_index(&[("The Show", "7")]).with_candidates(vec![
        candidate("good", "en", 1, 2, "WEB"),
        candidate("good", "en", 1, 2, "HDTV"),
        candidate("good", "es", 1, 2, "WEB"),
        candidate("good", "en", 1, 3, "WEB"),
    ]));
    let runtime = runtime_with(
        vec![auth.clone(), limited.clone(), good.clone()],
        Arc::new(UnconfiguredSolver),
        manual_clock(),
    );
    configure_accounts(&runtime, &["auth", "limited", "good"]);

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["auth", "limited", "good"]))
        .await;

    assert_eq!(
        report.outcomes["auth"],
        SourceOutcome::Skipped(SkipReason::AuthenticationFailed)
    );
    assert_eq!(
        report.outcomes["limited"],
        SourceOutcome::Skipped(SkipReason::RateLimited)
    );
    let SourceOutcome::Candidates(found) = &report.outcomes["good"] else {
        panic!("good source should produce candidates: {report:?}");
    };
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|c| c.language.alpha3 == "eng" && c.episode == Some(2)));
    assert_eq!(report.candidates().count(), 2);
    assert_eq!(report.skipped().count(), 2);

    assert!(!runtime.throttle().is_available("limited"));
    assert!(runtime.throttle().is_available("good"));
    // Wrong credentials are never retried.
    assert_eq!(FakeSource::count(&auth.login_submits), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_keeps_auth_failures_disabled_and_throttle_skips() {
    let auth = Arc::new(
        FakeSource::new("auth").with_login_outcome(LoginOutcome::InvalidCredentials),
    );
    let limited = Arc::new(
        FakeSource::new("limited")
            .with_index(&[("The Show", "4")])
            .failing_listing(Failure::RateLimited(Some(Duration::from_secs(60)))),
    );
    let runtime = runtime_with(
        vec![auth.clone(), limited.clone()],
        Arc::new(UnconfiguredSolver),
        manual_clock(),
    );
    configure_accounts(&runtime, &["auth", "limited"]);
    let orchestrator = runtime.orchestrator();
    let run = SearchRun::new();
    let sources = ids(&["auth", "limited"]);

    orchestrator
        .search_in_run(&english_episode_query(), &sources, &run)
        .await;
    assert!(run.is_disabled("auth"));

    let second = orchestrator
        .search_in_run(&english_episode_query(), &sources, &run)
        .await;
    assert_eq!(
        second.outcomes["auth"],
        SourceOutcome::Skipped(SkipReason::DisabledForRun)
    );
    assert!(matches!(
        second.outcomes["limited"],
        SourceOutcome::Skipped(SkipReason::Throttled { retry_in }) if retry_in <= Duration::from_secs(60)
    ));
    assert_eq!(FakeSource::count(&auth.login_submits), 1);
    assert_eq!(FakeSource::count(&limited.listings), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    limited.set_listing_failure(None);
    let third = orchestrator
        .search(&english_episode_query(), &ids(&["limited"]))
        .await;
    assert_eq!(third.outcomes["limited"], SourceOutcome::Candidates(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_is_not_configured() {
    let source = Arc::new(FakeSource::new("locked").with_index(&[("The Show", "1")]));
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["locked"]))
        .await;

    assert_eq!(
        report.outcomes["locked"],
        SourceOutcome::Skipped(SkipReason::NotConfigured)
    );
    assert_eq!(FakeSource::count(&source.login_opens), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_title_and_unknown_source() {
    let source = Arc::new(FakeSource::new("open").anonymous().with_index(&[("Another Show", "3")]));
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["open", "nope"]))
        .await;

    assert_eq!(report.outcomes["open"], SourceOutcome::Candidates(Vec::new()));
    assert_eq!(
        report.outcomes["nope"],
        SourceOutcome::Skipped(SkipReason::UnknownSource)
    );
    assert_eq!(FakeSource::count(&source.listings), 0);
}

#[tokio::test(start_paused = true)]
async fn test_alternate_title_used_when_main_title_missing() {
    let source = Arc::new(
        FakeSource::new("open")
            .anonymous()
            .with_index(&[("La Serie", "9")])
            .with_candidates(vec![candidate("open", "en", 1, 2, "WEB")]),
    );
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());
    let query = english_episode_query().with_alternate_title("La Serie");

    let report = runtime.orchestrator().search(&query, &ids(&["open"])).await;

    assert_eq!(report.candidates().count(), 1);
    assert_eq!(FakeSource::count(&source.index_fetches), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_marks_source_down() {
    let source = Arc::new(
        FakeSource::new("flaky")
            .anonymous()
            .with_index(&[("The Show", "2")])
            .failing_listing(Failure::Unavailable),
    );
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["flaky"]))
        .await;

    assert_eq!(
        report.outcomes["flaky"],
        SourceOutcome::Skipped(SkipReason::Unavailable)
    );
    let throttled = runtime.throttle().list_throttled();
    assert_eq!(throttled.len(), 1);
    assert_eq!(throttled[0].status, ThrottleStatus::Down);
}

#[tokio::test(start_paused = true)]
async fn test_parse_failure_is_reported_not_raised() {
    let source = Arc::new(
        FakeSource::new("odd")
            .anonymous()
            .with_index(&[("The Show", "2")])
            .failing_listing(Failure::Parse),
    );
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["odd"]))
        .await;

    assert!(matches!(
        &report.outcomes["odd"],
        SourceOutcome::Skipped(SkipReason::Error { message }) if message.contains("unexpected markup")
    ));
    assert!(runtime.throttle().is_available("odd"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_source_still_gets_an_outcome() {
    let broken = Arc::new(
        FakeSource::new("broken")
            .anonymous()
            .with_index(&[("The Show", "2")])
            .failing_listing(Failure::Panic),
    );
    let good = Arc::new(
        FakeSource::new("good")
            .anonymous()
            .with_index(&[("The Show", "7")])
            .with_candidates(vec![candidate("good", "eng", 1, 2, "LOL")]),
    );
    let runtime = runtime_with(
        vec![broken.clone(), good.clone()],
        Arc::new(UnconfiguredSolver),
        manual_clock(),
    );

    let report = runtime
        .orchestrator()
        .search(&english_episode_query(), &ids(&["broken", "good"]))
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(
        &report.outcomes["broken"],
        SourceOutcome::Skipped(SkipReason::Error { message }) if message.contains("source task failed")
    ));
    assert!(matches!(&report.outcomes["good"], SourceOutcome::Candidates(found) if found.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn test_movie_search_uses_site_search() {
    let source = Arc::new(
        FakeSource::new("films")
            .anonymous()
            .with_movie("Example Film", "55")
            .with_candidates(vec![candidate("films", "en", 0, 0, "BluRay")]),
    );
    let runtime = runtime_with(vec![source.clone()], Arc::new(UnconfiguredSolver), manual_clock());
    let query = SearchQuery::movie("Example Film").with_year(2021);

    let report = runtime.orchestrator().search(&query, &ids(&["films"])).await;

    assert_eq!(report.candidates().count(), 1);
    assert_eq!(FakeSource::count(&source.movie_searches), 1);
    assert_eq!(FakeSource::count(&source.index_fetches), 0);
    assert_eq!(source.id(), "films");
}
