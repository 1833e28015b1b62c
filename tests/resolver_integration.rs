//! Integration tests for title resolution and its cache.

mod support;

use std::sync::Arc;
use std::time::Duration;

use subscout_core::{
    Database, EntityResolver, ManualClock, MemoryCacheStore, ResolverConfig, SourceSession,
    SqliteCacheStore,
};
use support::{FakeSource, manual_clock};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn memory_resolver(clock: &Arc<ManualClock>) -> EntityResolver {
    let store = Arc::new(MemoryCacheStore::new(clock.clone()));
    EntityResolver::new(store, clock.clone(), ResolverConfig::default())
}

fn session(source: &FakeSource) -> SourceSession {
    use subscout_core::SubtitleSource;
    SourceSession::new(source.id(), None)
}

#[tokio::test]
async fn test_year_qualified_listing_wins_when_year_given() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("The Show", "1"), ("The Show (2020)", "2")]);
    let session = session(&source);

    let plain = resolver.resolve(&source, &session, "The Show", None, None).await.unwrap();
    let dated = resolver
        .resolve(&source, &session, "the show", Some(2020), None)
        .await
        .unwrap();
    let other_year = resolver
        .resolve(&source, &session, "The Show", Some(1999), None)
        .await
        .unwrap();

    assert_eq!(plain.as_deref(), Some("1"));
    assert_eq!(dated.as_deref(), Some("2"));
    assert_eq!(other_year.as_deref(), Some("1"));
    assert_eq!(FakeSource::count(&source.index_fetches), 1);
}

#[tokio::test]
async fn test_country_qualified_listing() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("The Office (US)", "8"), ("The Office", "3")]);
    let session = session(&source);

    let us = resolver
        .resolve(&source, &session, "The Office", None, Some("US"))
        .await
        .unwrap();
    let uk = resolver.resolve(&source, &session, "The Office", None, None).await.unwrap();

    assert_eq!(us.as_deref(), Some("8"));
    assert_eq!(uk.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_stale_index_refreshes_once_per_miss() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("Old Show", "5")]);
    let session = session(&source);

    assert_eq!(
        resolver.resolve(&source, &session, "Old Show", None, None).await.unwrap().as_deref(),
        Some("5")
    );
    assert_eq!(FakeSource::count(&source.index_fetches), 1);

    clock.advance(2 * DAY);
    source.set_index(&[("Old Show", "5"), ("New Show", "6")]);
    let found = resolver.resolve(&source, &session, "New Show", None, None).await.unwrap();
    assert_eq!(found.as_deref(), Some("6"));
    assert_eq!(FakeSource::count(&source.index_fetches), 2);

    clock.advance(2 * DAY);
    let missing = resolver.resolve(&source, &session, "Never Listed", None, None).await.unwrap();
    assert!(missing.is_none());
    assert_eq!(FakeSource::count(&source.index_fetches), 3);

    // The miss is cached: no further refresh.
    let missing = resolver.resolve(&source, &session, "Never Listed", None, None).await.unwrap();
    assert!(missing.is_none());
    assert_eq!(FakeSource::count(&source.index_fetches), 3);
}

#[tokio::test]
async fn test_recent_index_does_not_refresh_and_miss_expires() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("Old Show", "5")]);
    let session = session(&source);

    let first = resolver.resolve(&source, &session, "Late Show", None, None).await.unwrap();
    assert!(first.is_none());
    assert_eq!(FakeSource::count(&source.index_fetches), 1);

    source.set_index(&[("Old Show", "5"), ("Late Show", "9")]);
    clock.advance(Duration::from_secs(60 * 60));
    let cached = resolver.resolve(&source, &session, "Late Show", None, None).await.unwrap();
    assert!(cached.is_none(), "negative answer should be cached");
    assert_eq!(FakeSource::count(&source.index_fetches), 1);

    clock.advance(DAY);
    let found = resolver.resolve(&source, &session, "Late Show", None, None).await.unwrap();
    assert_eq!(found.as_deref(), Some("9"));
    assert_eq!(FakeSource::count(&source.index_fetches), 2);
}

#[tokio::test]
async fn test_purge_forces_refetch() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("The Show", "1")]);
    let session = session(&source);

    resolver.resolve(&source, &session, "The Show", None, None).await.unwrap();
    resolver.resolve(&source, &session, "Unknown", None, None).await.unwrap();
    assert!(resolver.purge("site").await >= 2);

    source.set_index(&[("The Show", "11")]);
    let id = resolver.resolve(&source, &session, "The Show", None, None).await.unwrap();
    assert_eq!(id.as_deref(), Some("11"));
    assert_eq!(FakeSource::count(&source.index_fetches), 2);
}

#[tokio::test]
async fn test_empty_index_is_an_error() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site");
    let session = session(&source);

    let result = resolver.resolve(&source, &session, "The Show", None, None).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_index(&[("The Show", "1"), ("Other Show", "2")]);
    let session = session(&source);

    let (a, b) = tokio::join!(
        resolver.resolve(&source, &session, "The Show", None, None),
        resolver.resolve(&source, &session, "Other Show", None, None),
    );

    assert_eq!(a.unwrap().as_deref(), Some("1"));
    assert_eq!(b.unwrap().as_deref(), Some("2"));
    assert_eq!(FakeSource::count(&source.index_fetches), 1);
}

#[tokio::test]
async fn test_movie_answers_are_cached() {
    let clock = manual_clock();
    let resolver = memory_resolver(&clock);
    let source = FakeSource::new("site").with_movie("Example Film", "55");
    let session = session(&source);

    for _ in 0..2 {
        let id = resolver
            .resolve_movie(&source, &session, "Example Film", Some(2021))
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("55"));
    }
    for _ in 0..2 {
        let id = resolver
            .resolve_movie(&source, &session, "Missing Film", None)
            .await
            .unwrap();
        assert!(id.is_none());
    }

    assert_eq!(FakeSource::count(&source.movie_searches), 2);
}

#[tokio::test]
async fn test_sqlite_cache_survives_new_resolver() {
    let clock = manual_clock();
    let db = Database::new_in_memory().await.unwrap();
    let source = FakeSource::new("site").with_index(&[("The Show", "1")]);
    let session = session(&source);

    let first = EntityResolver::new(
        Arc::new(SqliteCacheStore::new(db.clone(), clock.clone())),
        clock.clone(),
        ResolverConfig::default(),
    );
    first.resolve(&source, &session, "The Show", None, None).await.unwrap();

    let second = EntityResolver::new(
        Arc::new(SqliteCacheStore::new(db.clone(), clock.clone())),
        clock.clone(),
        ResolverConfig::default(),
    );
    let id = second.resolve(&source, &session, "The Show", None, None).await.unwrap();

    assert_eq!(id.as_deref(), Some("1"));
    assert_eq!(FakeSource::count(&source.index_fetches), 1);
}
