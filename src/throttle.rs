//! Per-source availability gate with exponential backoff.
//!
//! Sites signal abuse in their own ways (HTTP 304/429, a "slow down" page, a
//! quota page on download). Each signal is recorded here; until the backoff
//! window closes the source is skipped without any network traffic.
//!
//! State is tracked per source in a [`DashMap`]; each entry holds a small
//! mutex so a read-modify-write on one source never blocks another. Timing
//! uses [`tokio::time::Instant`], so tests can drive it with paused time.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use subscout_core::throttle::{Throttle, ThrottleConfig};
//!
//! let throttle = Throttle::new(ThrottleConfig::default());
//! assert!(throttle.is_available("addic7ed"));
//! throttle.record_rate_limited("addic7ed", Some(Duration::from_secs(60)));
//! assert!(!throttle.is_available("addic7ed"));
//! throttle.reset("addic7ed");
//! assert!(throttle.is_available("addic7ed"));
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default first backoff step when no hint is given.
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// Default backoff cap.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4 * 60 * 60);

/// Default cooldown after a source answers with a server error.
const DEFAULT_DOWN_COOLDOWN: Duration = Duration::from_secs(20 * 60);

/// Default download block after a quota page.
const DEFAULT_DOWNLOAD_LIMIT_COOLDOWN: Duration = Duration::from_secs(3 * 60 * 60);

/// Availability state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleStatus {
    /// Source may be queried.
    Ok,
    /// Source signalled abuse; backing off.
    RateLimited,
    /// Source answered with server errors; cooling down.
    Down,
}

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// First backoff step when a signal carries no hint.
    pub base_backoff: Duration,
    /// Upper bound for any backoff, hinted or computed.
    pub max_backoff: Duration,
    /// Cooldown applied by [`Throttle::record_unavailable`].
    pub down_cooldown: Duration,
    /// Download block applied by [`Throttle::record_download_limited`].
    pub download_limit_cooldown: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            down_cooldown: DEFAULT_DOWN_COOLDOWN,
            download_limit_cooldown: DEFAULT_DOWNLOAD_LIMIT_COOLDOWN,
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    status: ThrottleStatus,
    retry_after: Option<Instant>,
    consecutive_failures: u32,
    download_retry_after: Option<Instant>,
}

impl ThrottleState {
    fn new() -> Self {
        Self {
            status: ThrottleStatus::Ok,
            retry_after: None,
            consecutive_failures: 0,
            download_retry_after: None,
        }
    }

    /// Clears an expired backoff window. The failure streak is kept so the
    /// next signal backs off further.
    fn expire(&mut self, now: Instant) {
        if self.retry_after.is_some_and(|until| until <= now) {
            self.status = ThrottleStatus::Ok;
            self.retry_after = None;
        }
        if self.download_retry_after.is_some_and(|until| until <= now) {
            self.download_retry_after = None;
        }
    }
}

/// Point-in-time view of a throttled source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleSnapshot {
    /// Source identifier.
    pub source_id: String,
    /// Current status.
    pub status: ThrottleStatus,
    /// Remaining search backoff.
    pub retry_in: Option<Duration>,
    /// Wall-clock time the search backoff ends.
    pub available_at: Option<SystemTime>,
    /// Signals recorded since the last success.
    pub consecutive_failures: u32,
    /// Remaining download block.
    pub download_retry_in: Option<Duration>,
}

/// Per-source throttle shared by the orchestrator and downloader.
///
/// Wrap in `Arc` and share across tasks.
#[derive(Debug, Default)]
pub struct Throttle {
    config: ThrottleConfig,
    sources: DashMap<String, Arc<Mutex<ThrottleState>>>,
}

impl Throttle {
    /// Creates a throttle with every source available.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            sources: DashMap::new(),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Runs `f` against a source's state with expired windows cleared.
    fn with_state<R>(&self, source_id: &str, f: impl FnOnce(&mut ThrottleState, Instant) -> R) -> R {
        // Clone the Arc so the DashMap shard lock is released before locking the state.
        let state = self
            .sources
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ThrottleState::new())))
            .clone();
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        guard.expire(now);
        f(&mut guard, now)
    }

    /// Returns true when the source may be searched now.
    #[must_use]
    pub fn is_available(&self, source_id: &str) -> bool {
        self.with_state(source_id, |state, _| state.status == ThrottleStatus::Ok)
    }

    /// Returns true when the source may serve downloads now.
    #[must_use]
    pub fn is_download_available(&self, source_id: &str) -> bool {
        self.with_state(source_id, |state, _| {
            state.status == ThrottleStatus::Ok && state.download_retry_after.is_none()
        })
    }

    /// Remaining search backoff, if any.
    #[must_use]
    pub fn retry_in(&self, source_id: &str) -> Option<Duration> {
        self.with_state(source_id, |state, now| {
            state.retry_after.map(|until| until.saturating_duration_since(now))
        })
    }

    /// Remaining download block, if any. A search backoff also blocks downloads.
    #[must_use]
    pub fn download_retry_in(&self, source_id: &str) -> Option<Duration> {
        self.with_state(source_id, |state, now| {
            [state.retry_after, state.download_retry_after]
                .into_iter()
                .flatten()
                .max()
                .map(|until| until.saturating_duration_since(now))
        })
    }

    /// Records a successful exchange, ending the failure streak.
    #[instrument(skip(self))]
    pub fn record_success(&self, source_id: &str) {
        self.with_state(source_id, |state, _| {
            if state.consecutive_failures > 0 {
                debug!(
                    failures = state.consecutive_failures,
                    "source recovered, clearing failure streak"
                );
            }
            state.consecutive_failures = 0;
        });
    }

    /// Records a rate-limit signal and returns the backoff applied.
    ///
    /// A server hint is honored (capped at `max_backoff`); otherwise the
    /// backoff is `base_backoff * 2^(failures-1)`, capped.
    #[instrument(skip(self), fields(hint_secs = hint.map(|h| h.as_secs())))]
    pub fn record_rate_limited(&self, source_id: &str, hint: Option<Duration>) -> Duration {
        let config = &self.config;
        self.with_state(source_id, |state, now| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let backoff = match hint {
                Some(hint) => hint.min(config.max_backoff),
                None => exponential_backoff(
                    config.base_backoff,
                    config.max_backoff,
                    state.consecutive_failures,
                ),
            };
            state.status = ThrottleStatus::RateLimited;
            state.retry_after = Some(now + backoff);
            warn!(
                source = source_id,
                backoff_secs = backoff.as_secs(),
                failures = state.consecutive_failures,
                "source rate limited, backing off"
            );
            backoff
        })
    }

    /// Marks the source down for the configured cooldown after a server error.
    #[instrument(skip(self))]
    pub fn record_unavailable(&self, source_id: &str) -> Duration {
        let cooldown = self.config.down_cooldown;
        self.with_state(source_id, |state, now| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.status = ThrottleStatus::Down;
            state.retry_after = Some(now + cooldown);
            warn!(
                source = source_id,
                cooldown_secs = cooldown.as_secs(),
                "source unavailable, cooling down"
            );
            cooldown
        })
    }

    /// Blocks downloads (not searches) after the source served a quota page.
    #[instrument(skip(self))]
    pub fn record_download_limited(&self, source_id: &str) -> Duration {
        let cooldown = self.config.download_limit_cooldown;
        self.with_state(source_id, |state, now| {
            state.download_retry_after = Some(now + cooldown);
            warn!(
                source = source_id,
                cooldown_secs = cooldown.as_secs(),
                "download quota reached"
            );
            cooldown
        })
    }

    /// Returns the source to `Ok` immediately, clearing every window.
    #[instrument(skip(self))]
    pub fn reset(&self, source_id: &str) {
        if !self.sources.contains_key(source_id) {
            return;
        }
        self.with_state(source_id, |state, _| *state = ThrottleState::new());
        info!(source = source_id, "throttle reset");
    }

    /// Re-applies windows recorded by an earlier process.
    ///
    /// Zero or missing waits leave the corresponding window open.
    #[instrument(skip(self))]
    pub fn restore(
        &self,
        source_id: &str,
        status: ThrottleStatus,
        retry_in: Option<Duration>,
        download_retry_in: Option<Duration>,
        consecutive_failures: u32,
    ) {
        self.with_state(source_id, |state, now| {
            state.consecutive_failures = consecutive_failures;
            if let Some(wait) = retry_in.filter(|wait| !wait.is_zero())
                && status != ThrottleStatus::Ok
            {
                state.status = status;
                state.retry_after = Some(now + wait);
            }
            if let Some(wait) = download_retry_in.filter(|wait| !wait.is_zero()) {
                state.download_retry_after = Some(now + wait);
            }
            debug!(?state, "throttle state restored");
        });
    }

    /// Lists sources that are currently backing off or download-blocked.
    #[must_use]
    pub fn list_throttled(&self) -> Vec<ThrottleSnapshot> {
        let ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        let wall_now = SystemTime::now();
        let mut snapshots: Vec<ThrottleSnapshot> = ids
            .into_iter()
            .filter_map(|source_id| {
                self.with_state(&source_id, |state, now| {
                    let retry_in = state
                        .retry_after
                        .map(|until| until.saturating_duration_since(now));
                    let download_retry_in = state
                        .download_retry_after
                        .map(|until| until.saturating_duration_since(now));
                    (state.status != ThrottleStatus::Ok || download_retry_in.is_some()).then(|| {
                        ThrottleSnapshot {
                            source_id: source_id.clone(),
                            status: state.status,
                            retry_in,
                            available_at: retry_in.map(|wait| wall_now + wait),
                            consecutive_failures: state.consecutive_failures,
                            download_retry_in,
                        }
                    })
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        snapshots
    }
}

fn exponential_backoff(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use subscout_core::throttle::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn throttle() -> Throttle {
        Throttle::new(ThrottleConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_expires_after_window() {
        let throttle = throttle();
        let applied = throttle.record_rate_limited("a", Some(Duration::from_secs(60)));
        assert_eq!(applied, Duration::from_secs(60));
        assert!(!throttle.is_available("a"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!throttle.is_available("a"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(throttle.is_available("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_reapplies_windows() {
        let throttle = throttle();
        throttle.restore(
            "a",
            ThrottleStatus::Down,
            Some(Duration::from_secs(30)),
            Some(Duration::from_secs(90)),
            2,
        );
        assert!(!throttle.is_available("a"));
        let snapshot = &throttle.list_throttled()[0];
        assert_eq!(snapshot.status, ThrottleStatus::Down);
        assert_eq!(snapshot.consecutive_failures, 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(throttle.is_available("a"));
        assert!(!throttle.is_download_available("a"));

        throttle.restore("b", ThrottleStatus::RateLimited, Some(Duration::ZERO), None, 1);
        assert!(throttle.is_available("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_immediately() {
        let throttle = throttle();
        throttle.record_rate_limited("a", Some(Duration::from_secs(60)));
        throttle.record_download_limited("a");
        throttle.reset("a");
        assert!(throttle.is_available("a"));
        assert!(throttle.is_download_available("a"));
        assert!(throttle.list_throttled().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_keeps_state_shared_with_inflight_writers() {
        let throttle = throttle();
        throttle.record_rate_limited("a", None);
        throttle.record_rate_limited("a", None);
        let held = throttle.sources.get("a").unwrap().clone();

        throttle.reset("a");
        assert!(Arc::ptr_eq(&held, &throttle.sources.get("a").unwrap()));

        // A writer that cloned the state before the reset still lands.
        held.lock().unwrap().status = ThrottleStatus::RateLimited;
        held.lock().unwrap().retry_after = Some(Instant::now() + Duration::from_secs(30));
        assert!(!throttle.is_available("a"));

        throttle.reset("a");
        let applied = throttle.record_rate_limited("a", None);
        assert_eq!(applied, ThrottleConfig::default().base_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_caps() {
        let throttle = throttle();
        assert_eq!(
            throttle.record_rate_limited("a", None),
            Duration::from_secs(600)
        );
        assert_eq!(
            throttle.record_rate_limited("a", None),
            Duration::from_secs(1200)
        );
        for _ in 0..10 {
            throttle.record_rate_limited("a", None);
        }
        assert_eq!(throttle.retry_in("a"), Some(DEFAULT_MAX_BACKOFF));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_is_capped() {
        let throttle = throttle();
        let applied = throttle.record_rate_limited("a", Some(Duration::from_secs(999_999)));
        assert_eq!(applied, DEFAULT_MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_streak_but_not_window() {
        let throttle = throttle();
        throttle.record_rate_limited("a", None);
        throttle.record_success("a");
        assert!(!throttle.is_available("a"));
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(
            throttle.record_rate_limited("a", None),
            Duration::from_secs(600)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_status_and_listing() {
        let throttle = throttle();
        throttle.record_unavailable("b");
        throttle.record_download_limited("a");
        let listed = throttle.list_throttled();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].source_id, "a");
        assert_eq!(listed[0].status, ThrottleStatus::Ok);
        assert!(listed[0].download_retry_in.is_some());
        assert_eq!(listed[1].status, ThrottleStatus::Down);
        assert_eq!(listed[1].retry_in, Some(DEFAULT_DOWN_COOLDOWN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_block_leaves_search_open() {
        let throttle = throttle();
        throttle.record_download_limited("a");
        assert!(throttle.is_available("a"));
        assert!(!throttle.is_download_available("a"));
        tokio::time::advance(DEFAULT_DOWNLOAD_LIMIT_COOLDOWN).await;
        assert!(throttle.is_download_available("a"));
    }

    #[test]
    fn test_parse_retry_after_formats() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("99999"), Some(MAX_RETRY_AFTER));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }
}
