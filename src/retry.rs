//! Bounded retry with exponential backoff and jitter.
//!
//! Sources are never retried automatically. The one exception is the login
//! handshake, where a CAPTCHA solve or an unrecognized login answer is worth
//! another go. Those attempts run through [`retry`] with a [`RetryPolicy`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use subscout_core::retry::{Attempt, RetryPolicy, retry};
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1), 2.0);
//! let result: Result<u32, &str> = retry(&policy, |attempt| async move {
//!     if attempt < 2 { Attempt::Retry("not yet") } else { Attempt::Done(attempt) }
//! })
//! .await;
//! assert_eq!(result, Ok(2));
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default maximum attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Result of one attempt inside [`retry`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished successfully.
    Done(T),
    /// Failed in a way another attempt may fix.
    Retry(E),
    /// Failed permanently; stop immediately.
    Fail(E),
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculates the delay after a failed attempt (1-indexed), jitter included.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + Self::jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter() -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Runs `op` until it returns [`Attempt::Done`], [`Attempt::Fail`], or the
/// policy's attempts are used up.
///
/// `op` receives the 1-indexed attempt number. After an exhausted
/// [`Attempt::Retry`] the last error is returned.
///
/// # Errors
///
/// Returns the error carried by the final failed attempt.
#[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(error) => {
                debug!(attempt, "attempt failed permanently");
                return Err(error);
            }
            Attempt::Retry(error) => {
                if attempt >= policy.max_attempts {
                    debug!(attempt, "max attempts reached");
                    return Err(error);
                }
                let delay = policy.calculate_delay(attempt);
                debug!(
                    attempt,
                    next_attempt = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_default_policy() {
        assert_eq!(RetryPolicy::default().max_attempts(), 3);
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(4), 2.0);
        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1500));
        let second = policy.calculate_delay(2);
        assert!(second >= Duration::from_secs(2) && second <= Duration::from_millis(2500));
        let capped = policy.calculate_delay(10);
        assert!(capped >= Duration::from_secs(4) && capped <= Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::with_max_attempts(3);
        let result: Result<(), &str> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("again") }
        })
        .await;
        assert_eq!(result, Err("again"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fail_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::with_max_attempts(3);
        let result: Result<(), &str> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Fail("no") }
        })
        .await;
        assert_eq!(result, Err("no"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
