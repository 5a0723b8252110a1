//! Retry governance for remote list calls.
//!
//! This crate provides the pieces the discovery engine wraps around every
//! paginated list call:
//! - A transient-error classifier driven by diagnostic substrings
//! - Exponential backoff capped at a maximum delay, with uniform jitter
//! - A [`Deadline`] that every sleep and every in-flight call races against
//!
//! # Example
//!
//! ```
//! use ocidump_retry::{RetryConfig, backoff_delay};
//!
//! let config = RetryConfig::default();
//! // Sleep before the second attempt: 2s +/- 10% jitter.
//! let delay = backoff_delay(&config, 1);
//! assert!(delay.as_millis() >= 1800 && delay.as_millis() <= 2200);
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Diagnostic substrings that mark a remote failure as transient.
/// Matching is case-insensitive against the error's display string.
pub const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "connection reset",
    "temporary failure",
    "service unavailable",
    "too many requests",
    "rate limit",
    "internal server error",
    "502",
    "503",
    "504",
];

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Error is transient and should be retried
    Transient,
    /// Error is permanent and is returned immediately
    Permanent,
}

/// Classify a remote failure by its diagnostic string.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Configuration for the retry governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay doubled on each attempt.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Cap applied to the backoff before jitter.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.1 = uniform in +/-10% of the base).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Calculate the sleep before the attempt following `attempt` (1-indexed).
///
/// The base is `base_delay * 2^(attempt-1)` capped at `max_delay`; jitter
/// multiplies it by a uniform factor in `[1 - jitter, 1 + jitter]`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let base = config
        .base_delay
        .saturating_mul(2_u32.saturating_pow(pow))
        .min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(base, config.jitter)
    } else {
        base
    }
}

/// Apply jitter to a delay value.
/// Jitter factor of 0.1 means delay * (0.9 to 1.1).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// The parent deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// An absolute point in time that bounds a whole discovery run.
///
/// Every backoff sleep and every in-flight remote call is raced against the
/// deadline, so nothing outlives it: when it fires the caller unwinds without
/// waiting for the wrapped call to return.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// A deadline at an absolute instant.
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Race a future against the deadline. The future is dropped when the
    /// deadline fires first.
    pub async fn race<T>(&self, fut: impl Future<Output = T>) -> Result<T, DeadlineExceeded> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = tokio::time::sleep_until(self.at) => Err(DeadlineExceeded),
        }
    }

    /// Sleep for `delay`, returning early with an error if the deadline
    /// fires first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), DeadlineExceeded> {
        self.race(tokio::time::sleep(delay)).await
    }
}

/// Terminal outcome of a governed operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was classified permanent and returned immediately.
    Permanent(E),
    /// The error stayed transient through the last retry.
    Exhausted(E),
    /// The parent deadline fired during an attempt or a backoff sleep.
    DeadlineExceeded,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Permanent(e) => write!(f, "permanent error: {e}"),
            RetryError::Exhausted(e) => write!(f, "retries exhausted: {e}"),
            RetryError::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl<E> RetryError<E> {
    pub fn is_deadline(&self) -> bool {
        matches!(self, RetryError::DeadlineExceeded)
    }
}

/// A retry governor that runs one remote operation under classified retries
/// and a parent deadline.
#[derive(Debug, Clone)]
pub struct RetryGovernor {
    config: RetryConfig,
}

impl RetryGovernor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` with up to `max_retries` retries.
    ///
    /// The operation receives the current attempt number (starting at 1) and
    /// is raced against `deadline`; so is every backoff sleep. Once the
    /// deadline fires the governor returns [`RetryError::DeadlineExceeded`]
    /// and never resumes.
    pub async fn run<T, E, F, Fut>(
        &self,
        deadline: Deadline,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            if deadline.expired() {
                return Err(RetryError::DeadlineExceeded);
            }

            let outcome = match deadline.race(operation(attempt)).await {
                Ok(outcome) => outcome,
                Err(DeadlineExceeded) => return Err(RetryError::DeadlineExceeded),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err.to_string()) == ErrorClass::Permanent {
                return Err(RetryError::Permanent(err));
            }
            if attempt > self.config.max_retries {
                return Err(RetryError::Exhausted(err));
            }

            let delay = backoff_delay(&self.config, attempt);
            if deadline.sleep(delay).await.is_err() {
                return Err(RetryError::DeadlineExceeded);
            }
        }
    }
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn classify_matches_transient_markers_case_insensitive() {
        assert_eq!(classify("request Timeout talking to iaas"), ErrorClass::Transient);
        assert_eq!(classify("Connection Reset by peer"), ErrorClass::Transient);
        assert_eq!(classify("HTTP 503 from gateway"), ErrorClass::Transient);
        assert_eq!(classify("Too Many Requests"), ErrorClass::Transient);
        assert_eq!(classify("rate limit exceeded"), ErrorClass::Transient);
    }

    #[test]
    fn classify_defaults_to_permanent() {
        assert_eq!(classify("NotAuthorizedOrNotFound"), ErrorClass::Permanent);
        assert_eq!(classify("400 invalid parameter"), ErrorClass::Permanent);
        assert_eq!(classify(""), ErrorClass::Permanent);
    }

    #[test]
    fn backoff_progression_stays_in_jitter_bands() {
        let config = RetryConfig::default();

        // Sleeps before attempts 2, 3, 4: base 2/4/8s, each +/- 10%.
        for (attempt, lo, hi) in [(1, 1800, 2200), (2, 3600, 4400), (3, 7200, 8800)] {
            for _ in 0..100 {
                let d = backoff_delay(&config, attempt).as_millis() as u64;
                assert!(d >= lo && d <= hi, "attempt {attempt}: {d}ms outside [{lo}, {hi}]");
            }
        }
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };

        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(16));
        assert_eq!(backoff_delay(&config, 5), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 12), Duration::from_secs(30));
    }

    #[test]
    fn retry_config_serde_roundtrip() {
        let json = r#"{
            "max_retries": 5,
            "base_delay": "1s",
            "max_delay": "20s",
            "jitter": 0.2
        }"#;

        let config: RetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(20));
        assert!((config.jitter - 0.2).abs() < 0.001);
    }

    #[tokio::test]
    async fn governor_returns_first_success() {
        let governor = RetryGovernor::default();
        let deadline = Deadline::after(Duration::from_secs(60));

        let result: Result<&str, RetryError<String>> =
            governor.run(deadline, |_| async { Ok("page") }).await;
        assert!(matches!(result, Ok("page")));
    }

    #[tokio::test(start_paused = true)]
    async fn governor_retries_transient_until_success() {
        let governor = RetryGovernor::default();
        let deadline = Deadline::after(Duration::from_secs(120));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<&str, RetryError<String>> = governor
            .run(deadline, move |attempt| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("503 service unavailable".to_string())
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok("page")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn governor_returns_permanent_immediately() {
        let governor = RetryGovernor::default();
        let deadline = Deadline::after(Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = governor
            .run(deadline, move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                async { Err("NotAuthorizedOrNotFound".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn governor_exhausts_after_max_retries() {
        let governor = RetryGovernor::default();
        let deadline = Deadline::after(Duration::from_secs(3600));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = governor
            .run(deadline, move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                async { Err("connection reset".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        // Initial attempt + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn governor_stops_when_deadline_fires_during_backoff() {
        let governor = RetryGovernor::default();
        // Fires during the first backoff sleep (~2s).
        let deadline = Deadline::after(Duration::from_millis(500));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = governor
            .run(deadline, move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                async { Err("timeout".to_string()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::DeadlineExceeded)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn governor_unwinds_from_hung_call_at_deadline() {
        let governor = RetryGovernor::default();
        let deadline = Deadline::after(Duration::from_secs(1));
        let started = Instant::now();

        let result: Result<(), RetryError<String>> = governor
            .run(deadline, |_| std::future::pending())
            .await;

        assert!(matches!(result, Err(RetryError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    proptest::proptest! {
        #[test]
        fn backoff_without_jitter_is_monotonic_and_capped(
            a in 1u32..20,
            b in 1u32..20,
        ) {
            let config = RetryConfig { jitter: 0.0, ..RetryConfig::default() };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assert!(backoff_delay(&config, lo) <= backoff_delay(&config, hi));
            proptest::prop_assert!(backoff_delay(&config, hi) <= config.max_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_race_returns_future_output_when_in_time() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let out = deadline.race(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_remaining_counts_down() {
        let deadline = Deadline::after(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(4)).await;
        let remaining = deadline.remaining();
        assert!(remaining <= Duration::from_secs(6));
        assert!(!deadline.expired());
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
