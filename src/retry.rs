//! Rate-limit backoff and run deadlines.
//!
//! LLM APIs answer `429` under load, usually with a hint such as
//! "Please try again in 7.66s". [`retry_rate_limited`] waits out exactly that
//! hint (or a fixed fallback) and retries the same call. Only rate-limit
//! errors are retried; every other failure returns immediately.
//!
//! Retries are bounded by [`RetryPolicy::max_attempts`] and by the run's
//! [`Deadline`], so a caller that imposes a deadline can never be hung by a
//! service that keeps answering `429`. All waiting goes through
//! `tokio::time`, which lets tests run on a paused clock.

use crate::model::ModelError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Extracts a server-suggested wait from an error message.
pub type WaitParser = fn(&str) -> Option<Duration>;

/// How rate-limited calls are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call. `None` retries forever
    /// (still subject to the run deadline).
    pub max_attempts: Option<u32>,
    /// Wait used when the error carries no usable hint. Default: 5 s.
    pub fallback_wait: Duration,
    /// Upper bound on any single wait. Default: 120 s.
    pub max_wait: Duration,
    /// Parser for wait hints embedded in error messages.
    pub wait_parser: WaitParser,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            fallback_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(120),
            wait_parser: parse_retry_after,
        }
    }
}

impl RetryPolicy {
    /// Retry until success, a non-rate-limit error, or the deadline.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts.map(|n| n.max(1));
        self
    }

    pub fn with_fallback_wait(mut self, wait: Duration) -> Self {
        self.fallback_wait = wait;
        self
    }

    pub fn with_wait_parser(mut self, parser: WaitParser) -> Self {
        self.wait_parser = parser;
        self
    }

    /// How long to wait before retrying after `err`.
    ///
    /// A structured `retry_after` wins over a parsed hint; the result is
    /// capped at `max_wait`.
    pub fn wait_for(&self, err: &ModelError) -> Duration {
        let hinted = match err {
            ModelError::RateLimited {
                retry_after,
                message,
            } => retry_after.or_else(|| (self.wait_parser)(message)),
            _ => None,
        };
        hinted.unwrap_or(self.fallback_wait).min(self.max_wait)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Optional point in time after which retry loops stop waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// A timeout too large to represent as an instant means no deadline.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// `Deadline::after` when `timeout` is set, otherwise no deadline.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// `true` if waiting `wait` from now still ends before the deadline.
    pub fn allows(&self, wait: Duration) -> bool {
        self.0
            .is_none_or(|at| Instant::now().checked_add(wait).is_some_and(|end| end < at))
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The call failed with something other than a rate limit.
    #[error(transparent)]
    Model(ModelError),

    /// Still rate limited after the policy's attempt budget.
    #[error("still rate limited after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The next wait would overrun the run deadline.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },
}

/// Run `op` until it succeeds, retrying only rate-limit failures.
///
/// `label` names the call in log lines (e.g. `"chunk 3/7"`).
pub async fn retry_rate_limited<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Deadline,
    label: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut attempts: u32 = 0;
    loop {
        if deadline.is_expired() {
            return Err(RetryError::DeadlineExceeded { attempts });
        }

        attempts += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() => err,
            Err(err) => return Err(RetryError::Model(err)),
        };

        if policy.exhausted(attempts) {
            warn!("{}: giving up after {} rate-limited attempts", label, attempts);
            return Err(RetryError::Exhausted {
                attempts,
                last: err.to_string(),
            });
        }

        let wait = policy.wait_for(&err);
        if !deadline.allows(wait) {
            warn!(
                "{}: waiting {:?} would overrun the deadline; giving up",
                label, wait
            );
            return Err(RetryError::DeadlineExceeded { attempts });
        }

        warn!(
            "{}: rate limited (attempt {}), retrying in {:?}",
            label, attempts, wait
        );
        tokio::time::sleep(wait).await;
        debug!("{}: retrying", label);
    }
}

// ── Wait-hint parsing ────────────────────────────────────────────────────────

static RE_WAIT_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:try again in|retry[ _-]?after|wait)\s*:?\s*((?:\d+(?:\.\d+)?\s*(?:ms|milliseconds?|h|hours?|m|mins?|minutes?|s|secs?|seconds?)?\s*)+)",
    )
    .unwrap()
});

static RE_WAIT_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(ms|milliseconds?|h|hours?|mins?|minutes?|m|s|secs?|seconds?)?")
        .unwrap()
});

/// Best-effort parse of a server-suggested wait.
///
/// Understands `try again in 7.66s`, `try again in 1m2.5s`,
/// `try again in 450ms`, `retry after 2 seconds` and `Retry-After: 3`.
/// A bare number is read as seconds.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    let caps = RE_WAIT_HINT.captures(message)?;
    let mut total = 0.0_f64;
    let mut matched = false;

    for part in RE_WAIT_PART.captures_iter(&caps[1]) {
        let value: f64 = part[1].parse().ok()?;
        let unit = part.get(2).map(|m| m.as_str().to_lowercase());
        let secs = match unit.as_deref() {
            Some(u) if u.starts_with("ms") || u.starts_with("milli") => value / 1000.0,
            Some(u) if u.starts_with('h') => value * 3600.0,
            Some(u) if u == "m" || u.starts_with("min") => value * 60.0,
            _ => value,
        };
        total += secs;
        matched = true;
    }

    if !matched {
        return None;
    }
    Duration::try_from_secs_f64(total).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn limited(after: Option<u64>) -> ModelError {
        ModelError::RateLimited {
            retry_after: after.map(Duration::from_secs),
            message: "429 Too Many Requests".into(),
        }
    }

    #[test]
    fn parses_groq_style_seconds() {
        let d = parse_retry_after("Rate limit reached. Please try again in 7.66s. Visit ...");
        assert_eq!(d, Some(Duration::from_secs_f64(7.66)));
    }

    #[test]
    fn parses_minutes_and_seconds() {
        let d = parse_retry_after("Please try again in 1m2.5s.");
        assert_eq!(d, Some(Duration::from_secs_f64(62.5)));
    }

    #[test]
    fn parses_milliseconds() {
        let d = parse_retry_after("try again in 450ms");
        assert_eq!(d, Some(Duration::from_millis(450)));
    }

    #[test]
    fn parses_retry_after_header_style() {
        assert_eq!(
            parse_retry_after("Retry-After: 3"),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            parse_retry_after("please retry after 2 seconds"),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn no_hint_yields_none() {
        assert_eq!(parse_retry_after("429 Too Many Requests"), None);
    }

    #[test]
    fn oversized_hint_is_ignored() {
        assert_eq!(
            parse_retry_after("Please try again in 99999999999999999999999s"),
            None
        );
        let err = ModelError::RateLimited {
            retry_after: None,
            message: "try again in 99999999999999999999999h".into(),
        };
        assert_eq!(RetryPolicy::default().wait_for(&err), Duration::from_secs(5));
    }

    #[test]
    fn wait_prefers_structured_hint_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.wait_for(&limited(Some(2))), Duration::from_secs(2));
        assert_eq!(policy.wait_for(&limited(None)), Duration::from_secs(5));
        assert_eq!(policy.wait_for(&limited(Some(10_000))), Duration::from_secs(120));

        let parsed = ModelError::RateLimited {
            retry_after: None,
            message: "try again in 3s".into(),
        };
        assert_eq!(policy.wait_for(&parsed), Duration::from_secs(3));
    }

    #[test]
    fn deadline_none_allows_everything() {
        let d = Deadline::none();
        assert!(!d.is_expired());
        assert!(d.allows(Duration::from_secs(3600)));
        assert_eq!(Deadline::from_timeout(None), Deadline::none());
    }

    #[test]
    fn huge_timeout_means_no_deadline() {
        let d = Deadline::from_timeout(Some(Duration::from_secs(u64::MAX)));
        assert_eq!(d, Deadline::none());
        assert!(!d.is_expired());

        let soon = Deadline::after(Duration::from_secs(60));
        assert!(!soon.allows(Duration::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let c = Arc::clone(&calls);
        let result = retry_rate_limited(&RetryPolicy::default(), Deadline::none(), "test", || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(limited(Some(2))),
                    1 => Err(limited(Some(1))),
                    _ => Ok("done"),
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> =
            retry_rate_limited(&RetryPolicy::default(), Deadline::none(), "test", || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(ModelError::Transport("boom".into())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Model(ModelError::Transport(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_gives_up() {
        let policy = RetryPolicy::default().with_max_attempts(Some(3));
        let result: Result<(), _> =
            retry_rate_limited(&policy, Deadline::none(), "test", || async { Err(limited(Some(1))) })
                .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_unbounded_retry() {
        let policy = RetryPolicy::unbounded();
        let deadline = Deadline::after(Duration::from_secs(12));
        let start = Instant::now();

        let result: Result<(), _> =
            retry_rate_limited(&policy, deadline, "test", || async { Err(limited(None)) }).await;

        assert!(matches!(result, Err(RetryError::DeadlineExceeded { .. })));
        assert!(start.elapsed() < Duration::from_secs(12));
    }
}
