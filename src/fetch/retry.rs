//! Retry classification and jittered backoff for transient failures.
//!
//! Every outbound request, listing or download alike, runs under one
//! [`RetryPolicy`]. A failed attempt is classified into a [`FailureType`]:
//!
//! - [`FailureType::Transient`] - transport faults and 5xx, may succeed on retry
//! - [`FailureType::RateLimited`] - HTTP 429, retried with spacing
//! - [`FailureType::AuthExpired`] - credential rejection, handled by the
//!   engine with a single token refresh plus one bonus retry
//! - [`FailureType::Terminal`] - failures retrying cannot fix (other 4xx,
//!   decode failures, local IO)
//!
//! Between attempts the policy sleeps a randomized duration drawn uniformly
//! from a configured range; the jitter prevents thundering-herd retries
//! against an already-struggling site.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default attempt ceiling, including the initial attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lower bound of the retry delay range.
const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(1500);

/// Default upper bound of the retry delay range.
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(3000);

/// Classification of a failed attempt, used to decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connect/DNS errors, timeouts, 5xx server errors.
    Transient,

    /// Server rate limiting (HTTP 429). Retried; any parseable Retry-After
    /// delay supersedes the policy's own jittered delay.
    RateLimited,

    /// The bearer credential was rejected. The engine refreshes the token
    /// once and grants one bonus retry; the policy itself treats further
    /// occurrences as terminal.
    AuthExpired,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404, 400, malformed bodies, local filesystem errors.
    Terminal,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// The failure is terminal; return it immediately.
    Terminal {
        /// Human-readable reason why retry would not help.
        reason: &'static str,
    },

    /// The attempt ceiling is exhausted; wrap the last failure.
    Exhausted {
        /// The configured ceiling that was reached.
        max_attempts: u32,
    },
}

/// Retry configuration applied uniformly to every request.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - delay range: 1.5s to 3.0s, drawn uniformly per retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Lower bound of the randomized inter-attempt delay.
    min_delay: Duration,

    /// Upper bound of the randomized inter-attempt delay.
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1; an inverted delay range is
    /// normalized so the upper bound is never below the lower bound.
    #[must_use]
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    /// Creates a policy with a custom attempt ceiling, defaults elsewhere.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Terminal => {
                return RetryDecision::Terminal {
                    reason: "terminal failure - retry would not help",
                };
            }
            FailureType::AuthExpired => {
                // The engine already spent its single refresh-and-retry by
                // the time the policy sees this classification.
                return RetryDecision::Terminal {
                    reason: "credential still rejected after refresh",
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::Exhausted {
                max_attempts: self.max_attempts,
            };
        }

        let delay = self.next_delay();
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Draws a delay uniformly from the configured `[min, max]` range.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn next_delay(&self) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(min_ms..=max_ms))
    }
}

/// Classifies a fetch error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 408 | Transient | Request timeout - may succeed |
/// | 429 | RateLimited | Rate limited - retry with spacing |
/// | 5xx | Transient | Server fault - may be temporary |
/// | other 4xx | Terminal | Client rejected - won't succeed on retry |
///
/// # Non-HTTP Errors
///
/// Transport errors are transient unless the chain looks like a TLS or
/// certificate problem; timeouts are transient; decode, IO, invalid-URL,
/// auth-refresh, and task-abort failures are terminal. Credential
/// rejections map to [`FailureType::AuthExpired`].
#[instrument]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),

        FetchError::Timeout { .. } => FailureType::Transient,

        FetchError::Transport { source, .. } => {
            if is_tls_error(source) {
                FailureType::Terminal
            } else {
                FailureType::Transient
            }
        }

        FetchError::AuthExpired { .. } => FailureType::AuthExpired,

        FetchError::Auth(_)
        | FetchError::Decode { .. }
        | FetchError::Io { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::TaskAborted { .. }
        | FetchError::ExhaustedRetries { .. } => FailureType::Terminal,
    }
}

/// Classifies an HTTP status code into a failure type.
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Terminal,
        status if (500..600).contains(&status) => FailureType::Transient,
        // Anything else is unexpected, treat as terminal
        _ => FailureType::Terminal,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.min_delay, Duration::from_millis(1500));
        assert_eq!(policy.max_delay, Duration::from_millis(3000));
    }

    #[test]
    fn test_retry_policy_with_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.min_delay, Duration::from_millis(1500));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_policy_normalizes_inverted_range() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_next_delay_within_bounds() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_next_delay_zero_range() {
        let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.next_delay(), Duration::ZERO);
    }

    // ==================== Error Classification Tests ====================

    #[test]
    fn test_classify_http_400_terminal() {
        let error = FetchError::http_status("http://example.com", 400);
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    #[test]
    fn test_classify_http_404_terminal() {
        let error = FetchError::http_status("http://example.com", 404);
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    #[test]
    fn test_classify_http_408_transient() {
        let error = FetchError::http_status("http://example.com", 408);
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_http_429_rate_limited() {
        let error = FetchError::http_status("http://example.com", 429);
        assert_eq!(classify_error(&error), FailureType::RateLimited);
    }

    #[test]
    fn test_classify_http_5xx_transient() {
        for status in [500, 502, 503, 504] {
            let error = FetchError::http_status("http://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Transient, "{status}");
        }
    }

    #[test]
    fn test_classify_timeout_transient() {
        let error = FetchError::timeout("http://example.com");
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_auth_expired() {
        let error = FetchError::auth_expired("http://example.com", 401);
        assert_eq!(classify_error(&error), FailureType::AuthExpired);
    }

    #[test]
    fn test_classify_decode_terminal() {
        let error = FetchError::decode("http://example.com", "bad json");
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    #[test]
    fn test_classify_io_terminal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = FetchError::io("/path/to/file", io_err);
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    #[test]
    fn test_classify_invalid_url_terminal() {
        let error = FetchError::invalid_url("not-a-url");
        assert_eq!(classify_error(&error), FailureType::Terminal);
    }

    // ==================== Should Retry Decision Tests ====================

    #[test]
    fn test_should_retry_terminal_does_not_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Terminal, 1);
        assert!(matches!(decision, RetryDecision::Terminal { .. }));
    }

    #[test]
    fn test_should_retry_auth_expired_terminal_at_policy_level() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::AuthExpired, 1);
        assert!(matches!(decision, RetryDecision::Terminal { .. }));
    }

    #[test]
    fn test_should_retry_transient_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Transient, 1);
        assert!(matches!(
            decision,
            RetryDecision::Retry { attempt: 2, .. }
        ));
    }

    #[test]
    fn test_should_retry_rate_limited_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::RateLimited, 1);
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::Exhausted { max_attempts: 3 }
        ));
    }

    #[test]
    fn test_default_max_attempts_constant() {
        assert_eq!(DEFAULT_MAX_ATTEMPTS, 5);
    }
}
