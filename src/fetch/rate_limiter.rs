//! Per-host request spacing with randomized delays.
//!
//! This module provides the [`RateLimiter`] which enforces a randomized
//! minimum gap between requests to the same host, drawn from a per-site
//! configured `[min, max]` interval. The spacing is a tunable against
//! upstream rate-limit bans and IP-reputation penalties, not a protocol
//! requirement: the only invariant is that the elapsed time since the
//! previous request to a host is at least the interval minimum.
//!
//! Spacing is applied once per logical request, not per retry attempt, so
//! it never compounds with the retry policy's own delays. Requests to
//! distinct hosts never wait on each other.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fetchkit::{RateLimitRange, RateLimiter};
//!
//! # async fn example() {
//! let range = RateLimitRange::new(
//!     Duration::from_millis(1000),
//!     Duration::from_millis(1500),
//! ).unwrap();
//! let limiter = Arc::new(RateLimiter::new(range));
//!
//! // First request to a host proceeds immediately
//! limiter.acquire("https://api.example.com/v1/listing").await;
//!
//! // Second request to the same host waits out the drawn delay
//! limiter.acquire("https://api.example.com/v1/asset/1").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::RateLimitRange;

/// Warning threshold for cumulative delay per host (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter for outbound requests.
///
/// Designed to be wrapped in `Arc` and shared across the worker pool's
/// tasks. Per-host state lives in a `DashMap`; the timing of each host is
/// guarded by its own async mutex so the map shard lock is never held
/// across an await.
#[derive(Debug)]
pub struct RateLimiter {
    /// Interval the per-request delay is drawn from.
    range: RateLimitRange,

    /// Whether spacing is disabled entirely.
    disabled: bool,

    /// Reference point the atomic mandate deadlines are measured from.
    epoch: Instant,

    /// Per-host state tracking.
    /// Arc lets the entry be cloned out so the `DashMap` lock is released
    /// before awaiting on the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

/// State tracked for each host.
#[derive(Debug)]
struct HostState {
    /// Timing guarded for atomic read-update across the sleep.
    timing: Mutex<HostTiming>,

    /// Earliest time the next request may go out, as milliseconds since
    /// the limiter's epoch (0 = no mandate). Kept outside the timing
    /// mutex so a server Retry-After can be recorded while another task
    /// holds the mutex across its spacing sleep.
    not_before_ms: AtomicU64,

    /// Cumulative delay applied to this host (in milliseconds).
    /// Used to warn when excessive rate limiting occurs.
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct HostTiming {
    /// Time of the last request to this host.
    /// `None` means this host has not been requested yet (first request is
    /// immediate).
    last_request: Option<Instant>,
}

impl HostState {
    fn new() -> Self {
        Self {
            timing: Mutex::new(HostTiming::default()),
            not_before_ms: AtomicU64::new(0),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns the server-mandated floor for the next request, if any. A
    /// floor already in the past simply produces no delay.
    fn mandate_deadline(&self, epoch: Instant) -> Option<Instant> {
        match self.not_before_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(epoch + Duration::from_millis(ms)),
        }
    }

    /// Raises the mandated floor to `deadline`; never lowers it.
    #[allow(clippy::cast_possible_truncation)]
    fn raise_mandate(&self, epoch: Instant, deadline: Instant) {
        let ms = deadline.saturating_duration_since(epoch).as_millis() as u64;
        // 0 means "no mandate", so a deadline landing exactly on the
        // epoch is stored as 1ms.
        self.not_before_ms.fetch_max(ms.max(1), Ordering::SeqCst);
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a rate limiter drawing delays from the given range.
    #[must_use]
    #[instrument(skip_all, fields(min_ms = range.min.as_millis(), max_ms = range.max.as_millis()))]
    pub fn new(range: RateLimitRange) -> Self {
        debug!("creating rate limiter");
        Self {
            disabled: range.is_zero(),
            range,
            epoch: Instant::now(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            range: RateLimitRange::disabled(),
            disabled: true,
            epoch: Instant::now(),
            hosts: DashMap::new(),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured delay range.
    #[must_use]
    pub fn range(&self) -> RateLimitRange {
        self.range
    }

    /// Acquires permission to make a request to the given URL's host.
    ///
    /// Waits until both the randomized inter-request gap and any server
    /// mandated Retry-After window have elapsed, then records the request
    /// time. The first request to any host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        // Get or create host state, clone Arc to release the DashMap lock
        // before awaiting
        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        let mut timing = state.timing.lock().await;
        let now = Instant::now();

        let spacing_deadline = timing
            .last_request
            .map(|last| last + self.draw_delay());
        let mandated_deadline = state.mandate_deadline(self.epoch);

        let deadline = match (spacing_deadline, mandated_deadline) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        match deadline {
            Some(deadline) if deadline > now => {
                let delay = deadline - now;
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider reducing request volume to this host"
                    );
                }

                tokio::time::sleep(delay).await;
            }
            Some(_) => {}
            None => {
                debug!(host = %host, "first request to host - no delay");
            }
        }

        timing.last_request = Some(Instant::now());
    }

    /// Records a server-mandated delay (from a Retry-After header) so
    /// subsequent requests to the URL's host respect it.
    ///
    /// The mandate is stored unconditionally, even while another task to
    /// the same host is mid-sleep inside [`acquire`](Self::acquire).
    #[instrument(skip(self), fields(host))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        state.raise_mandate(self.epoch, Instant::now() + delay);
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host = %host,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - site may be under heavy load"
            );
        }
    }

    /// Draws one inter-request delay from the configured range.
    #[allow(clippy::cast_possible_truncation)]
    fn draw_delay(&self) -> Duration {
        let min_ms = self.range.min.as_millis() as u64;
        let max_ms = self.range.max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(min_ms..=max_ms))
    }
}

/// Extracts the host from a URL.
///
/// Returns "unknown" for malformed URLs, ensuring all requests are still
/// rate limited even if the URL cannot be parsed.
///
/// # Examples
///
/// ```
/// use fetchkit::fetch::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://example.com/path"), "example.com");
/// assert_eq!(extract_host("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_host("https://localhost:8080/x"), "localhost");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at
/// one hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fetchkit::fetch::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    // Try parsing as integer seconds first (most common)
    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    // Try parsing as HTTP-date
    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();

        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            // Date is in the past
            debug!(
                header_value,
                "Retry-After date is in the past, returning zero"
            );
            Some(Duration::ZERO)
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

    fn range_ms(min: u64, max: u64) -> RateLimitRange {
        RateLimitRange::new(Duration::from_millis(min), Duration::from_millis(max)).unwrap()
    }

    // ==================== RateLimiter Tests ====================

    #[test]
    fn test_rate_limiter_new_stores_range() {
        let limiter = RateLimiter::new(range_ms(500, 700));
        assert_eq!(limiter.range().min, Duration::from_millis(500));
        assert!(!limiter.is_disabled());
    }

    #[test]
    fn test_rate_limiter_zero_range_is_disabled() {
        let limiter = RateLimiter::new(RateLimitRange::disabled());
        assert!(limiter.is_disabled());
    }

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        tokio::time::pause();
        let limiter = RateLimiter::new(range_ms(1000, 1000));

        let start = Instant::now();
        limiter.acquire("https://example.com/a").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_second_request_waits_at_least_min() {
        tokio::time::pause();
        let limiter = RateLimiter::new(range_ms(1000, 1500));

        limiter.acquire("https://example.com/a").await;
        let start = Instant::now();
        limiter.acquire("https://example.com/b").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() <= Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn test_distinct_hosts_do_not_wait() {
        tokio::time::pause();
        let limiter = RateLimiter::new(range_ms(1000, 1000));

        limiter.acquire("https://one.example.com/a").await;
        let start = Instant::now();
        limiter.acquire("https://two.example.com/a").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_disabled_applies_no_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();

        limiter.acquire("https://example.com/a").await;
        let start = Instant::now();
        limiter.acquire("https://example.com/b").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_recorded_rate_limit_delays_next_acquire() {
        tokio::time::pause();
        let limiter = RateLimiter::new(range_ms(1, 1));

        limiter.acquire("https://example.com/a").await;
        limiter.record_rate_limit("https://example.com/a", Duration::from_secs(5));

        let start = Instant::now();
        limiter.acquire("https://example.com/b").await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mandate_recorded_while_sibling_sleeps_in_acquire() {
        tokio::time::pause();
        let limiter = Arc::new(RateLimiter::new(range_ms(1000, 1000)));

        limiter.acquire("https://example.com/a").await;

        // Sibling request enters its spacing sleep holding the host's
        // timing mutex.
        let sibling = Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            sibling.acquire("https://example.com/b").await;
        });
        tokio::task::yield_now().await;

        // Server mandate arrives mid-sleep; it must not be dropped.
        limiter.record_rate_limit("https://example.com/b", Duration::from_secs(5));
        handle.await.unwrap();

        let start = Instant::now();
        limiter.acquire("https://example.com/c").await;
        assert!(
            start.elapsed() >= Duration::from_secs(3),
            "mandate was dropped: waited only {:?}",
            start.elapsed()
        );
    }

    // ==================== extract_host Tests ====================

    #[test]
    fn test_extract_host_basic() {
        assert_eq!(extract_host("https://example.com/file"), "example.com");
    }

    #[test]
    fn test_extract_host_lowercases() {
        assert_eq!(extract_host("https://Example.COM/file"), "example.com");
    }

    #[test]
    fn test_extract_host_malformed() {
        assert_eq!(extract_host("not a url"), "unknown");
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative_ignored() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }
}
