//! Per-site configuration for the fetch engine.
//!
//! The original tool kept site settings in process-wide mutable state; here
//! each [`SiteConfig`] is an explicitly constructed value owned by one
//! [`FetchEngine`](crate::fetch::FetchEngine) instance. Adapters build one
//! config per target site and never share mutable state through it.

use std::time::Duration;

use thiserror::Error;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Errors produced while validating site configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Rate limit range where min exceeds max.
    #[error("invalid rate limit range: min {min_ms}ms exceeds max {max_ms}ms")]
    InvalidRateRange {
        /// Lower bound in milliseconds.
        min_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },
}

/// Inclusive `[min, max]` interval the rate limiter draws delays from.
///
/// The interval is a tunable against upstream rate-limit bans, not a hard
/// protocol requirement. A zero-width range at `Duration::ZERO` disables
/// spacing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRange {
    /// Minimum spacing between requests to the same host.
    pub min: Duration,
    /// Maximum spacing between requests to the same host.
    pub max: Duration,
}

impl RateLimitRange {
    /// Creates a new range, validating that `min <= max`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRateRange`] when `min > max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidRateRange {
                min_ms: min.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            });
        }
        Ok(Self { min, max })
    }

    /// A range that applies no spacing at all.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Returns true when the range never produces a delay.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }
}

impl Default for RateLimitRange {
    /// Default spacing of 1.0s to 1.5s, matching the conservative delays the
    /// original used against Cloudflare-fronted APIs.
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(1500),
        }
    }
}

/// Configuration for one target site.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fetchkit::{RateLimitRange, SiteConfig};
///
/// let config = SiteConfig::new("https://api.example.com")
///     .with_auth()
///     .with_rate_limit(RateLimitRange::new(
///         Duration::from_millis(500),
///         Duration::from_millis(900),
///     ).unwrap())
///     .with_max_concurrency(8);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Base URL of the site's API.
    pub base_url: String,
    /// Whether outbound calls to this site carry a bearer token.
    pub requires_auth: bool,
    /// Inter-request spacing interval for this site.
    pub rate_limit: RateLimitRange,
    /// Default concurrency bound for batches against this site.
    pub max_concurrency: usize,
}

impl SiteConfig {
    /// Creates a config with defaults: no auth, default rate limiting,
    /// default concurrency.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            requires_auth: false,
            rate_limit: RateLimitRange::default(),
            max_concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Marks the site as requiring bearer authentication.
    #[must_use]
    pub fn with_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Overrides the rate limit interval.
    #[must_use]
    pub fn with_rate_limit(mut self, range: RateLimitRange) -> Self {
        self.rate_limit = range;
        self
    }

    /// Overrides the default batch concurrency.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Validates bounds that the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConcurrency`] when the concurrency is
    /// outside `1..=100`, or [`ConfigError::InvalidRateRange`] when the rate
    /// interval is inverted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrency,
            });
        }
        if self.rate_limit.min > self.rate_limit.max {
            return Err(ConfigError::InvalidRateRange {
                min_ms: self.rate_limit.min.as_millis() as u64,
                max_ms: self.rate_limit.max.as_millis() as u64,
            });
        }
        Ok(())
    }
}
