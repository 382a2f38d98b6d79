//! Fetchkit Core Library
//!
//! This library provides the concurrent fetch/download engine shared by
//! per-site adapters: a bounded worker pool for independent network jobs,
//! a uniform retry/backoff policy, per-host rate limiting, paginated
//! listing enumeration, and a bearer-token lifecycle manager that
//! transparently refreshes expired credentials mid-flight.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`auth`] - Bearer credential lifecycle and serialized token refresh
//! - [`config`] - Per-site configuration (rate limits, concurrency, auth)
//! - [`fetch`] - Worker pool, retry policy, rate limiter, pagination, engine
//!
//! Per-site JSON decoding and path naming are adapter concerns: adapters
//! hand the engine [`fetch::Job`] values and per-page decode closures, and
//! the engine never inspects site-specific payload shapes.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod fetch;

// Re-export commonly used types
pub use auth::{AuthConfig, AuthError, TokenManager};
pub use config::{ConfigError, RateLimitRange, SiteConfig};
pub use fetch::{
    BatchOutcome, DEFAULT_MAX_ATTEMPTS, EngineError, FailureType, FetchEngine, FetchError, Job,
    JobError, JobId, JobPayload, JobResult, ListingOutcome, ListingPage, PageCursor, PageStep,
    RateLimiter, RetryDecision, RetryPolicy, WorkerPool, classify_error,
};
