//! Concurrent fetch/download machinery.
//!
//! The pieces compose bottom-up: [`RetryPolicy`] decides whether a failed
//! attempt is worth repeating, [`RateLimiter`] spaces requests per host,
//! [`WorkerPool`] bounds how many jobs run at once, [`PageCursor`] walks
//! listing pages, and [`FetchEngine`] ties them together behind the two
//! operations adapters actually call: [`FetchEngine::fetch_batch`] and
//! [`FetchEngine::fetch_listing`].

mod engine;
mod error;
mod job;
pub mod pagination;
mod pool;
pub mod rate_limiter;
mod retry;

pub use engine::{EngineError, FetchEngine, ListingOutcome, ListingPage};
pub use error::FetchError;
pub use job::{BatchOutcome, Job, JobError, JobId, JobPayload, JobResult};
pub use pagination::{DEFAULT_PAGE_SIZE, PageCursor, PageRangeError, PageStep, parse_page_range};
pub use pool::WorkerPool;
pub use rate_limiter::RateLimiter;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
};
