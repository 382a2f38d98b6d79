//! The fetch engine: composition point for pool, retry, rate limiting and
//! auth.
//!
//! A [`FetchEngine`] owns one site's outbound machinery: a shared HTTP
//! client, the site's [`RateLimiter`], the uniform [`RetryPolicy`], and an
//! optional [`TokenManager`] for authenticated sites. Per-site adapters
//! build [`Job`] values and decode closures; the engine executes them and
//! never inspects site-specific payload shapes.
//!
//! Two entry points cover the original tool's workloads:
//! [`fetch_batch`](FetchEngine::fetch_batch) runs independent jobs (file
//! downloads, detail lookups) through the bounded worker pool, and
//! [`fetch_listing`](FetchEngine::fetch_listing) walks a paginated listing
//! sequentially under a [`PageCursor`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthError, TokenManager};
use crate::config::{ConfigError, SiteConfig};

use super::error::FetchError;
use super::job::{BatchOutcome, Job, JobError, JobPayload, JobResult};
use super::pagination::{PageCursor, PageStep};
use super::pool::WorkerPool;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{RetryDecision, RetryPolicy, classify_error};

/// Connect timeout for site requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout; generous because download bodies stream
/// through it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors constructing an engine or starting a batch.
///
/// Per-job failures never surface here; they are accounted inside the
/// returned [`BatchOutcome`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The site configuration failed validation.
    #[error("invalid site configuration: {0}")]
    Config(#[from] ConfigError),

    /// The site requires authentication but no token manager was supplied.
    #[error("site requires authentication but no token manager was provided")]
    MissingTokenManager,

    /// Failed to construct the shared HTTP client.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// An up-front token refresh failed before any job was started.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}

/// One decoded listing page, produced by the adapter's decode closure.
#[derive(Debug)]
pub struct ListingPage<T> {
    /// Entities decoded from this page.
    pub entities: Vec<T>,
    /// Whether the upstream advertised a further page (a continuation
    /// token or next URL). Offset-based APIs with no such marker leave
    /// this `true` and rely on the cursor's page ceiling or an empty page.
    pub has_more: bool,
}

impl<T> ListingPage<T> {
    /// A page whose upstream advertised more to come.
    #[must_use]
    pub fn more(entities: Vec<T>) -> Self {
        Self {
            entities,
            has_more: true,
        }
    }

    /// A page whose upstream marked itself as the last one.
    #[must_use]
    pub fn last(entities: Vec<T>) -> Self {
        Self {
            entities,
            has_more: false,
        }
    }
}

/// Accumulated outcome of one listing walk.
#[derive(Debug)]
pub struct ListingOutcome<T> {
    /// Entities from every successfully decoded page, in page order.
    pub entities: Vec<T>,
    /// The failure that ended the walk early, if any.
    pub errors: Vec<JobError>,
    /// Number of page requests actually executed.
    pub pages_fetched: u32,
}

impl<T> ListingOutcome<T> {
    /// Returns true when the walk completed without a page failure.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-site fetch/download engine.
///
/// Cheap to clone; every field is either shared behind an `Arc` or itself
/// a handle (the HTTP client). One clone per worker task is the intended
/// usage.
#[derive(Debug, Clone)]
pub struct FetchEngine {
    client: reqwest::Client,
    site: Arc<SiteConfig>,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    token_manager: Option<Arc<TokenManager>>,
}

impl FetchEngine {
    /// Creates an engine for an unauthenticated site.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when the site config is invalid,
    /// [`EngineError::MissingTokenManager`] when the site demands auth, or
    /// [`EngineError::Client`] when the HTTP client cannot be built.
    pub fn new(site: SiteConfig) -> Result<Self, EngineError> {
        Self::build(site, None)
    }

    /// Creates an engine whose requests carry the manager's bearer token.
    ///
    /// # Errors
    ///
    /// Same conditions as [`new`](Self::new), minus the missing-manager
    /// case.
    pub fn with_token_manager(
        site: SiteConfig,
        token_manager: Arc<TokenManager>,
    ) -> Result<Self, EngineError> {
        Self::build(site, Some(token_manager))
    }

    fn build(
        site: SiteConfig,
        token_manager: Option<Arc<TokenManager>>,
    ) -> Result<Self, EngineError> {
        site.validate()?;
        if site.requires_auth && token_manager.is_none() {
            return Err(EngineError::MissingTokenManager);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| EngineError::Client { source })?;

        let rate_limiter = Arc::new(RateLimiter::new(site.rate_limit));

        Ok(Self {
            client,
            site: Arc::new(site),
            retry_policy: RetryPolicy::default(),
            rate_limiter,
            token_manager,
        })
    }

    /// Overrides the default retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the site configuration this engine serves.
    #[must_use]
    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Executes a batch of independent jobs through the worker pool and
    /// blocks until every job is accounted for.
    ///
    /// For authenticated sites the token is validated once up front, so a
    /// refresh failure aborts the batch before any request goes out rather
    /// than failing all N jobs individually.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] when the up-front refresh fails, or
    /// [`EngineError::Config`] when the site's concurrency bound is
    /// invalid. Per-job failures land in the outcome's error set instead.
    #[instrument(skip(self, jobs), fields(jobs = jobs.len(), site = %self.site.base_url))]
    pub async fn fetch_batch(&self, jobs: Vec<Job>) -> Result<BatchOutcome, EngineError> {
        if self.site.requires_auth {
            if let Some(manager) = &self.token_manager {
                manager.ensure_valid().await?;
            }
        }

        let pool = WorkerPool::new(self.site.max_concurrency)?;
        let engine = self.clone();
        let outcome = pool
            .run_batch(jobs, move |job| {
                let engine = engine.clone();
                async move { engine.execute_job(job).await }
            })
            .await;

        Ok(outcome)
    }

    /// Walks a paginated listing sequentially under `cursor`.
    ///
    /// For each step the adapter's `build_page` produces the page request
    /// and `decode` interprets the response body. The walk ends at the
    /// cursor's page ceiling, on an empty or final page, or on the first
    /// page failure; later offsets are unreliable once a page is missing,
    /// so a failed page stops the walk rather than leaving a gap.
    #[instrument(skip_all, fields(site = %self.site.base_url))]
    pub async fn fetch_listing<T, B, D>(
        &self,
        mut cursor: PageCursor,
        mut build_page: B,
        mut decode: D,
    ) -> ListingOutcome<T>
    where
        B: FnMut(PageStep) -> Job,
        D: FnMut(&[u8]) -> Result<ListingPage<T>, FetchError>,
    {
        let mut outcome = ListingOutcome {
            entities: Vec::new(),
            errors: Vec::new(),
            pages_fetched: 0,
        };

        while let Some(step) = cursor.next() {
            let job = build_page(step);
            let url = job.url.clone();
            debug!(page = step.page, offset = step.offset, "fetching listing page");

            outcome.pages_fetched += 1;
            let result = match self.execute_job(job).await {
                Ok(result) => result,
                Err(error) => {
                    warn!(page = step.page, error = %error, "listing page failed, stopping walk");
                    outcome.errors.push(error);
                    break;
                }
            };

            let body = result.bytes().unwrap_or_default();
            let page = match decode(body) {
                Ok(page) => page,
                Err(cause) => {
                    warn!(page = step.page, error = %cause, "listing page failed to decode");
                    // Decoders see only the body; attach the page URL here.
                    let cause = match cause {
                        decode @ FetchError::Decode { .. } => decode,
                        other => FetchError::decode(url, other.to_string()),
                    };
                    outcome.errors.push(JobError {
                        job_id: result.job_id,
                        cause,
                        attempts: result.attempts,
                    });
                    break;
                }
            };

            if page.entities.is_empty() || !page.has_more {
                cursor.mark_exhausted();
            }
            outcome.entities.extend(page.entities);
        }

        info!(
            pages = outcome.pages_fetched,
            entities = outcome.entities.len(),
            complete = outcome.is_complete(),
            "listing walk finished"
        );
        outcome
    }

    /// Runs one job to completion under the retry policy.
    ///
    /// Rate-limiter spacing is paid once here, before the attempt loop, so
    /// it never compounds with the policy's inter-attempt delays. A
    /// credential rejection buys at most one token refresh plus one bonus
    /// attempt; a second rejection is terminal.
    #[instrument(skip(self, job), fields(job_id = %job.id, url = %job.url))]
    pub async fn execute_job(&self, job: Job) -> Result<JobResult, JobError> {
        self.rate_limiter.acquire(&job.url).await;

        let mut token = match &self.token_manager {
            Some(manager) if self.site.requires_auth => match manager.ensure_valid().await {
                Ok(token) => Some(token),
                Err(error) => {
                    return Err(JobError {
                        job_id: job.id,
                        cause: FetchError::Auth(error),
                        attempts: 0,
                    });
                }
            },
            _ => None,
        };

        let mut attempt: u32 = 0;
        let mut auth_retry_used = false;

        loop {
            attempt += 1;
            let error = match self.attempt_job(&job, token.as_deref(), attempt).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if matches!(error, FetchError::AuthExpired { .. }) && !auth_retry_used {
                if let (Some(manager), Some(rejected)) = (&self.token_manager, token.as_deref()) {
                    match manager.refresh_after_rejection(rejected).await {
                        Ok(fresh) => {
                            // One bonus attempt with the fresh credential;
                            // further rejections are terminal.
                            auth_retry_used = true;
                            token = Some(fresh);
                            continue;
                        }
                        Err(auth_error) => {
                            return Err(JobError {
                                job_id: job.id,
                                cause: FetchError::Auth(auth_error),
                                attempts: attempt,
                            });
                        }
                    }
                }
            }

            // A parseable Retry-After both delays this job's next attempt
            // and pushes back sibling requests to the same host.
            let mandated = match &error {
                FetchError::HttpStatus {
                    status: 429,
                    retry_after: Some(value),
                    ..
                } => parse_retry_after(value),
                _ => None,
            };
            if let Some(mandate) = mandated {
                self.rate_limiter.record_rate_limit(&job.url, mandate);
            }

            match self.retry_policy.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry { delay, .. } => {
                    let delay = mandated.unwrap_or(delay);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Terminal { reason } => {
                    warn!(attempt, reason, error = %error, "job failed terminally");
                    return Err(JobError {
                        job_id: job.id,
                        cause: error,
                        attempts: attempt,
                    });
                }
                RetryDecision::Exhausted { max_attempts } => {
                    warn!(max_attempts, error = %error, "job exhausted retries");
                    return Err(JobError {
                        job_id: job.id,
                        cause: FetchError::exhausted(attempt, error),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Performs a single HTTP attempt for the job.
    async fn attempt_job(
        &self,
        job: &Job,
        token: Option<&str>,
        attempt: u32,
    ) -> Result<JobResult, FetchError> {
        let url = url::Url::parse(&job.url).map_err(|_| FetchError::invalid_url(&job.url))?;

        let mut request = self.client.request(job.method.clone(), url);
        if !job.params.is_empty() {
            request = request.query(&job.params);
        }
        for (name, value) in &job.headers {
            request = request.header(name, value);
        }
        if let (Some(token), Some(manager)) = (token, &self.token_manager) {
            for (name, value) in manager.identity_headers() {
                request = request.header(name, value);
            }
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::timeout(&job.url)
            } else {
                FetchError::transport(&job.url, source)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 && token.is_some() {
            return Err(FetchError::auth_expired(&job.url, status.as_u16()));
        }
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            return Err(FetchError::http_status_with_retry_after(
                &job.url,
                status.as_u16(),
                retry_after,
            ));
        }

        let payload = match &job.destination {
            Some(destination) => {
                let source_url = job.url.clone();
                let stream = response.bytes_stream().map(move |chunk| {
                    chunk.map_err(|source| {
                        if source.is_timeout() {
                            FetchError::timeout(&source_url)
                        } else {
                            FetchError::transport(&source_url, source)
                        }
                    })
                });
                persist_stream(destination, stream).await?;
                JobPayload::File(destination.clone())
            }
            None => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|source| FetchError::transport(&job.url, source))?;
                JobPayload::Bytes(bytes.to_vec())
            }
        };

        Ok(JobResult {
            job_id: job.id.clone(),
            payload,
            status: status.as_u16(),
            attempts: attempt,
        })
    }
}

/// Streams a body to `destination` via a temporary path.
///
/// The data lands in a sibling `.part` file first and is renamed onto the
/// destination only after the whole stream was written and flushed, so a
/// partially written download is never visible at the destination path. On
/// any failure the temporary file is removed.
async fn persist_stream<S, C>(destination: &Path, mut stream: S) -> Result<(), FetchError>
where
    S: Stream<Item = Result<C, FetchError>> + Unpin,
    C: AsRef<[u8]>,
{
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::io(parent, source))?;
        }
    }

    let temp = temp_path_for(destination);
    let mut file = tokio::fs::File::create(&temp)
        .await
        .map_err(|source| FetchError::io(&temp, source))?;

    let write_result = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref())
                .await
                .map_err(|source| FetchError::io(&temp, source))?;
        }
        file.flush()
            .await
            .map_err(|source| FetchError::io(&temp, source))
    }
    .await;

    drop(file);

    match write_result {
        Ok(()) => {
            tokio::fs::rename(&temp, destination)
                .await
                .map_err(|source| FetchError::io(destination, source))?;
            debug!(path = %destination.display(), "download promoted");
            Ok(())
        }
        Err(error) => {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup, "failed to remove partial file");
            }
            Err(error)
        }
    }
}

/// Returns the temporary sibling path a download is written to before
/// promotion.
fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map_or_else(|| std::ffi::OsString::from("download"), ToOwned::to_owned);
    name.push(".part");
    destination.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use futures_util::stream;

    use super::*;
    use crate::auth::AuthConfig;
    use crate::config::SiteConfig;

    #[test]
    fn test_temp_path_appends_part_suffix() {
        assert_eq!(
            temp_path_for(Path::new("/tmp/out/42.png")),
            PathBuf::from("/tmp/out/42.png.part")
        );
    }

    #[test]
    fn test_engine_requires_token_manager_for_authed_site() {
        let site = SiteConfig::new("https://api.example.com").with_auth();
        assert!(matches!(
            FetchEngine::new(site),
            Err(EngineError::MissingTokenManager)
        ));
    }

    #[test]
    fn test_engine_rejects_invalid_site_config() {
        let site = SiteConfig::new("https://api.example.com").with_max_concurrency(0);
        assert!(matches!(FetchEngine::new(site), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_engine_accepts_authed_site_with_manager() {
        let manager = Arc::new(
            TokenManager::new(AuthConfig::new(
                "https://oauth.example.com/auth/token",
                "refresh",
                "id",
                "secret",
                "TestApp/1.0",
            ))
            .unwrap(),
        );
        let site = SiteConfig::new("https://api.example.com").with_auth();
        assert!(FetchEngine::with_token_manager(site, manager).is_ok());
    }

    #[tokio::test]
    async fn test_persist_stream_promotes_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("asset.bin");

        let chunks: Vec<Result<&[u8], FetchError>> = vec![Ok(b"hello "), Ok(b"world")];
        persist_stream(&destination, stream::iter(chunks))
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"hello world");
        assert!(!temp_path_for(&destination).exists());
    }

    #[tokio::test]
    async fn test_persist_stream_cleans_up_on_mid_stream_failure() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("asset.bin");

        let chunks: Vec<Result<&[u8], FetchError>> = vec![
            Ok(b"partial"),
            Err(FetchError::timeout("https://cdn.example.com/asset.bin")),
        ];
        let result = persist_stream(&destination, stream::iter(chunks)).await;

        assert!(matches!(result, Err(FetchError::Timeout { .. })));
        assert!(!destination.exists(), "partial file visible at destination");
        assert!(!temp_path_for(&destination).exists(), "temp file left behind");
    }

    #[tokio::test]
    async fn test_persist_stream_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested/deep/asset.bin");

        let chunks: Vec<Result<&[u8], FetchError>> = vec![Ok(b"data")];
        persist_stream(&destination, stream::iter(chunks))
            .await
            .unwrap();

        assert!(destination.exists());
    }
}
