//! Bounded worker pool for executing batches of independent jobs.
//!
//! The pool is a synchronous batch primitive, not a long-lived queue: one
//! [`WorkerPool::run_batch`] call admits every job exactly once, runs at
//! most `min(max_concurrency, jobs.len())` of them concurrently via a
//! semaphore, and blocks the submitter until all of them finished. The
//! original tool used a channel-as-semaphore pattern for this; here the
//! admission permits are an explicit `tokio::sync::Semaphore` owned by the
//! pool for the lifetime of one batch.
//!
//! Completion order is not guaranteed; callers associate outcomes through
//! [`JobId`](super::JobId), never through result position. A panic inside
//! one job's execution is converted into a [`JobError`] for that job only
//! and never abandons sibling jobs.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::job::{BatchOutcome, Job, JobError, JobResult};
use super::FetchError;
use crate::config::{ConfigError, MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Atomic counters tracking one batch run.
///
/// Updated from concurrent worker tasks; read for the completion log line.
#[derive(Debug, Default)]
pub(crate) struct BatchStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchStats {
    fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Bounded-concurrency executor for job batches.
#[derive(Debug)]
pub struct WorkerPool {
    /// Admission permits; the sole concurrency-limiting resource.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency bound.
    max_concurrency: usize,
}

impl WorkerPool {
    /// Creates a pool with the given concurrency bound.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConcurrency`] when the bound is outside
    /// `1..=100`.
    #[instrument(level = "debug")]
    pub fn new(max_concurrency: usize) -> Result<Self, ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(ConfigError::InvalidConcurrency {
                value: max_concurrency,
            });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        })
    }

    /// Returns the configured concurrency bound.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Executes every job through `execute`, at most `max_concurrency` at a
    /// time, and blocks until the whole batch completed.
    ///
    /// The returned [`BatchOutcome`]'s result and error sets are disjoint
    /// and together account for every submitted job exactly once.
    #[instrument(skip(self, jobs, execute), fields(jobs = jobs.len(), bound = self.max_concurrency))]
    pub async fn run_batch<F, Fut>(&self, jobs: Vec<Job>, execute: F) -> BatchOutcome
    where
        F: Fn(Job) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<JobResult, JobError>> + Send + 'static,
    {
        let stats = Arc::new(BatchStats::default());
        let mut handles = Vec::with_capacity(jobs.len());

        info!("starting batch");

        for job in jobs {
            let job_id = job.id.clone();

            // Acquire the admission permit before spawning so producers are
            // back-pressured at the bound rather than queueing unbounded
            // tasks.
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Semaphore closed mid-batch; account for the job
                    // rather than dropping its outcome.
                    handles.push((job_id.clone(), None));
                    continue;
                }
            };

            debug!(job_id = %job_id, "admitting job");

            let execute = execute.clone();
            let stats = Arc::clone(&stats);
            let handle = tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                let outcome = execute(job).await;
                match &outcome {
                    Ok(_) => stats.completed.fetch_add(1, Ordering::SeqCst),
                    Err(_) => stats.failed.fetch_add(1, Ordering::SeqCst),
                };
                outcome
            });
            handles.push((job_id, Some(handle)));
        }

        let mut outcome = BatchOutcome::default();
        for (job_id, handle) in handles {
            match handle {
                Some(handle) => match handle.await {
                    Ok(Ok(result)) => outcome.results.push(result),
                    Ok(Err(error)) => outcome.errors.push(error),
                    Err(join_error) => {
                        warn!(job_id = %job_id, error = %join_error, "worker task panicked");
                        outcome.errors.push(JobError {
                            job_id,
                            cause: FetchError::TaskAborted {
                                detail: join_error.to_string(),
                            },
                            attempts: 0,
                        });
                    }
                },
                None => outcome.errors.push(JobError {
                    job_id,
                    cause: FetchError::TaskAborted {
                        detail: "admission permits closed".to_string(),
                    },
                    attempts: 0,
                }),
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            total = outcome.total(),
            "batch complete"
        );

        outcome
    }
}
