//! Job and batch outcome types.
//!
//! A [`Job`] is one unit of outbound work: a listing fetch or a file
//! download. Jobs are built by per-site adapters and are immutable once
//! enqueued; the engine correlates outcomes back to source entities via the
//! caller-assigned [`JobId`], never via result position. The original tool
//! shuttled these around as ad hoc `map[string]string` records; the typed
//! structures here replace that.

use std::path::PathBuf;

use reqwest::Method;

use super::FetchError;

/// Caller-assigned identity of one job (e.g. an artwork or post ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One unit of outbound work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Job {
    /// Caller-assigned identity used to correlate the outcome.
    pub id: JobId,
    /// HTTP method; listings are GETs, token exchanges POSTs.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Extra request headers beyond the engine's auth/identity set.
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to the URL.
    pub params: Vec<(String, String)>,
    /// When set, the response body is streamed to this path instead of
    /// being buffered; the write goes through a temporary path promoted on
    /// full success.
    pub destination: Option<PathBuf>,
}

impl Job {
    /// Creates a GET job with no extra headers or params.
    #[must_use]
    pub fn get(id: impl Into<JobId>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            params: Vec::new(),
            destination: None,
        }
    }

    /// Adds one query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Adds one request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Turns the job into a download that streams to `destination`.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Returns true when the job streams its body to disk.
    #[must_use]
    pub fn is_download(&self) -> bool {
        self.destination.is_some()
    }
}

/// Payload of a completed job.
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Buffered response body (listing calls).
    Bytes(Vec<u8>),
    /// Promoted path of a streamed download.
    File(PathBuf),
}

/// Produced at most once per job that completed without exhausting retries.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// Identity of the job this result belongs to.
    pub job_id: JobId,
    /// Response payload.
    pub payload: JobPayload,
    /// HTTP status code of the final successful response.
    pub status: u16,
    /// Attempts spent before succeeding (1 when the first try landed).
    pub attempts: u32,
}

impl JobResult {
    /// Returns the buffered body, or `None` for download results.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            JobPayload::Bytes(bytes) => Some(bytes),
            JobPayload::File(_) => None,
        }
    }

    /// Returns the promoted file path, or `None` for buffered results.
    #[must_use]
    pub fn file_path(&self) -> Option<&std::path::Path> {
        match &self.payload {
            JobPayload::File(path) => Some(path),
            JobPayload::Bytes(_) => None,
        }
    }
}

/// Produced at most once per job that exhausted retries or hit a terminal
/// failure.
#[derive(Debug)]
pub struct JobError {
    /// Identity of the job this error belongs to.
    pub job_id: JobId,
    /// The failure that ended the job.
    pub cause: FetchError,
    /// Attempts made before giving up (0 when the job never reached the
    /// transport, e.g. an up-front auth failure or a panicked task).
    pub attempts: u32,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {} failed after {} attempt(s): {}",
            self.job_id, self.attempts, self.cause
        )
    }
}

/// Outcome of one batch: results and errors are disjoint by job ID and
/// together account for every submitted job exactly once.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Jobs that completed successfully, in completion order.
    pub results: Vec<JobResult>,
    /// Jobs that failed terminally or exhausted retries.
    pub errors: Vec<JobError>,
}

impl BatchOutcome {
    /// Total number of accounted jobs.
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    /// Returns true when every job succeeded.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display_and_eq() {
        let a = JobId::new("artwork-123");
        let b = JobId::from("artwork-123");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "artwork-123");
        assert_eq!(a.as_str(), "artwork-123");
    }

    #[test]
    fn test_job_builder() {
        let job = Job::get("42", "https://api.example.com/v1/listing")
            .with_param("offset", "30")
            .with_header("Referer", "https://api.example.com");
        assert_eq!(job.method, Method::GET);
        assert_eq!(job.params, vec![("offset".into(), "30".into())]);
        assert_eq!(job.headers.len(), 1);
        assert!(!job.is_download());
    }

    #[test]
    fn test_job_with_destination_is_download() {
        let job = Job::get("42", "https://cdn.example.com/img/42.png")
            .with_destination("/tmp/out/42.png");
        assert!(job.is_download());
        assert_eq!(
            job.destination.as_deref(),
            Some(std::path::Path::new("/tmp/out/42.png"))
        );
    }

    #[test]
    fn test_job_result_accessors() {
        let buffered = JobResult {
            job_id: JobId::new("a"),
            payload: JobPayload::Bytes(b"{}".to_vec()),
            status: 200,
            attempts: 1,
        };
        assert_eq!(buffered.bytes(), Some(b"{}".as_slice()));
        assert!(buffered.file_path().is_none());

        let file = JobResult {
            job_id: JobId::new("b"),
            payload: JobPayload::File(PathBuf::from("/tmp/x.bin")),
            status: 200,
            attempts: 1,
        };
        assert!(file.bytes().is_none());
        assert!(file.file_path().is_some());
    }

    #[test]
    fn test_job_error_display() {
        let error = JobError {
            job_id: JobId::new("a"),
            cause: FetchError::http_status("https://api.example.com/x", 404),
            attempts: 1,
        };
        let msg = error.to_string();
        assert!(msg.contains("job a"), "in: {msg}");
        assert!(msg.contains("1 attempt"), "in: {msg}");
        assert!(msg.contains("404"), "in: {msg}");
    }

    #[test]
    fn test_batch_outcome_totals() {
        let outcome = BatchOutcome {
            results: vec![JobResult {
                job_id: JobId::new("a"),
                payload: JobPayload::Bytes(Vec::new()),
                status: 200,
                attempts: 1,
            }],
            errors: vec![JobError {
                job_id: JobId::new("b"),
                cause: FetchError::timeout("https://api.example.com/x"),
                attempts: 5,
            }],
        };
        assert_eq!(outcome.total(), 2);
        assert!(!outcome.is_complete_success());
    }
}
