//! Error types for the fetch module.
//!
//! This module defines structured errors for all outbound operations,
//! providing context-rich error values that collaborators aggregate into
//! user-facing logs. The taxonomy drives retry classification: see
//! [`classify_error`](super::retry::classify_error).

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;

/// Errors that can occur while executing fetch/download jobs.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Transport {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The site rejected the bearer credential as expired or invalid.
    ///
    /// Triggers at most one token refresh plus one bonus retry per logical
    /// request; a refresh does not override an otherwise successful response.
    #[error("credential rejected (HTTP {status}) requesting {url}")]
    AuthExpired {
        /// The URL that rejected the credential.
        url: String,
        /// The HTTP status code the rejection arrived with.
        status: u16,
    },

    /// Token refresh itself failed; fatal for every job on the site.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// A listing page body could not be decoded by the adapter.
    ///
    /// Terminal: retrying reproduces the same malformed data.
    #[error("decode failure for {url}: {message}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// Adapter-supplied description of the failure.
        message: String,
    },

    /// File system error while persisting a download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A worker task aborted (panicked) before producing an outcome.
    #[error("worker task aborted: {detail}")]
    TaskAborted {
        /// Join-error description of the abort.
        detail: String,
    },

    /// The attempt ceiling was reached; wraps the last observed failure.
    #[error("request failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The failure observed on the final attempt.
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Creates a transport error from a reqwest error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a credential-expiry error.
    pub fn auth_expired(url: impl Into<String>, status: u16) -> Self {
        Self::AuthExpired {
            url: url.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Wraps the last failure observed when the attempt ceiling is reached.
    #[must_use]
    pub fn exhausted(attempts: u32, last: FetchError) -> Self {
        Self::ExhaustedRetries {
            attempts,
            last: Box::new(last),
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because the variants require context (url, path)
// that the source errors do not provide. The helper constructors are the
// pattern here; callers supply the missing context at the call site.
