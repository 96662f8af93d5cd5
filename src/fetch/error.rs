//! Error types for the fetch module.

use std::path::PathBuf;

use thiserror::Error;

use crate::encryption::DecryptionError;

/// Errors that can occur while fetching or writing a file.
///
/// Nothing here is retried by the fetcher itself; retry policy is a caller
/// concern.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors,
    /// broken streams).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response other than the specifically classified codes.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The remote service refused access to this item (401/403).
    #[error("access denied (HTTP {status}) fetching {url}")]
    AccessDenied {
        /// The URL that was refused.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The remote service signaled rate limiting (429). No automatic backoff
    /// happens here; the error surfaces to the caller.
    #[error("rate limited while fetching {url}")]
    Throttled {
        /// The URL that was throttled.
        url: String,
        /// The Retry-After header value, if the server sent one.
        retry_after: Option<String>,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// File system error while writing the fetched payload.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The accumulated payload could not be decrypted.
    #[error("failed to decrypt {context}: {source}")]
    Decryption {
        /// What was being decrypted (URL or "local payload").
        context: String,
        /// The underlying decryption error.
        #[source]
        source: DecryptionError,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
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
        }
    }

    /// Creates an access-denied error.
    pub fn access_denied(url: impl Into<String>, status: u16) -> Self {
        Self::AccessDenied {
            url: url.into(),
            status,
        }
    }

    /// Creates a throttled error.
    pub fn throttled(url: impl Into<String>, retry_after: Option<String>) -> Self {
        Self::Throttled {
            url: url.into(),
            retry_after,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a decryption error with fetch context.
    pub fn decryption(context: impl Into<String>, source: DecryptionError) -> Self {
        Self::Decryption {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the remote service refused access to the item.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}
