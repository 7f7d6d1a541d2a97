//! Error types for the transfer layer.
//!
//! The `Display` text of these errors is what lands in a job's `last_error`,
//! so each message names the URL or path involved.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a transfer attempt before a usable file exists.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request never produced a usable response.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timeout elapsed.
    #[error("timeout downloading {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// Writing or removing the destination file failed.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The job's URL does not parse.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// Rejected input.
        url: String,
    },

    /// The body ended before the announced length was received.
    #[error("incomplete transfer to {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Incomplete {
        /// Partial file path.
        path: PathBuf,
        /// Announced size in bytes.
        expected_bytes: u64,
        /// Bytes on disk.
        actual_bytes: u64,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The transfer task was cancelled or panicked.
    #[error("transfer aborted: {reason}")]
    Aborted {
        /// What ended the task.
        reason: String,
    },
}

impl TransferError {
    /// Creates a network error, promoting reqwest timeouts to [`TransferError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
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

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}
