//! Error types for the network collaborator.

use thiserror::Error;

/// Errors a [`Network`](super::Network) reports through its completion callback.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The resource key is not a fetchable URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected key.
        url: String,
    },

    /// Connection, TLS or body-stream failure.
    #[error("network error loading {url}: {source}")]
    Transport {
        /// The URL being loaded.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded its timeout.
    #[error("timeout loading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} loading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Body larger than the configured limit.
    #[error("response for {url} exceeds {limit} bytes")]
    TooLarge {
        /// The URL being loaded.
        url: String,
        /// The configured limit in bytes.
        limit: u64,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl NetworkError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Classifies a reqwest error as a timeout or a transport failure.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Transport {
                url: url.into(),
                source,
            }
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

    /// Creates a body-too-large error.
    pub fn too_large(url: impl Into<String>, limit: u64) -> Self {
        Self::TooLarge {
            url: url.into(),
            limit,
        }
    }

    /// Returns the HTTP status for [`NetworkError::HttpStatus`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
