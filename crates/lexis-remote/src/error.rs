//! Error types for the remote document store.

use thiserror::Error;

/// Errors that can occur when talking to the remote document store.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The store could not be reached (connection refused, DNS, reset).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// A request did not complete within the configured timeout.
    #[error("remote request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The store refused a write or read (validation, permissions).
    #[error("remote store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured base URL cannot address documents.
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A batch exceeded the store's atomic write ceiling.
    #[error("batch of {len} operations exceeds the store limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
}

impl RemoteError {
    /// Whether this error means the store is unreachable rather than
    /// refusing the request. Unreachable stores trigger offline fallback.
    pub fn is_unavailable(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) | RemoteError::Timeout(_) => true,
            RemoteError::RateLimited { .. } => true,
            RemoteError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }

    /// Whether a retry of the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) | RemoteError::Timeout(_) => true,
            RemoteError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
