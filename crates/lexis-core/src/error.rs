//! Error types for the cache, sync, and merge engine.

use std::sync::Arc;

use lexis_remote::RemoteError;
use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum LexisError {
    /// The remote store could not be reached or timed out.
    #[error(transparent)]
    RemoteUnavailable(RemoteError),

    /// The remote store refused the request or answered with garbage.
    #[error(transparent)]
    RemoteRejected(RemoteError),

    /// A collection refresh failed. Every caller that waited on the same
    /// refresh receives the same underlying error.
    #[error("refresh of {collection} failed: {source}")]
    RefreshFailed {
        collection: String,
        #[source]
        source: Arc<LexisError>,
    },

    /// A cached row could not be decoded.
    #[error("cache corrupt in {collection}: {message}")]
    CacheCorrupt { collection: String, message: String },

    /// A batch ceiling outside the store's accepted range.
    #[error("batch limit {limit} is outside 1..={hard_limit}")]
    BatchLimitExceeded { limit: usize, hard_limit: usize },

    /// A batch failed after earlier batches were committed.
    #[error("batch {batch_index} failed after {applied} operations were applied: {source}")]
    BatchFailed {
        batch_index: usize,
        applied: usize,
        committed_ids: Vec<String>,
        #[source]
        source: Box<LexisError>,
    },

    /// Nothing cached and the remote store is unavailable.
    #[error("no data available for {0}: cache is empty and the remote store is unreachable")]
    DataUnavailable(String),

    /// A batch run was cancelled between batches.
    #[error("cancelled after {applied} operations were applied")]
    Cancelled { applied: usize },

    /// The engine was closed.
    #[error("engine is closed")]
    Closed,

    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LexisError {
    /// Whether this error means the remote store is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.root_cause(), LexisError::RemoteUnavailable(_))
    }

    /// The error behind any shared refresh failure.
    pub fn root_cause(&self) -> &LexisError {
        match self {
            LexisError::RefreshFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<RemoteError> for LexisError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::BatchTooLarge { len, max } => LexisError::BatchLimitExceeded {
                limit: len,
                hard_limit: max,
            },
            err if err.is_unavailable() => LexisError::RemoteUnavailable(err),
            err => LexisError::RemoteRejected(err),
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, LexisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_classification() {
        let err: LexisError = RemoteError::Unavailable("down".to_string()).into();
        assert!(err.is_unavailable());

        let err: LexisError = RemoteError::Timeout(std::time::Duration::from_secs(5)).into();
        assert!(err.is_unavailable());

        let err: LexisError = RemoteError::Rejected {
            status: 403,
            message: "denied".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            LexisError::RemoteRejected(RemoteError::Rejected { status: 403, .. })
        ));
        assert_eq!(err.to_string(), "remote store rejected request (403): denied");

        let err: LexisError = RemoteError::BatchTooLarge { len: 600, max: 500 }.into();
        assert!(matches!(
            err,
            LexisError::BatchLimitExceeded {
                limit: 600,
                hard_limit: 500
            }
        ));
    }

    #[test]
    fn test_refresh_failure_keeps_its_kind() {
        let inner: LexisError = RemoteError::Rejected {
            status: 500,
            message: "internal".to_string(),
        }
        .into();
        let err = LexisError::RefreshFailed {
            collection: "vocabularies".to_string(),
            source: Arc::new(inner),
        };
        assert!(matches!(err.root_cause(), LexisError::RemoteRejected(_)));
        assert!(!err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "refresh of vocabularies failed: remote store rejected request (500): internal"
        );

        let err = LexisError::RefreshFailed {
            collection: "vocabularies".to_string(),
            source: Arc::new(RemoteError::Unavailable("down".to_string()).into()),
        };
        assert!(err.is_unavailable());
    }
}
