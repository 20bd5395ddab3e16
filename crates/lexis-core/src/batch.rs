//! Splitting write lists into bounded atomic batches.

use std::time::Duration;

use lexis_remote::{REMOTE_BATCH_HARD_LIMIT, RemoteStore, WriteOp};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_REMOTE_TIMEOUT_SECS;
use crate::error::{LexisError, Result};
use crate::scheduler::with_timeout;

/// Progress after a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// Operations committed so far.
    pub applied: usize,
    /// Operations in the whole run.
    pub total: usize,
    /// Zero-based index of the batch just committed.
    pub batch_index: usize,
    /// Batches in the whole run.
    pub batches: usize,
}

impl BatchProgress {
    /// Fraction of operations committed, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.applied as f64 / self.total as f64
        }
    }
}

/// Summary of a finished batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub batches: usize,
    pub applied: usize,
}

/// Commits operations to the remote store in batches of at most `limit`.
#[derive(Debug, Clone)]
pub struct BatchCommitter {
    limit: usize,
    remote_timeout: Duration,
}

impl BatchCommitter {
    /// Create a committer with the given batch ceiling.
    ///
    /// # Errors
    ///
    /// Returns `LexisError::BatchLimitExceeded` when `limit` is zero or above
    /// [`REMOTE_BATCH_HARD_LIMIT`].
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 || limit > REMOTE_BATCH_HARD_LIMIT {
            return Err(LexisError::BatchLimitExceeded {
                limit,
                hard_limit: REMOTE_BATCH_HARD_LIMIT,
            });
        }
        Ok(Self {
            limit,
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        })
    }

    /// Timeout applied to each batch commit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of batches needed for `total` operations.
    pub fn batch_count(&self, total: usize) -> usize {
        total.div_ceil(self.limit)
    }

    /// Commit `ops` in order, one atomic batch at a time.
    ///
    /// `on_committed` receives each batch after the store accepted it, and
    /// `on_progress` is called after each batch. Setting the cancel flag
    /// stops the run before the next batch; batches already committed stay
    /// committed.
    pub async fn commit<C, P>(
        &self,
        remote: &dyn RemoteStore,
        ops: Vec<WriteOp>,
        mut on_committed: C,
        mut on_progress: P,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<BatchReport>
    where
        C: FnMut(&[WriteOp]),
        P: FnMut(BatchProgress),
    {
        let limit = self.limit.min(remote.batch_limit()).max(1);
        let total = ops.len();
        let batches = total.div_ceil(limit);
        let mut applied = 0;
        let mut committed_ids = Vec::new();

        for (batch_index, chunk) in ops.chunks(limit).enumerate() {
            if cancel.is_some_and(|rx| *rx.borrow()) {
                info!(applied, total, "batch run cancelled");
                return Err(LexisError::Cancelled { applied });
            }

            let result = with_timeout(self.remote_timeout, remote.commit_batch(chunk.to_vec())).await;
            if let Err(e) = result {
                warn!(batch_index, applied, error = %e, "batch commit failed");
                return Err(LexisError::BatchFailed {
                    batch_index,
                    applied,
                    committed_ids,
                    source: Box::new(e.into()),
                });
            }

            applied += chunk.len();
            committed_ids.extend(chunk.iter().map(|op| op.id().to_string()));
            on_committed(chunk);
            on_progress(BatchProgress {
                applied,
                total,
                batch_index,
                batches,
            });
            debug!(batch_index, size = chunk.len(), applied, total, "batch committed");
        }

        Ok(BatchReport { batches, applied })
    }
}
