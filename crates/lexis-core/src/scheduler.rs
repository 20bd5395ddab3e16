//! Staleness-driven refresh of cached collections.
//!
//! Each collection has a slot holding a lock, its refresh state, and a
//! generation counter bumped whenever a refresh attempt finishes. Callers
//! that queue behind an in-flight refresh see the generation change when they
//! acquire the lock and take that refresh's outcome instead of pulling again.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use lexis_remote::{Entry, RemoteError, RemoteStore};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::cache::LocalCache;
use crate::error::{LexisError, Result};
use crate::metadata::SyncMetadata;

/// Refresh state of a cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CollectionState {
    /// Synced within its max age.
    Fresh = 0,
    /// Never synced, or synced longer ago than its max age.
    Stale = 1,
    /// A pull from the remote store is in flight.
    Refreshing = 2,
}

impl From<u8> for CollectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => CollectionState::Fresh,
            2 => CollectionState::Refreshing,
            _ => CollectionState::Stale,
        }
    }
}

/// Result of asking for a collection to be fresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// A new snapshot was written to the cache.
    pub refreshed: bool,
    /// The remote store was unreachable; cached data is served as-is.
    pub degraded: bool,
}

impl RefreshOutcome {
    const SKIPPED: Self = Self {
        refreshed: false,
        degraded: false,
    };
    const REFRESHED: Self = Self {
        refreshed: true,
        degraded: false,
    };
    pub(crate) const DEGRADED: Self = Self {
        refreshed: false,
        degraded: true,
    };
}

/// Outcome of the last finished refresh, shared with waiters.
#[derive(Debug, Clone)]
enum Settled {
    Done(RefreshOutcome),
    Failed(Arc<LexisError>),
}

impl Settled {
    fn into_result(self, collection: &str) -> Result<RefreshOutcome> {
        match self {
            Settled::Done(outcome) => Ok(outcome),
            Settled::Failed(source) => Err(LexisError::RefreshFailed {
                collection: collection.to_string(),
                source,
            }),
        }
    }
}

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    state: AtomicU8,
    generation: AtomicU64,
    last: Mutex<Option<Settled>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::new(AsyncMutex::new(())),
            state: AtomicU8::new(CollectionState::Stale as u8),
            generation: AtomicU64::new(0),
            last: Mutex::new(None),
        }
    }

    /// Publish a finished refresh to waiters. A failure is shared, so the
    /// caller that ran the refresh gets the same error as those that joined.
    fn settle(&self, collection: &str, result: Result<RefreshOutcome>) -> Result<RefreshOutcome> {
        let (state, settled) = match result {
            Ok(outcome) if outcome.refreshed => (CollectionState::Fresh, Settled::Done(outcome)),
            Ok(outcome) => (CollectionState::Stale, Settled::Done(outcome)),
            Err(e) => (CollectionState::Stale, Settled::Failed(Arc::new(e))),
        };
        self.state.store(state as u8, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(settled.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        settled.into_result(collection)
    }

    fn last(&self) -> Option<Settled> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Run a remote call under a timeout; an elapsed timeout counts as the store
/// being unreachable.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = std::result::Result<T, RemoteError>>,
) -> std::result::Result<T, RemoteError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(timeout)),
    }
}

/// Decides when cached collections are refreshed from the remote store.
pub struct SyncScheduler {
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    remote_timeout: Duration,
    slots: DashMap<String, Arc<Slot>>,
}

impl SyncScheduler {
    pub fn new(cache: Arc<LocalCache>, remote: Arc<dyn RemoteStore>, remote_timeout: Duration) -> Self {
        Self {
            cache,
            remote,
            remote_timeout,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, collection: &str) -> Arc<Slot> {
        self.slots
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone()
    }

    /// Acquire a collection's lock. Refreshes and single-record writes on the
    /// same collection are serialized through it.
    pub async fn lock(&self, collection: &str) -> OwnedMutexGuard<()> {
        self.slot(collection).lock.clone().lock_owned().await
    }

    /// Whether a collection needs a refresh under the given max age.
    pub fn is_due(&self, collection: &str, max_age: chrono::Duration) -> Result<bool> {
        Ok(match self.cache.sync_metadata(collection)? {
            Some(meta) => meta.is_stale(Utc::now(), max_age),
            None => true,
        })
    }

    /// Current state of a collection under the given max age.
    pub fn state(&self, collection: &str, max_age: chrono::Duration) -> Result<CollectionState> {
        let slot = self.slot(collection);
        if CollectionState::from(slot.state.load(Ordering::SeqCst)) == CollectionState::Refreshing {
            return Ok(CollectionState::Refreshing);
        }
        Ok(if self.is_due(collection, max_age)? {
            CollectionState::Stale
        } else {
            CollectionState::Fresh
        })
    }

    /// Make sure a collection is no older than `max_age`, pulling a snapshot
    /// if needed.
    ///
    /// Concurrent calls for the same collection share one pull. An
    /// unreachable store yields a degraded outcome and leaves the cache and
    /// its sync metadata untouched.
    pub async fn ensure_fresh(
        &self,
        collection: &str,
        max_age: chrono::Duration,
    ) -> Result<RefreshOutcome> {
        if !self.is_due(collection, max_age)? {
            return Ok(RefreshOutcome::SKIPPED);
        }

        let slot = self.slot(collection);
        let observed = slot.generation.load(Ordering::SeqCst);
        let _guard = slot.lock.clone().lock_owned().await;

        if slot.generation.load(Ordering::SeqCst) != observed {
            debug!(collection, "joined in-flight refresh");
            return match slot.last() {
                Some(settled) => settled.into_result(collection),
                None => Ok(RefreshOutcome::SKIPPED),
            };
        }

        // A write may have held the lock; staleness can only have improved.
        if !self.is_due(collection, max_age)? {
            return Ok(RefreshOutcome::SKIPPED);
        }

        slot.state
            .store(CollectionState::Refreshing as u8, Ordering::SeqCst);
        let result = self.pull(collection).await;
        slot.settle(collection, result)
    }

    async fn pull(&self, collection: &str) -> Result<RefreshOutcome> {
        let fetched = with_timeout(self.remote_timeout, self.remote.get_collection(collection)).await;
        match fetched {
            Ok(entries) => {
                let entries: Vec<Entry> = entries.into_iter().map(Entry::normalized).collect();
                self.cache.replace_all(collection, &entries)?;
                self.cache.set_sync_metadata(&SyncMetadata::now(collection))?;
                info!(collection, count = entries.len(), "collection refreshed");
                Ok(RefreshOutcome::REFRESHED)
            }
            Err(e) if e.is_unavailable() => {
                warn!(collection, error = %e, "remote store unreachable, serving cached data");
                Ok(RefreshOutcome::DEGRADED)
            }
            Err(e) => {
                warn!(collection, error = %e, "refresh rejected by remote store");
                Err(e.into())
            }
        }
    }
}
