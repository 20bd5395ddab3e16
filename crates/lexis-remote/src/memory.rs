//! In-process document store.
//!
//! Behaves like the remote store (atomic batches, batch ceiling, idempotent
//! writes) and can be switched offline, slowed down, or told to reject
//! specific ids. A test double: nothing outside the workspace's tests
//! builds one, and its contents do not outlive the process.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::{Entry, REMOTE_BATCH_HARD_LIMIT, RemoteError, RemoteStore, WriteOp};

/// Counters of calls made against a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_collection: usize,
    pub put_document: usize,
    pub delete_document: usize,
    pub commit_batch: usize,
}

/// In-memory document store.
pub struct MemoryStore {
    collections: DashMap<String, BTreeMap<String, Entry>>,
    reachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    rejected_ids: Mutex<HashSet<String>>,
    batch_limit: usize,
    get_collection_calls: AtomicUsize,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MemoryStore {
    /// Create an empty, reachable store with the standard batch ceiling.
    pub fn new() -> Self {
        Self::with_batch_limit(REMOTE_BATCH_HARD_LIMIT)
    }

    /// Create an empty store with a custom batch ceiling.
    pub fn with_batch_limit(batch_limit: usize) -> Self {
        Self {
            collections: DashMap::new(),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(None),
            rejected_ids: Mutex::new(HashSet::new()),
            batch_limit,
            get_collection_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Seed a collection without counting as a call.
    pub fn seed(&self, collection: &str, entries: impl IntoIterator<Item = Entry>) {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        for entry in entries {
            docs.insert(entry.id.clone(), entry);
        }
    }

    /// Toggle reachability. An unreachable store fails every call with
    /// [`RemoteError::Unavailable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Reject any write touching this id, as store-side validation would.
    pub fn reject_id(&self, id: impl Into<String>) {
        if let Ok(mut guard) = self.rejected_ids.lock() {
            guard.insert(id.into());
        }
    }

    /// Snapshot of a collection, ordered by id.
    pub fn documents(&self, collection: &str) -> Vec<Entry> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get one document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Entry> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Calls made so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get_collection: self.get_collection_calls.load(Ordering::SeqCst),
            put_document: self.put_calls.load(Ordering::SeqCst),
            delete_document: self.delete_calls.load(Ordering::SeqCst),
            commit_batch: self.batch_calls.load(Ordering::SeqCst),
        }
    }

    /// Sizes of every committed batch, in commit order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default()
    }

    async fn enter(&self) -> Result<(), RemoteError> {
        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn check_rejected(&self, id: &str) -> Result<(), RemoteError> {
        let rejected = self
            .rejected_ids
            .lock()
            .map(|ids| ids.contains(id))
            .unwrap_or(false);
        if rejected {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("document {} failed validation", id),
            });
        }
        Ok(())
    }

    fn apply(&self, op: WriteOp) {
        match op {
            WriteOp::Put { collection, entry } => {
                self.collections
                    .entry(collection)
                    .or_default()
                    .insert(entry.id.clone(), entry);
            }
            WriteOp::Delete { collection, id } => {
                if let Some(mut docs) = self.collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_collection(&self, collection: &str) -> Result<Vec<Entry>, RemoteError> {
        self.get_collection_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.documents(collection))
    }

    async fn put_document(&self, collection: &str, entry: &Entry) -> Result<(), RemoteError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.check_rejected(&entry.id)?;
        self.apply(WriteOp::put(collection, entry.clone()));
        trace!(collection, id = %entry.id, "memory store: put");
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.check_rejected(id)?;
        self.apply(WriteOp::delete(collection, id));
        trace!(collection, id, "memory store: delete");
        Ok(())
    }

    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if ops.len() > self.batch_limit {
            return Err(RemoteError::BatchTooLarge {
                len: ops.len(),
                max: self.batch_limit,
            });
        }
        // Validate everything before applying anything.
        for op in &ops {
            self.check_rejected(op.id())?;
        }
        if let Ok(mut sizes) = self.batch_sizes.lock() {
            sizes.push(ops.len());
        }
        for op in ops {
            self.apply(op);
        }
        Ok(())
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> Entry {
        Entry::new(id, "run", "দৌড়ানো", "Verb")
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryStore::new();
        store.reject_id("bad");

        let result = store
            .commit_batch(vec![
                WriteOp::put("vocabularies", entry("good")),
                WriteOp::put("vocabularies", entry("bad")),
            ])
            .await;

        assert!(matches!(result, Err(RemoteError::Rejected { .. })));
        assert!(store.documents("vocabularies").is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_enforced() {
        let store = MemoryStore::with_batch_limit(1);
        let result = store
            .commit_batch(vec![
                WriteOp::delete("vocabularies", "a"),
                WriteOp::delete("vocabularies", "b"),
            ])
            .await;
        assert!(matches!(result, Err(RemoteError::BatchTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_offline_store() {
        let store = MemoryStore::new();
        store.seed("vocabularies", vec![entry("a")]);
        store.set_reachable(false);

        let err = store.get_collection("vocabularies").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.calls().get_collection, 1);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryStore::new();
        store.put_document("vocabularies", &entry("a")).await.unwrap();
        store.put_document("vocabularies", &entry("a")).await.unwrap();
        assert_eq!(store.documents("vocabularies").len(), 1);
        store.delete_document("vocabularies", "missing").await.unwrap();
    }
}
