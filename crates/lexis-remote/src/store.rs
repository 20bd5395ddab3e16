//! The remote document store boundary.

use async_trait::async_trait;

use crate::{Entry, RemoteError, WriteOp};

/// Authoritative document store.
///
/// Every write is a full-document put or a delete, so replaying any prefix
/// of operations is safe.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch every document in a collection.
    async fn get_collection(&self, collection: &str) -> Result<Vec<Entry>, RemoteError>;

    /// Write one document, replacing any existing document with the same id.
    async fn put_document(&self, collection: &str, entry: &Entry) -> Result<(), RemoteError>;

    /// Delete one document. Deleting a missing document succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Apply a batch atomically: either every operation lands or none does.
    async fn commit_batch(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError>;

    /// The store's hard ceiling on operations per batch.
    fn batch_limit(&self) -> usize;
}
