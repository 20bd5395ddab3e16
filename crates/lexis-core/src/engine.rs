//! The engine facade used by the application.
//!
//! Reads are cache-first with staleness-driven refresh. Writes go through the
//! remote store before the cache. Merges and imports are committed in bounded
//! batches and mirrored into the cache as each batch lands.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use lexis_remote::{Entry, RemoteStore, WriteOp};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{BatchCommitter, BatchProgress, BatchReport};
use crate::cache::{CacheEvent, LocalCache};
use crate::config::{EngineConfig, max_age_from_minutes};
use crate::dedupe::{DuplicateGroup, detect_duplicates};
use crate::error::{LexisError, Result};
use crate::merge::{MergePlan, MergeResult, plan_merge};
use crate::scheduler::{CollectionState, RefreshOutcome, SyncScheduler, with_timeout};

/// Entries served by a collection read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub entries: Vec<Entry>,
    /// The refresh could not complete and the entries may be stale.
    pub degraded: bool,
}

/// Cache status of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub cached: usize,
    pub indexed: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub state: CollectionState,
}

/// Offline-capable access to the remote collections.
pub struct Engine {
    config: EngineConfig,
    cache: Arc<LocalCache>,
    remote: Arc<dyn RemoteStore>,
    scheduler: Arc<SyncScheduler>,
    committer: BatchCommitter,
    closed: AtomicBool,
}

impl Engine {
    /// Open the engine: validate the config, open the cache, and rebuild the
    /// search index.
    pub fn open(config: EngineConfig, remote: Arc<dyn RemoteStore>) -> Result<Arc<Self>> {
        config.validate()?;
        let cache = Arc::new(LocalCache::open(
            config.db_path.as_deref(),
            config.event_capacity,
        )?);
        let scheduler = Arc::new(SyncScheduler::new(
            cache.clone(),
            remote.clone(),
            config.remote_timeout(),
        ));
        let committer = BatchCommitter::new(config.batch_limit)?.with_timeout(config.remote_timeout());

        info!(
            db = ?config.db_path,
            batch_limit = config.batch_limit,
            "engine opened"
        );
        Ok(Arc::new(Self {
            config,
            cache,
            remote,
            scheduler,
            committer,
            closed: AtomicBool::new(false),
        }))
    }

    /// Stop accepting operations. Background refreshes already running are
    /// allowed to finish.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("engine closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LexisError::Closed);
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one entry, cache-first.
    ///
    /// A collection that was never synced is pulled before answering. A
    /// stale collection is answered from the cache while a refresh runs in
    /// the background.
    #[tracing::instrument(skip(self))]
    pub async fn read(self: &Arc<Self>, collection: &str, id: &str) -> Result<Option<Entry>> {
        self.ensure_open()?;
        let max_age = self.config.max_age(collection);

        match self.cache.sync_metadata(collection)? {
            None => {
                let outcome = self.refresh_or_degrade(collection, max_age).await;
                self.check_available(collection, outcome)?;
            }
            Some(meta) if meta.is_stale(Utc::now(), max_age) => self.spawn_refresh(collection),
            Some(_) => {}
        }

        match self.cache.get(collection, id) {
            Err(LexisError::CacheCorrupt { .. }) => {
                let outcome = self.recover(collection).await?;
                self.check_available(collection, outcome)?;
                self.cache.get(collection, id)
            }
            result => result,
        }
    }

    /// Read a whole collection, refreshing it first when stale.
    #[tracing::instrument(skip(self))]
    pub async fn read_all(&self, collection: &str) -> Result<ReadOutcome> {
        self.ensure_open()?;
        let outcome = self
            .refresh_or_degrade(collection, self.config.max_age(collection))
            .await;
        self.check_available(collection, outcome)?;

        let (entries, degraded) = match self.cache.get_all(collection) {
            Ok(entries) => (entries, outcome.degraded),
            Err(LexisError::CacheCorrupt { .. }) => {
                let outcome = self.recover(collection).await?;
                self.check_available(collection, outcome)?;
                (self.cache.get_all(collection)?, outcome.degraded)
            }
            Err(e) => return Err(e),
        };
        Ok(ReadOutcome { entries, degraded })
    }

    /// Full-text search over the cached collection, best match first.
    #[tracing::instrument(skip(self))]
    pub async fn search(
        self: &Arc<Self>,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        if self
            .scheduler
            .is_due(collection, self.config.max_age(collection))?
        {
            self.spawn_refresh(collection);
        }
        self.cache.search(collection, query, limit)
    }

    /// Refresh for a read. Any refresh failure degrades to the cached data;
    /// only `sync` and writes surface remote errors.
    async fn refresh_or_degrade(
        &self,
        collection: &str,
        max_age: chrono::Duration,
    ) -> RefreshOutcome {
        match self.scheduler.ensure_fresh(collection, max_age).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(collection, error = %e, "refresh failed, serving cached data");
                RefreshOutcome::DEGRADED
            }
        }
    }

    /// A degraded refresh over a collection that has never been synced and
    /// has nothing cached leaves nothing to serve.
    fn check_available(&self, collection: &str, outcome: RefreshOutcome) -> Result<()> {
        if outcome.degraded
            && self.cache.sync_metadata(collection)?.is_none()
            && self.cache.count(collection)? == 0
        {
            return Err(LexisError::DataUnavailable(collection.to_string()));
        }
        Ok(())
    }

    fn spawn_refresh(self: &Arc<Self>, collection: &str) {
        let engine = Arc::clone(self);
        let collection = collection.to_string();
        tokio::spawn(async move {
            let max_age = engine.config.max_age(&collection);
            match engine.scheduler.ensure_fresh(&collection, max_age).await {
                Ok(outcome) => debug!(collection = %collection, ?outcome, "background refresh finished"),
                Err(e) => warn!(collection = %collection, error = %e, "background refresh failed"),
            }
        });
    }

    /// Drop a corrupt collection and pull it again.
    async fn recover(&self, collection: &str) -> Result<RefreshOutcome> {
        warn!(collection, "cached collection is corrupt, dropping and refreshing");
        {
            let _guard = self.scheduler.lock(collection).await;
            self.cache.try_clear(collection)?;
            self.cache.clear_sync_metadata(collection)?;
        }
        Ok(self
            .refresh_or_degrade(collection, chrono::Duration::zero())
            .await)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Refresh a collection if it is older than `max_age_minutes` (or its
    /// configured max age). Returns whether a new snapshot was pulled.
    ///
    /// An unreachable store returns `false`; a store that refuses the read
    /// is an error.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, collection: &str, max_age_minutes: Option<u64>) -> Result<bool> {
        self.ensure_open()?;
        let max_age = match max_age_minutes {
            Some(minutes) => max_age_from_minutes(minutes)?,
            None => self.config.max_age(collection),
        };
        let outcome = self.scheduler.ensure_fresh(collection, max_age).await?;
        Ok(outcome.refreshed)
    }

    /// Refresh every configured collection concurrently.
    #[tracing::instrument(skip(self))]
    pub async fn sync_all(&self) -> Vec<(String, Result<bool>)> {
        let syncs = self.config.collections.iter().map(|collection| async move {
            (collection.clone(), self.sync(collection, None).await)
        });
        join_all(syncs).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn stamp_new(mut entry: Entry) -> Entry {
        let now = Utc::now();
        if entry.id.trim().is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.created_at == DateTime::<Utc>::default() {
            entry.created_at = now;
        }
        entry.updated_at = now;
        entry.normalized()
    }

    /// Create an entry. Blank ids are replaced with a fresh UUID.
    #[tracing::instrument(skip(self, entry), fields(id = %entry.id))]
    pub async fn add(&self, collection: &str, entry: Entry) -> Result<Entry> {
        self.ensure_open()?;
        self.write_through(collection, Self::stamp_new(entry)).await
    }

    /// Replace an existing entry's content.
    #[tracing::instrument(skip(self, entry), fields(id = %entry.id))]
    pub async fn update(&self, collection: &str, mut entry: Entry) -> Result<Entry> {
        self.ensure_open()?;
        entry.updated_at = Utc::now();
        self.write_through(collection, entry.normalized()).await
    }

    async fn write_through(&self, collection: &str, entry: Entry) -> Result<Entry> {
        let _guard = self.scheduler.lock(collection).await;
        with_timeout(
            self.config.remote_timeout(),
            self.remote.put_document(collection, &entry),
        )
        .await?;
        self.cache.put(collection, entry.clone());
        debug!(collection, id = %entry.id, "entry written");
        Ok(entry)
    }

    /// Delete an entry: index and cache first, then the remote store. The
    /// cached copy is restored if the remote delete fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.scheduler.lock(collection).await;
        let previous = self.cache.get(collection, id)?;
        self.cache.try_delete(collection, id)?;

        let result = with_timeout(
            self.config.remote_timeout(),
            self.remote.delete_document(collection, id),
        )
        .await;
        if let Err(e) = result {
            if let Some(previous) = previous {
                self.cache.put(collection, previous);
            }
            return Err(e.into());
        }
        debug!(collection, id, "entry deleted");
        Ok(())
    }

    // =========================================================================
    // Duplicates
    // =========================================================================

    /// Duplicate groups in the cached collection.
    #[tracing::instrument(skip(self))]
    pub fn detect_duplicates(&self, collection: &str) -> Result<Vec<DuplicateGroup>> {
        self.ensure_open()?;
        let groups = detect_duplicates(&self.cache.get_all(collection)?);
        info!(collection, groups = groups.len(), "duplicate scan finished");
        Ok(groups)
    }

    /// Members of a group still present in the cache.
    fn live_members(&self, collection: &str, group: &DuplicateGroup) -> Result<Vec<Entry>> {
        let mut live = Vec::with_capacity(group.members.len());
        for member in &group.members {
            match self.cache.get(collection, &member.id)? {
                Some(entry) => live.push(entry),
                None => debug!(collection, id = %member.id, "merge member no longer cached, skipping"),
            }
        }
        Ok(live)
    }

    /// Merge one group, fuzzy or exact. `explicit_keep` picks the survivor
    /// when it names a live member.
    ///
    /// Returns `None` when fewer than two members are still cached.
    #[tracing::instrument(skip(self, group), fields(key = %group.key))]
    pub async fn merge_group(
        &self,
        collection: &str,
        group: &DuplicateGroup,
        explicit_keep: Option<&str>,
    ) -> Result<Option<MergeResult>> {
        self.ensure_open()?;
        let _guard = self.scheduler.lock(collection).await;
        let Some(plan) = plan_merge(&self.live_members(collection, group)?, explicit_keep) else {
            debug!("nothing to merge");
            return Ok(None);
        };

        self.committer
            .commit(
                self.remote.as_ref(),
                plan.to_ops(collection),
                |batch| self.apply_committed(batch),
                |_| {},
                None,
            )
            .await?;
        info!(kept = %plan.kept.id, deleted = plan.deleted_ids.len(), updated = plan.needs_update, "group merged");
        Ok(Some(plan.into_result()))
    }

    /// Merge every exact group in one batched run. Fuzzy groups are skipped.
    #[tracing::instrument(skip(self, groups, on_progress, cancel), fields(groups = groups.len()))]
    pub async fn auto_merge_all(
        &self,
        collection: &str,
        groups: &[DuplicateGroup],
        on_progress: impl FnMut(BatchProgress),
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<MergeResult>> {
        self.ensure_open()?;
        let _guard = self.scheduler.lock(collection).await;

        let mut plans: Vec<MergePlan> = Vec::new();
        for group in groups {
            if !group.is_exact() {
                info!(key = %group.key, reason = %group.reason, "skipping fuzzy group");
                continue;
            }
            if let Some(plan) = plan_merge(&self.live_members(collection, group)?, None) {
                plans.push(plan);
            }
        }

        let ops: Vec<WriteOp> = plans.iter().flat_map(|p| p.to_ops(collection)).collect();
        let report = self
            .committer
            .commit(
                self.remote.as_ref(),
                ops,
                |batch| self.apply_committed(batch),
                on_progress,
                cancel,
            )
            .await?;

        info!(merged = plans.len(), batches = report.batches, ops = report.applied, "auto-merge finished");
        Ok(plans.into_iter().map(MergePlan::into_result).collect())
    }

    // =========================================================================
    // Bulk import
    // =========================================================================

    /// Write many entries in bounded batches. Duplicates are not checked
    /// here; run a duplicate scan afterwards.
    #[tracing::instrument(skip(self, entries, on_progress, cancel), fields(count = entries.len()))]
    pub async fn import(
        &self,
        collection: &str,
        entries: Vec<Entry>,
        on_progress: impl FnMut(BatchProgress),
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<BatchReport> {
        self.ensure_open()?;
        let _guard = self.scheduler.lock(collection).await;
        let ops: Vec<WriteOp> = entries
            .into_iter()
            .map(|entry| WriteOp::put(collection, Self::stamp_new(entry)))
            .collect();

        let report = self
            .committer
            .commit(
                self.remote.as_ref(),
                ops,
                |batch| self.apply_committed(batch),
                on_progress,
                cancel,
            )
            .await?;
        info!(collection, applied = report.applied, batches = report.batches, "import finished");
        Ok(report)
    }

    /// Mirror a committed batch into the cache.
    fn apply_committed(&self, batch: &[WriteOp]) {
        let same_run = |a: &WriteOp, b: &WriteOp| {
            a.collection() == b.collection()
                && matches!(
                    (a, b),
                    (WriteOp::Put { .. }, WriteOp::Put { .. })
                        | (WriteOp::Delete { .. }, WriteOp::Delete { .. })
                )
        };
        for run in batch.chunk_by(same_run) {
            let collection = run[0].collection();
            match &run[0] {
                WriteOp::Put { .. } => {
                    let entries = run
                        .iter()
                        .filter_map(|op| match op {
                            WriteOp::Put { entry, .. } => Some(entry.clone()),
                            WriteOp::Delete { .. } => None,
                        })
                        .collect();
                    self.cache.put_all(collection, entries);
                }
                WriteOp::Delete { .. } => {
                    let ids: Vec<String> = run.iter().map(|op| op.id().to_string()).collect();
                    self.cache.delete_all(collection, &ids);
                }
            }
        }
    }

    // =========================================================================
    // Events and maintenance
    // =========================================================================

    /// Stream of cache events for one collection.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub fn subscribe(&self, collection: &str) -> impl Stream<Item = CacheEvent> + Send + 'static {
        let collection = collection.to_string();
        BroadcastStream::new(self.cache.subscribe()).filter_map(move |event| match event {
            Ok(event) if event.collection() == collection => Some(event),
            Ok(_) => None,
            Err(e) => {
                warn!(collection = %collection, error = %e, "cache event subscriber lagged");
                None
            }
        })
    }

    /// Drop a collection's cached rows, index, and sync metadata.
    #[tracing::instrument(skip(self))]
    pub async fn clear_collection(&self, collection: &str) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.scheduler.lock(collection).await;
        self.cache.try_clear(collection)?;
        self.cache.clear_sync_metadata(collection)?;
        info!(collection, "collection cleared");
        Ok(())
    }

    /// Status of every configured or cached collection.
    pub fn stats(&self) -> Result<Vec<CollectionStats>> {
        self.ensure_open()?;
        let mut collections: BTreeSet<String> = self.config.collections.iter().cloned().collect();
        collections.extend(self.cache.collections()?);

        collections
            .into_iter()
            .map(|collection| -> Result<CollectionStats> {
                let max_age = self.config.max_age(&collection);
                Ok(CollectionStats {
                    cached: self.cache.count(&collection)?,
                    indexed: self.cache.index_ids(&collection).len(),
                    last_synced_at: self
                        .cache
                        .sync_metadata(&collection)?
                        .map(|meta| meta.last_synced_at),
                    state: self.scheduler.state(&collection, max_age)?,
                    collection,
                })
            })
            .collect()
    }
}
