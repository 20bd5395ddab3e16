//! SQLite-backed local cache of remote collections.
//!
//! Records are stored as JSON bodies alongside the extracted key columns used
//! for indexed lookups. The [`SearchIndex`] is updated under the same lock as
//! the record store, so the two never disagree to an observer.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use lexis_remote::{Entry, normalize_key};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::error::{LexisError, Result};
use crate::index::SearchIndex;
use crate::metadata::SyncMetadata;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        primary_key TEXT NOT NULL,
        secondary_key TEXT NOT NULL,
        classification TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );
    CREATE INDEX IF NOT EXISTS idx_records_primary ON records(collection, primary_key);
    CREATE INDEX IF NOT EXISTS idx_records_secondary ON records(collection, secondary_key);
    CREATE INDEX IF NOT EXISTS idx_records_class ON records(collection, classification);

    CREATE TABLE IF NOT EXISTS sync_meta (
        collection TEXT PRIMARY KEY,
        last_synced_at TEXT NOT NULL
    );
";

/// A change to the cache, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry was inserted or replaced.
    Upserted { collection: String, id: String },
    /// An entry was removed.
    Removed { collection: String, id: String },
    /// A collection was emptied.
    Cleared { collection: String },
    /// A collection was replaced wholesale by a refresh.
    Replaced { collection: String, count: usize },
}

impl CacheEvent {
    /// Collection the event belongs to.
    pub fn collection(&self) -> &str {
        match self {
            CacheEvent::Upserted { collection, .. }
            | CacheEvent::Removed { collection, .. }
            | CacheEvent::Cleared { collection }
            | CacheEvent::Replaced { collection, .. } => collection,
        }
    }
}

/// Predicate type accepted by [`Query::Matching`].
pub type EntryPredicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

/// A lookup over one cached collection.
#[derive(Clone)]
pub enum Query {
    /// Entries whose normalized headword equals the given key.
    ByPrimaryKey(String),
    /// Entries whose normalized meaning equals the given key.
    BySecondaryKey(String),
    /// Entries with the given classification (case-insensitive).
    ByClassification(String),
    /// Entries accepted by an arbitrary predicate.
    Matching(EntryPredicate),
}

impl Query {
    /// Build a [`Query::Matching`] from a closure.
    pub fn matching(predicate: impl Fn(&Entry) -> bool + Send + Sync + 'static) -> Self {
        Query::Matching(Arc::new(predicate))
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::ByPrimaryKey(key) => f.debug_tuple("ByPrimaryKey").field(key).finish(),
            Query::BySecondaryKey(key) => f.debug_tuple("BySecondaryKey").field(key).finish(),
            Query::ByClassification(tag) => f.debug_tuple("ByClassification").field(tag).finish(),
            Query::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

/// Persistent local mirror of remote collections.
pub struct LocalCache {
    conn: Mutex<Connection>,
    index: RwLock<SearchIndex>,
    updates_tx: broadcast::Sender<CacheEvent>,
    path: Option<PathBuf>,
}

impl LocalCache {
    /// Open (or create) a cache.
    ///
    /// `None` keeps everything in memory. A database file that fails its
    /// integrity check is discarded and recreated empty. The search index is
    /// rebuilt from the stored records before this returns.
    pub fn open(path: Option<&Path>, event_capacity: usize) -> Result<Self> {
        let conn = match path {
            Some(path) => open_file(path)?,
            None => {
                let conn = Connection::open_in_memory()?;
                conn.execute_batch(SCHEMA)?;
                conn
            }
        };

        let (updates_tx, _) = broadcast::channel(event_capacity.max(1));
        let cache = Self {
            conn: Mutex::new(conn),
            index: RwLock::new(SearchIndex::new()),
            updates_tx,
            path: path.map(Path::to_path_buf),
        };
        cache.rebuild_index()?;
        Ok(cache)
    }

    /// Open an empty in-memory cache.
    pub fn in_memory() -> Result<Self> {
        Self::open(None, DEFAULT_EVENT_CAPACITY)
    }

    /// Database file backing this cache, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.updates_tx.subscribe()
    }

    fn publish(&self, event: CacheEvent) {
        if self.updates_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_read(&self) -> RwLockReadGuard<'_, SearchIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_write(&self) -> RwLockWriteGuard<'_, SearchIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load every collection into the search index, dropping collections
    /// whose rows cannot be decoded.
    fn rebuild_index(&self) -> Result<()> {
        let conn = self.conn();
        let mut index = self.index_write();
        for collection in stored_collections(&conn)? {
            match load_collection(&conn, &collection) {
                Ok(entries) => {
                    index.rebuild(&collection, &entries);
                    debug!(collection = %collection, count = entries.len(), "search index rebuilt");
                }
                Err(e) => {
                    warn!(collection = %collection, error = %e, "discarding unreadable cached collection");
                    conn.execute("DELETE FROM records WHERE collection = ?1", params![collection])?;
                    conn.execute(
                        "DELETE FROM sync_meta WHERE collection = ?1",
                        params![collection],
                    )?;
                    index.clear(&collection);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace an entry.
    pub fn try_put(&self, collection: &str, entry: &Entry) -> Result<()> {
        {
            let conn = self.conn();
            upsert_row(&conn, collection, entry)?;
            self.index_write().add(collection, entry);
        }
        trace!(collection, id = %entry.id, "cache: upserted");
        self.publish(CacheEvent::Upserted {
            collection: collection.to_string(),
            id: entry.id.clone(),
        });
        Ok(())
    }

    /// Insert or replace an entry, logging failures.
    pub fn put(&self, collection: &str, entry: Entry) {
        if let Err(e) = self.try_put(collection, &entry) {
            warn!(collection, id = %entry.id, error = %e, "cache put failed");
        }
    }

    /// Insert or replace several entries in one transaction.
    pub fn try_put_all(&self, collection: &str, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            for entry in entries {
                upsert_row(&tx, collection, entry)?;
            }
            tx.commit()?;

            let mut index = self.index_write();
            for entry in entries {
                index.add(collection, entry);
            }
        }
        trace!(collection, count = entries.len(), "cache: upserted batch");
        for entry in entries {
            self.publish(CacheEvent::Upserted {
                collection: collection.to_string(),
                id: entry.id.clone(),
            });
        }
        Ok(())
    }

    /// Insert or replace several entries, logging failures.
    pub fn put_all(&self, collection: &str, entries: Vec<Entry>) {
        if let Err(e) = self.try_put_all(collection, &entries) {
            warn!(collection, count = entries.len(), error = %e, "cache put_all failed");
        }
    }

    /// Remove an entry. Missing ids are not an error.
    pub fn try_delete(&self, collection: &str, id: &str) -> Result<()> {
        let removed = {
            let conn = self.conn();
            let mut index = self.index_write();
            index.remove(collection, id);
            match conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            ) {
                Ok(removed) => removed,
                Err(e) => {
                    reindex_collection(&conn, &mut index, collection);
                    return Err(e.into());
                }
            }
        };
        if removed > 0 {
            trace!(collection, id, "cache: removed");
            self.publish(CacheEvent::Removed {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Remove an entry, logging failures.
    pub fn delete(&self, collection: &str, id: &str) {
        if let Err(e) = self.try_delete(collection, id) {
            warn!(collection, id, error = %e, "cache delete failed");
        }
    }

    /// Remove several entries in one transaction.
    pub fn try_delete_all(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let removed = {
            let mut conn = self.conn();
            let mut index = self.index_write();
            index.remove_all(collection, ids.iter().map(String::as_str));
            match delete_rows(&mut conn, collection, ids) {
                Ok(removed) => removed,
                Err(e) => {
                    reindex_collection(&conn, &mut index, collection);
                    return Err(e);
                }
            }
        };
        trace!(collection, count = removed.len(), "cache: removed batch");
        for id in removed {
            self.publish(CacheEvent::Removed {
                collection: collection.to_string(),
                id,
            });
        }
        Ok(())
    }

    /// Remove several entries, logging failures.
    pub fn delete_all(&self, collection: &str, ids: &[String]) {
        if let Err(e) = self.try_delete_all(collection, ids) {
            warn!(collection, count = ids.len(), error = %e, "cache delete_all failed");
        }
    }

    /// Drop every entry in a collection. Sync metadata is left alone.
    pub fn try_clear(&self, collection: &str) -> Result<()> {
        {
            let conn = self.conn();
            let mut index = self.index_write();
            index.clear(collection);
            if let Err(e) = conn.execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection],
            ) {
                reindex_collection(&conn, &mut index, collection);
                return Err(e.into());
            }
        }
        debug!(collection, "cache: cleared");
        self.publish(CacheEvent::Cleared {
            collection: collection.to_string(),
        });
        Ok(())
    }

    /// Drop every entry in a collection, logging failures.
    pub fn clear(&self, collection: &str) {
        if let Err(e) = self.try_clear(collection) {
            warn!(collection, error = %e, "cache clear failed");
        }
    }

    /// Replace a collection's contents with a fresh snapshot, atomically.
    pub fn replace_all(&self, collection: &str, entries: &[Entry]) -> Result<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection],
            )?;
            for entry in entries {
                upsert_row(&tx, collection, entry)?;
            }
            tx.commit()?;
            self.index_write().rebuild(collection, entries);
        }
        debug!(collection, count = entries.len(), "cache: replaced collection");
        self.publish(CacheEvent::Replaced {
            collection: collection.to_string(),
            count: entries.len(),
        });
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get one entry.
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Entry>> {
        let conn = self.conn();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|body| decode(collection, &body)).transpose()
    }

    /// Every entry in a collection, ordered by id.
    pub fn get_all(&self, collection: &str) -> Result<Vec<Entry>> {
        load_collection(&self.conn(), collection)
    }

    /// Entries matching a query, ordered by id.
    pub fn query(&self, collection: &str, query: &Query) -> Result<Vec<Entry>> {
        let (column, value) = match query {
            Query::ByPrimaryKey(key) => ("primary_key", normalize_key(key)),
            Query::BySecondaryKey(key) => ("secondary_key", normalize_key(key)),
            Query::ByClassification(tag) => ("classification", normalize_key(tag)),
            Query::Matching(predicate) => {
                let entries = self.get_all(collection)?;
                return Ok(entries.into_iter().filter(|e| predicate(e)).collect());
            }
        };

        let conn = self.conn();
        let sql = format!(
            "SELECT body FROM records WHERE collection = ?1 AND {column} = ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection, value], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for body in rows {
            entries.push(decode(collection, &body?)?);
        }
        Ok(entries)
    }

    /// Full-text search over a collection, best match first.
    pub fn search(&self, collection: &str, query: &str, limit: usize) -> Result<Vec<Entry>> {
        let ids = self.index_read().search(collection, query, limit);
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.get(collection, &id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Number of cached entries in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Collections with at least one cached entry.
    pub fn collections(&self) -> Result<Vec<String>> {
        stored_collections(&self.conn())
    }

    /// Ids stored for a collection.
    pub fn cached_ids(&self, collection: &str) -> Result<BTreeSet<String>> {
        stored_ids(&self.conn(), collection)
    }

    /// Ids indexed for a collection.
    pub fn index_ids(&self, collection: &str) -> BTreeSet<String> {
        self.index_read().ids(collection)
    }

    /// Whether the stored ids and the indexed ids agree, observed atomically.
    pub fn index_agrees(&self, collection: &str) -> Result<bool> {
        let conn = self.conn();
        let index = self.index_read();
        Ok(stored_ids(&conn, collection)? == index.ids(collection))
    }

    // =========================================================================
    // Sync metadata
    // =========================================================================

    /// Last sync time for a collection, if it was ever synced.
    pub fn sync_metadata(&self, collection: &str) -> Result<Option<SyncMetadata>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_synced_at FROM sync_meta WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|raw| match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Some(SyncMetadata::new(collection, at.with_timezone(&Utc))),
            Err(e) => {
                warn!(collection, error = %e, "ignoring unreadable sync timestamp");
                None
            }
        }))
    }

    /// Record a successful sync.
    pub fn set_sync_metadata(&self, meta: &SyncMetadata) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sync_meta (collection, last_synced_at) VALUES (?1, ?2)",
            params![meta.collection, meta.last_synced_at.to_rfc3339()],
        )?;
        trace!(collection = %meta.collection, "sync metadata updated");
        Ok(())
    }

    /// Forget when a collection was last synced.
    pub fn clear_sync_metadata(&self, collection: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM sync_meta WHERE collection = ?1",
            params![collection],
        )?;
        Ok(())
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    match open_checked(path) {
        Ok(conn) => Ok(conn),
        Err(e) if is_corruption(&e) => {
            warn!(path = %path.display(), error = %e, "cache database corrupt, recreating");
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.as_os_str().to_owned();
                file.push(suffix);
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            open_checked(path)
        }
        Err(e) => Err(e),
    }
}

fn open_checked(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

    let status: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if status != "ok" {
        return Err(LexisError::CacheCorrupt {
            collection: "*".to_string(),
            message: status,
        });
    }

    conn.execute_batch(SCHEMA)?;
    info!(path = %path.display(), "cache database initialized");
    Ok(conn)
}

fn is_corruption(err: &LexisError) -> bool {
    match err {
        LexisError::CacheCorrupt { .. } => true,
        LexisError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
            matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
        }
        _ => false,
    }
}

fn decode(collection: &str, body: &str) -> Result<Entry> {
    serde_json::from_str(body).map_err(|e| LexisError::CacheCorrupt {
        collection: collection.to_string(),
        message: e.to_string(),
    })
}

fn upsert_row(conn: &Connection, collection: &str, entry: &Entry) -> Result<()> {
    let body = serde_json::to_string(entry)?;
    conn.execute(
        "INSERT OR REPLACE INTO records
            (collection, id, primary_key, secondary_key, classification, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            collection,
            entry.id,
            entry.primary_key(),
            normalize_key(&entry.bangla),
            normalize_key(&entry.part_of_speech),
            body,
        ],
    )?;
    Ok(())
}

/// Delete rows in one transaction, returning the ids that existed.
fn delete_rows(conn: &mut Connection, collection: &str, ids: &[String]) -> Result<Vec<String>> {
    let tx: Transaction<'_> = conn.transaction()?;
    let mut removed = Vec::new();
    for id in ids {
        let n = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        if n > 0 {
            removed.push(id.clone());
        }
    }
    tx.commit()?;
    Ok(removed)
}

fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
    let mut entries = Vec::new();
    for body in rows {
        entries.push(decode(collection, &body?)?);
    }
    Ok(entries)
}

fn stored_collections(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT collection FROM records ORDER BY collection")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

fn stored_ids(conn: &Connection, collection: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare("SELECT id FROM records WHERE collection = ?1")?;
    let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

/// Bring a collection's index back in line with the stored rows after a
/// failed mutation.
fn reindex_collection(conn: &Connection, index: &mut SearchIndex, collection: &str) {
    match load_collection(conn, collection) {
        Ok(entries) => index.rebuild(collection, &entries),
        Err(e) => {
            warn!(collection, error = %e, "could not reload collection into search index");
            index.clear(collection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexis_remote::{Example, Inflection, VerbForms};
    use pretty_assertions::assert_eq;

    const VOCAB: &str = "vocabularies";

    fn entry(id: &str, english: &str, bangla: &str, pos: &str) -> Entry {
        Entry::new(id, english, bangla, pos)
    }

    #[test]
    fn test_put_get_roundtrip_preserves_nested_fields() {
        let cache = LocalCache::in_memory().unwrap();
        let mut e = entry("a", "run", "দৌড়ানো", "Verb");
        e.examples = vec![Example::new("I run daily.", "আমি প্রতিদিন দৌড়াই।")];
        e.inflection = Inflection::Verb(VerbForms {
            base: "run".to_string(),
            past: "ran".to_string(),
            ..Default::default()
        });

        cache.put(VOCAB, e.clone());
        assert_eq!(cache.get(VOCAB, "a").unwrap(), Some(e));
        assert_eq!(cache.get(VOCAB, "missing").unwrap(), None);
    }

    #[test]
    fn test_put_is_idempotent() {
        let cache = LocalCache::in_memory().unwrap();
        let e = entry("a", "run", "দৌড়ানো", "Verb");
        cache.put(VOCAB, e.clone());
        cache.put(VOCAB, e.clone());
        assert_eq!(cache.get_all(VOCAB).unwrap(), vec![e]);
        assert_eq!(cache.index_ids(VOCAB).len(), 1);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let cache = LocalCache::in_memory().unwrap();
        cache.delete(VOCAB, "ghost");
        cache.delete_all(VOCAB, &["ghost".to_string()]);
        assert_eq!(cache.count(VOCAB).unwrap(), 0);
    }

    #[test]
    fn test_queries_use_normalized_keys() {
        let cache = LocalCache::in_memory().unwrap();
        cache.put_all(
            VOCAB,
            vec![
                entry("a", "Run", "দৌড়ানো", "Verb"),
                entry("b", " run ", "দৌড়", "Noun"),
                entry("c", "walk", "হাঁটা", "verb"),
            ],
        );

        let ids = |q: Query| -> Vec<String> {
            cache
                .query(VOCAB, &q)
                .unwrap()
                .into_iter()
                .map(|e| e.id)
                .collect()
        };
        assert_eq!(ids(Query::ByPrimaryKey("RUN".to_string())), vec!["a", "b"]);
        assert_eq!(ids(Query::BySecondaryKey("দৌড়".to_string())), vec!["b"]);
        assert_eq!(ids(Query::ByClassification("VERB".to_string())), vec!["a", "c"]);
        assert_eq!(ids(Query::matching(|e| e.english.contains('w'))), vec!["c"]);
    }

    #[test]
    fn test_index_tracks_every_mutation() {
        let cache = LocalCache::in_memory().unwrap();
        cache.put_all(
            VOCAB,
            vec![entry("a", "run", "", ""), entry("b", "walk", "", "")],
        );
        assert!(cache.index_agrees(VOCAB).unwrap());

        cache.delete(VOCAB, "a");
        assert!(cache.index_agrees(VOCAB).unwrap());
        assert!(cache.search(VOCAB, "run", 10).unwrap().is_empty());

        cache.replace_all(VOCAB, &[entry("z", "zebra", "", "")]).unwrap();
        assert!(cache.index_agrees(VOCAB).unwrap());
        assert_eq!(
            cache.index_ids(VOCAB),
            BTreeSet::from(["z".to_string()])
        );

        cache.clear(VOCAB);
        assert!(cache.index_agrees(VOCAB).unwrap());
        assert!(cache.index_ids(VOCAB).is_empty());
    }

    #[test]
    fn test_search_returns_entries_in_rank_order() {
        let cache = LocalCache::in_memory().unwrap();
        let mut bank = entry("b", "bank", "তীর", "Noun");
        bank.synonyms = vec!["shore".to_string()];
        cache.put(VOCAB, bank);
        cache.put(VOCAB, entry("a", "shore", "তীর", "Noun"));

        let found: Vec<String> = cache
            .search(VOCAB, "তীর shore", 10)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(found, vec!["a", "b"]);
    }

    #[test]
    fn test_sync_metadata_roundtrip() {
        let cache = LocalCache::in_memory().unwrap();
        assert_eq!(cache.sync_metadata(VOCAB).unwrap(), None);

        let meta = SyncMetadata::now(VOCAB);
        cache.set_sync_metadata(&meta).unwrap();
        let stored = cache.sync_metadata(VOCAB).unwrap().unwrap();
        assert_eq!(stored.last_synced_at.timestamp(), meta.last_synced_at.timestamp());

        cache.clear(VOCAB);
        assert!(cache.sync_metadata(VOCAB).unwrap().is_some());

        cache.clear_sync_metadata(VOCAB).unwrap();
        assert_eq!(cache.sync_metadata(VOCAB).unwrap(), None);
    }

    #[test]
    fn test_undecodable_row_is_cache_corrupt() {
        let cache = LocalCache::in_memory().unwrap();
        cache.put(VOCAB, entry("a", "run", "", ""));
        cache
            .conn()
            .execute("UPDATE records SET body = 'not json' WHERE id = 'a'", [])
            .unwrap();

        assert!(matches!(
            cache.get(VOCAB, "a"),
            Err(LexisError::CacheCorrupt { .. })
        ));
        assert!(matches!(
            cache.get_all(VOCAB),
            Err(LexisError::CacheCorrupt { .. })
        ));
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = LocalCache::open(Some(&path), 16).unwrap();
            cache.put(VOCAB, entry("a", "run", "দৌড়ানো", "Verb"));
            cache.set_sync_metadata(&SyncMetadata::now(VOCAB)).unwrap();
        }

        let cache = LocalCache::open(Some(&path), 16).unwrap();
        assert_eq!(cache.path(), Some(path.as_path()));
        assert_eq!(cache.search(VOCAB, "run", 10).unwrap().len(), 1);
        assert!(cache.sync_metadata(VOCAB).unwrap().is_some());
    }

    #[test]
    fn test_unreadable_collection_dropped_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = LocalCache::open(Some(&path), 16).unwrap();
            cache.put(VOCAB, entry("a", "run", "", ""));
            cache.put("resources", entry("r", "guide", "", ""));
            cache.set_sync_metadata(&SyncMetadata::now(VOCAB)).unwrap();
            cache
                .conn()
                .execute("UPDATE records SET body = '{' WHERE id = 'a'", [])
                .unwrap();
        }

        let cache = LocalCache::open(Some(&path), 16).unwrap();
        assert_eq!(cache.count(VOCAB).unwrap(), 0);
        assert_eq!(cache.sync_metadata(VOCAB).unwrap(), None);
        assert_eq!(cache.count("resources").unwrap(), 1);
    }

    #[test]
    fn test_corrupt_file_is_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let cache = LocalCache::open(Some(&path), 16).unwrap();
        assert!(cache.collections().unwrap().is_empty());
        cache.put(VOCAB, entry("a", "run", "", ""));
        assert_eq!(cache.count(VOCAB).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_published() {
        let cache = LocalCache::in_memory().unwrap();
        let mut rx = cache.subscribe();

        cache.put(VOCAB, entry("a", "run", "", ""));
        cache.delete(VOCAB, "a");
        cache.delete(VOCAB, "a");
        cache.replace_all(VOCAB, &[entry("b", "go", "", "")]).unwrap();
        cache.clear(VOCAB);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                CacheEvent::Upserted {
                    collection: VOCAB.to_string(),
                    id: "a".to_string()
                },
                CacheEvent::Removed {
                    collection: VOCAB.to_string(),
                    id: "a".to_string()
                },
                CacheEvent::Replaced {
                    collection: VOCAB.to_string(),
                    count: 1
                },
                CacheEvent::Cleared {
                    collection: VOCAB.to_string()
                },
            ]
        );
    }
}
