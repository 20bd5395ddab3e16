//! Local cache, search index, sync policy, and duplicate merging for Lexis.
//!
//! This crate keeps a SQLite mirror of remote collections fresh under a
//! per-collection staleness policy, maintains an in-memory search index in
//! lock-step with it, and finds and merges duplicate entries in batches the
//! remote store can commit atomically.
//!
//! ## Features
//!
//! - **Local Cache**: [`LocalCache`] with indexed key lookups and change events
//! - **Sync Scheduler**: [`SyncScheduler`] with offline fallback and refresh
//!   collapsing
//! - **Search Index**: [`SearchIndex`] over headwords, meanings, and related
//!   words
//! - **Duplicate Merging**: [`detect_duplicates`], [`plan_merge`], and the
//!   [`BatchCommitter`]
//! - **Engine**: [`Engine`] tying it together behind one handle

mod batch;
mod cache;
mod config;
mod dedupe;
mod engine;
mod error;
mod index;
mod merge;
mod metadata;
mod scheduler;

pub use batch::{BatchCommitter, BatchProgress, BatchReport};
pub use cache::{CacheEvent, EntryPredicate, LocalCache, Query};
pub use config::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_AGE_MINUTES, DEFAULT_REMOTE_TIMEOUT_SECS, EngineConfig,
    EngineConfigBuilder,
};
pub use dedupe::{DuplicateGroup, GroupKind, detect_duplicates};
pub use engine::{CollectionStats, Engine, ReadOutcome};
pub use error::{LexisError, Result};
pub use index::{SearchIndex, entry_tokens, tokenize};
pub use merge::{
    MergePlan, MergeResult, completeness_score, content_equal, merge_members, plan_merge,
    select_kept,
};
pub use metadata::SyncMetadata;
pub use scheduler::{CollectionState, RefreshOutcome, SyncScheduler};
