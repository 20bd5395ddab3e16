//! Collection names and store limits.

/// Collection holding vocabulary entries.
pub const VOCABULARY_COLLECTION: &str = "vocabularies";

/// Collection holding educational resources.
pub const RESOURCE_COLLECTION: &str = "resources";

/// Collection holding per-user favorites.
pub const FAVORITE_COLLECTION: &str = "favorites";

/// Collection holding per-user review progress.
pub const PROGRESS_COLLECTION: &str = "progress";

/// Every collection mirrored into the local cache.
pub const TRACKED_COLLECTIONS: &[&str] = &[
    VOCABULARY_COLLECTION,
    RESOURCE_COLLECTION,
    FAVORITE_COLLECTION,
    PROGRESS_COLLECTION,
];

/// Hard ceiling on operations in one atomic batch, enforced by the store.
pub const REMOTE_BATCH_HARD_LIMIT: usize = 500;

/// Batch size used by default, leaving headroom below the hard ceiling.
pub const DEFAULT_BATCH_LIMIT: usize = 450;

/// Check if a collection is mirrored locally.
pub fn is_tracked_collection(collection: &str) -> bool {
    TRACKED_COLLECTIONS.contains(&collection)
}
