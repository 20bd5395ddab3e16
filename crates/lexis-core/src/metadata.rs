//! Per-collection synchronization metadata.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// When a collection was last pulled from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub collection: String,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncMetadata {
    pub fn new(collection: impl Into<String>, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            collection: collection.into(),
            last_synced_at,
        }
    }

    /// Metadata stamped with the current time.
    pub fn now(collection: impl Into<String>) -> Self {
        Self::new(collection, Utc::now())
    }

    /// Time elapsed since the last sync, as of `now`.
    ///
    /// A timestamp in the future (clock skew) counts as zero age.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_synced_at).max(Duration::zero())
    }

    /// Whether the data is at least `max_age` old.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) >= max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let meta = SyncMetadata::new("vocabularies", now - Duration::minutes(15));
        assert!(meta.is_stale(now, Duration::minutes(15)));
        assert!(!meta.is_stale(now, Duration::minutes(16)));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        let meta = SyncMetadata::new("vocabularies", now + Duration::minutes(5));
        assert_eq!(meta.age(now), Duration::zero());
        assert!(!meta.is_stale(now, Duration::minutes(1)));
    }

    #[test]
    fn test_zero_max_age_is_always_stale() {
        let meta = SyncMetadata::now("resources");
        assert!(meta.is_stale(meta.last_synced_at, Duration::zero()));
    }
}
