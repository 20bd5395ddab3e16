//! Engine configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lexis_remote::{DEFAULT_BATCH_LIMIT, REMOTE_BATCH_HARD_LIMIT, TRACKED_COLLECTIONS};
use serde::{Deserialize, Serialize};

use crate::error::{LexisError, Result};

// Validation constants
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 600;
pub(crate) const MAX_AGE_LIMIT_MINUTES: u64 = 60 * 24 * 30;
const MIN_EVENT_CAPACITY: usize = 16;

/// Default staleness window for a collection.
pub const DEFAULT_MAX_AGE_MINUTES: u64 = 15;

/// Default timeout applied to each remote call.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Default capacity of the cache event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for an [`Engine`](crate::Engine).
///
/// Loadable from a JSON file; every field has a default, so a partial file
/// (or `{}`) is valid.
///
/// ```rust
/// use lexis_core::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .batch_limit(200)
///     .max_age_minutes("favorites", 5)
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file. `None` keeps the cache in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Operations per atomic batch.
    pub batch_limit: usize,

    /// Timeout applied to each remote call.
    pub remote_timeout_secs: u64,

    /// Staleness window used when a collection has no override.
    pub default_max_age_minutes: u64,

    /// Per-collection staleness overrides.
    pub max_age_minutes: HashMap<String, u64>,

    /// Collections refreshed by `sync_all` and reported by `stats`.
    pub collections: Vec<String>,

    /// Capacity of the cache event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            default_max_age_minutes: DEFAULT_MAX_AGE_MINUTES,
            max_age_minutes: HashMap::new(),
            collections: TRACKED_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Staleness window for a collection.
    pub fn max_age(&self, collection: &str) -> chrono::Duration {
        let minutes = self
            .max_age_minutes
            .get(collection)
            .copied()
            .unwrap_or(self.default_max_age_minutes);
        max_age_from_minutes(minutes).unwrap_or_else(|_| {
            chrono::Duration::minutes(MAX_AGE_LIMIT_MINUTES as i64)
        })
    }

    /// Timeout applied to each remote call.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `LexisError::BatchLimitExceeded` for a batch limit outside
    /// `1..=REMOTE_BATCH_HARD_LIMIT`, and `LexisError::InvalidConfig` for
    /// out-of-range timeouts, staleness windows, or channel capacity.
    pub fn validate(&self) -> Result<()> {
        if self.batch_limit == 0 || self.batch_limit > REMOTE_BATCH_HARD_LIMIT {
            return Err(LexisError::BatchLimitExceeded {
                limit: self.batch_limit,
                hard_limit: REMOTE_BATCH_HARD_LIMIT,
            });
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.remote_timeout_secs) {
            return Err(LexisError::InvalidConfig(format!(
                "remote timeout must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds (got {})",
                self.remote_timeout_secs
            )));
        }

        let ages = std::iter::once(("default", self.default_max_age_minutes)).chain(
            self.max_age_minutes
                .iter()
                .map(|(collection, minutes)| (collection.as_str(), *minutes)),
        );
        for (collection, minutes) in ages {
            if minutes > MAX_AGE_LIMIT_MINUTES {
                return Err(LexisError::InvalidConfig(format!(
                    "max age for {collection} must be at most {MAX_AGE_LIMIT_MINUTES} minutes (got {minutes})"
                )));
            }
        }

        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(LexisError::InvalidConfig(
                "collection names cannot be empty".to_string(),
            ));
        }

        if self.event_capacity < MIN_EVENT_CAPACITY {
            return Err(LexisError::InvalidConfig(format!(
                "event capacity must be at least {MIN_EVENT_CAPACITY} (got {})",
                self.event_capacity
            )));
        }

        Ok(())
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

/// Convert a staleness window in minutes, rejecting windows longer than
/// [`MAX_AGE_LIMIT_MINUTES`].
pub(crate) fn max_age_from_minutes(minutes: u64) -> Result<chrono::Duration> {
    if minutes > MAX_AGE_LIMIT_MINUTES {
        return Err(LexisError::InvalidConfig(format!(
            "max age must be at most {MAX_AGE_LIMIT_MINUTES} minutes (got {minutes})"
        )));
    }
    i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| LexisError::InvalidConfig(format!("max age of {minutes} minutes is out of range")))
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Persist the cache to this SQLite file.
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.config.batch_limit = limit;
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote_timeout_secs = secs;
        self
    }

    pub fn default_max_age_minutes(mut self, minutes: u64) -> Self {
        self.config.default_max_age_minutes = minutes;
        self
    }

    /// Override the staleness window for one collection.
    pub fn max_age_minutes(mut self, collection: impl Into<String>, minutes: u64) -> Self {
        self.config.max_age_minutes.insert(collection.into(), minutes);
        self
    }

    pub fn collections(mut self, collections: Vec<String>) -> Self {
        self.config.collections = collections;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
