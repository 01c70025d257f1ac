//! Runtime settings consumed by the core.
//!
//! Everything here is carried by the explicit [`Context`](crate::engine::Context)
//! object instead of process-global state.

use crate::batch::FlushStrategy;
use crate::error::{TandemError, TandemResult};
use std::time::Duration;

/// Default number of pending writes flushed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default cache entry lifetime for TTL cache backends.
pub const DEFAULT_CACHE_EXPIRE: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings for an ORM instance.
#[derive(Clone)]
pub struct Settings {
    /// Max pending writes taken per flush batch.
    pub batch_size: usize,
    /// When the deferred write scheduler flushes.
    pub flush: FlushStrategy,
    /// Number of physical shards; 0 disables sharding.
    pub shard_count: usize,
    /// Connection name of the main (unsharded) partition.
    pub main_db: String,
    /// Shard connection name template, e.g. `"app_shard_{}"`.
    pub shard_format: String,
    /// Cache key prefix (`{prefix}:{model}:{key...}`).
    pub cache_prefix: String,
    /// Entry lifetime for TTL cache backends.
    pub cache_expire: Duration,
    /// Capacity of each LRU cache store.
    pub cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush: FlushStrategy::Interval(Duration::from_secs(1)),
            shard_count: 0,
            main_db: "main".to_string(),
            shard_format: "shard_{}".to_string(),
            cache_prefix: "tandem".to_string(),
            cache_expire: DEFAULT_CACHE_EXPIRE,
            cache_capacity: 10_000,
        }
    }
}

impl Settings {
    /// Validates the settings. Fatal at init time: a broken configuration
    /// must not let the process continue.
    pub fn validate(&self) -> TandemResult<()> {
        if self.batch_size == 0 {
            return Err(TandemError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.shard_count > 0 {
            if self.main_db.is_empty() {
                return Err(TandemError::Configuration(
                    "sharding requires a main db name".to_string(),
                ));
            }
            if !self.shard_format.contains("{}") {
                return Err(TandemError::Configuration(format!(
                    "shard_format '{}' must contain a '{{}}' placeholder",
                    self.shard_format
                )));
            }
        }
        Ok(())
    }

    /// Whether this instance runs with physical shards at all.
    pub fn is_sharded(&self) -> bool {
        self.shard_count > 0
    }

    /// Connection name of the main partition, where models without an
    /// explicit connection live.
    pub fn main_partition(&self) -> &str {
        &self.main_db
    }

    /// Connection name of shard `index`.
    pub fn shard_name(&self, index: usize) -> String {
        self.shard_format.replacen("{}", &index.to_string(), 1)
    }
}
