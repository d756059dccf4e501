//! Configuration structures for rowstore.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Default record count below which collections use insertion sort.
pub const DEFAULT_ISORT_LIMIT: usize = 20;

/// Default record count above which collections sort on the worker pool.
pub const DEFAULT_PARALLEL_SORT_THRESHOLD: usize = 8000;

/// Default unsorted tail length that forces a full sort before lookups.
pub const DEFAULT_RESORT_LIMIT: usize = 300;

/// Tuning for growable record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Below this many records, sorting is a plain insertion sort.
    pub isort_limit: usize,
    /// Above this many records, sorting fans out to the worker pool.
    pub parallel_sort_threshold: usize,
    /// Unsorted tail length that makes a keyed lookup sort first.
    pub resort_limit: usize,
    /// Preferred growth in percent of the needed size.
    pub growth_large_percent: u64,
    /// Fallback growth when the preferred growth is refused.
    pub growth_small_percent: u64,
    /// Smallest buffer ever requested, in bytes.
    pub min_allocation: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            isort_limit: DEFAULT_ISORT_LIMIT,
            parallel_sort_threshold: DEFAULT_PARALLEL_SORT_THRESHOLD,
            resort_limit: DEFAULT_RESORT_LIMIT,
            growth_large_percent: 140,
            growth_small_percent: 120,
            min_allocation: 1024,
        }
    }
}

impl CollectionConfig {
    /// Checks the invariants the sort and growth code rely on.
    pub fn validate(&self) -> Result<()> {
        if self.isort_limit < 2 {
            return Err(StoreError::Config("isort_limit must be at least 2".into()));
        }
        if self.growth_large_percent < 100 || self.growth_small_percent < 100 {
            return Err(StoreError::Config(
                "growth percentages must be at least 100".into(),
            ));
        }
        Ok(())
    }
}

/// Admission limits for the hit/miss caches in front of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries in the hit cache (0 = bounded by memory only).
    pub hit_limit: usize,
    /// Maximum keys in the miss cache (0 = bounded by memory only).
    pub miss_limit: usize,
    /// Stop admitting new cache entries below this much free memory.
    pub mem_stop_grow: u64,
    /// Clear the caches outright below this much free memory.
    pub mem_start_shrink: u64,
    /// Memory kept free beyond what one grow step needs.
    pub headroom_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hit_limit: 0,
            miss_limit: 0,
            mem_stop_grow: 40 * 1024 * 1024,    // 40 MB
            mem_start_shrink: 20 * 1024 * 1024, // 20 MB
            headroom_bytes: 2 * 1024 * 1024,    // 2 MB
        }
    }
}

/// Settings for sharded indexes and the layers built on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of shards in a cluster.
    pub shards: usize,
    /// Threads in the shared sort pool.
    pub sort_threads: usize,
    /// Entries a write buffer holds before it is flushed.
    pub buffer_flush_threshold: usize,
    /// Capacity of the bounded channel feeding an async initializer.
    pub init_channel_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shards: num_cpus(),
            sort_threads: num_cpus(),
            buffer_flush_threshold: 1000,
            init_channel_capacity: 10_000,
        }
    }
}

impl IndexConfig {
    /// Shard count for a cluster; at least one.
    pub fn shard_count(&self) -> usize {
        self.shards.max(1)
    }
}

/// All tunables of a store, grouped for loading from one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub collection: CollectionConfig,
    pub cache: CacheConfig,
    pub index: IndexConfig,
}

/// Returns the number of available CPUs.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}
