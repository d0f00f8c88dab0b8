//! Durable backend trait, cacheable marker and cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use meridian_core::{Item, ObjectId, StorageError, Timestamp};
use serde::{de::DeserializeOwned, Serialize};

/// Result type for durable-tier operations.
pub type DurableResult<T> = Result<T, StorageError>;

/// Marker trait for types an [`crate::ItemCache`] can hold.
///
/// The serde bounds exist for the durable tier: an evicted item is
/// serialized on the way out and must deserialize to an equal item on
/// the way back.
pub trait Cacheable: Item + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Item + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// One stored row of the durable tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableRow {
    /// Serialized item bytes as written by the cache.
    pub data: Vec<u8>,
    /// When the row was last written.
    pub written_at: Timestamp,
}

/// Durable overflow store shared by any number of caches.
///
/// Rows are keyed by (cache name, object id). Every method reports
/// failure through its `Result`; caches log and discard those errors.
/// Cache names must be unique among live caches sharing one backend.
pub trait DurableBackend: Send + Sync {
    /// Point lookup of one row.
    fn get(&self, cache_name: &str, id: ObjectId) -> DurableResult<Option<DurableRow>>;

    /// All object ids currently stored for a cache.
    fn list_ids(&self, cache_name: &str) -> DurableResult<Vec<ObjectId>>;

    /// Insert or replace a row.
    fn upsert(&self, cache_name: &str, id: ObjectId, data: &[u8], written_at: Timestamp) -> DurableResult<()>;

    /// Delete rows written strictly before `cutoff`. Returns rows deleted.
    fn delete_older_than(&self, cache_name: &str, cutoff: Timestamp) -> DurableResult<u64>;

    /// Keep the `keep` most recently written rows, delete the rest.
    /// Returns rows deleted.
    fn delete_beyond_most_recent(&self, cache_name: &str, keep: usize) -> DurableResult<u64>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory.
    pub memory_hits: u64,
    /// Lookups answered from the durable tier.
    pub durable_hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    /// Number of entries currently in memory.
    pub entry_count: u64,
    /// Entries removed from memory by eviction.
    pub evictions: u64,
    /// Evicted entries written to the durable tier.
    pub persisted: u64,
    /// Durable-tier operations that failed and were skipped.
    pub backend_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0) across both tiers.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub memory_hits: AtomicU64,
    pub durable_hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub persisted: AtomicU64,
    pub backend_failures: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: usize) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
        }
    }
}
