//! Meridian Storage - Element Caches
//!
//! Memory-plus-durable caches for current revisions, complete revision
//! histories on top of them, the registry that sweeps them, and a
//! read-through API client wiring all of it to an upstream.

pub mod cache;
pub mod sweep;

pub use cache::{
    CacheRegistry, CacheStats, Cacheable, DurableBackend, DurableCleanup, DurableError, DurableKey,
    DurableResult, DurableRow, Evictable, EvictionOutcome, History, InMemoryDurableBackend,
    ItemCache, LmdbDurableBackend, ReadThroughClient, ReadThroughConfig, SweepReport,
    VersionedObjectCache,
};
pub use sweep::{eviction_sweep_task, SweepMetrics, SweepSnapshot};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
