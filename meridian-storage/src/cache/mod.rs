//! Two-tier caches for versioned elements.
//!
//! [`ItemCache`] keeps the latest instance per id in memory and, when a
//! [`DurableBackend`] is attached, spills evicted entries into it.
//! [`VersionedObjectCache`] adds per-id revision histories that are only
//! returned when complete. [`CacheRegistry`] sweeps every live cache on
//! request, and [`ReadThroughClient`] puts three versioned caches in
//! front of an [`meridian_core::Upstream`].
//!
//! # Failure Model
//!
//! The durable tier is a best-effort overflow. Backend errors are logged
//! and counted, never returned from cache reads, writes or evictions.
//!
//! # Example
//!
//! ```ignore
//! let registry = CacheRegistry::new();
//! let backend = Arc::new(LmdbDurableBackend::new("/var/cache/meridian", 256)?);
//! let points = registry.register(
//!     ItemCache::<Point>::new("points", CacheLimits::from_env()).with_backend(backend),
//! )?;
//!
//! points.put(point);
//! // Later, from a scheduler:
//! registry.evict_all();
//! ```

pub mod durable_key;
pub mod item_cache;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
mod recency;
pub mod registry;
pub mod traits;
pub mod versioned;

pub use durable_key::DurableKey;
pub use item_cache::ItemCache;
pub use lmdb_backend::{DurableError, LmdbDurableBackend};
pub use memory_backend::InMemoryDurableBackend;
pub use read_through::{ReadThroughClient, ReadThroughConfig};
pub use registry::{CacheRegistry, DurableCleanup, Evictable, EvictionOutcome, SweepReport};
pub use traits::{CacheStats, Cacheable, DurableBackend, DurableResult, DurableRow};
pub use versioned::{History, VersionedObjectCache};
