//! Registry of live caches for the eviction sweep.
//!
//! The registry holds only weak handles. A cache dropped by the
//! application disappears from the registry on the next registration or
//! sweep; registering never keeps a cache alive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use meridian_core::{ConfigError, MeridianResult};
use tracing::{debug, info};

/// What one memory eviction pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Entries removed from the memory tier.
    pub evicted: u64,
    /// Per-identifier histories dropped (versioned caches only).
    pub histories_evicted: u64,
    /// Evicted entries written to the durable tier.
    pub persisted: u64,
    /// Durable writes that failed.
    pub backend_failures: u64,
}

/// What one durable cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurableCleanup {
    pub deleted: u64,
    pub backend_failures: u64,
}

/// A cache the registry can sweep.
pub trait Evictable: Send + Sync + 'static {
    /// Name the cache's durable rows are stored under.
    fn cache_name(&self) -> &str;

    fn has_durable_tier(&self) -> bool;

    fn evict_memory(&self) -> EvictionOutcome;

    fn evict_durable(&self) -> DurableCleanup;
}

/// Totals for one registry-wide sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub caches: u64,
    pub evicted: u64,
    pub histories_evicted: u64,
    pub persisted: u64,
    pub durable_deleted: u64,
    pub backend_failures: u64,
}

impl SweepReport {
    /// True if the sweep removed nothing anywhere.
    pub fn is_empty(&self) -> bool {
        self.evicted == 0 && self.histories_evicted == 0 && self.durable_deleted == 0
    }

    fn record(&mut self, memory: EvictionOutcome, durable: DurableCleanup) {
        self.caches += 1;
        self.evicted += memory.evicted;
        self.histories_evicted += memory.histories_evicted;
        self.persisted += memory.persisted;
        self.durable_deleted += durable.deleted;
        self.backend_failures += memory.backend_failures + durable.backend_failures;
    }
}

/// Owner-provided registry of caches, swept by [`CacheRegistry::evict_all`].
#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<Vec<Weak<dyn Evictable>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<dyn Evictable>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take ownership of a cache, register it and hand back the shared
    /// handle. The registry keeps only a weak reference.
    ///
    /// # Errors
    ///
    /// `ConfigError::DuplicateCacheName` if the cache has a durable tier
    /// and a live registered cache with a durable tier already uses the
    /// same name.
    pub fn register<C: Evictable>(&self, cache: C) -> MeridianResult<Arc<C>> {
        let cache = Arc::new(cache);
        let mut caches = self.lock();
        caches.retain(|weak| weak.strong_count() > 0);

        if cache.has_durable_tier() {
            let clash = caches
                .iter()
                .filter_map(Weak::upgrade)
                .any(|live| live.has_durable_tier() && live.cache_name() == cache.cache_name());
            if clash {
                return Err(ConfigError::DuplicateCacheName {
                    name: cache.cache_name().to_string(),
                }
                .into());
            }
        }

        let weak: Weak<C> = Arc::downgrade(&cache);
        let weak: Weak<dyn Evictable> = weak;
        caches.push(weak);
        debug!(cache = %cache.cache_name(), live = caches.len(), "Cache registered");
        Ok(cache)
    }

    /// Number of registered caches that are still alive.
    pub fn live_count(&self) -> usize {
        self.lock().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Upgrade every live handle, pruning dead ones. The registry lock is
    /// released before any cache is touched.
    fn snapshot(&self) -> Vec<Arc<dyn Evictable>> {
        let mut caches = self.lock();
        let mut live: Vec<Arc<dyn Evictable>> = Vec::with_capacity(caches.len());
        caches.retain(|weak| {
            if let Some(cache) = weak.upgrade() {
                live.push(cache);
                true
            } else {
                false
            }
        });
        drop(caches);
        live
    }

    /// Run memory eviction then durable cleanup on every live cache.
    pub fn evict_all(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for cache in self.snapshot() {
            let memory = cache.evict_memory();
            let durable = cache.evict_durable();
            report.record(memory, durable);
        }

        if !report.is_empty() {
            info!(
                caches = report.caches,
                evicted = report.evicted,
                histories_evicted = report.histories_evicted,
                persisted = report.persisted,
                durable_deleted = report.durable_deleted,
                failures = report.backend_failures,
                "Cache sweep completed"
            );
        }
        report
    }
}
