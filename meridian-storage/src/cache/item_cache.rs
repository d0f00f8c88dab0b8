//! Two-tier cache holding the latest instance of each item.
//!
//! The memory tier is a value map plus a recency index behind one mutex,
//! so both always hold the same set of ids. Entries leave memory only
//! through [`ItemCache::evict_memory`]; with a durable backend attached
//! they are serialized into it on the way out and remain readable
//! through [`ItemCache::get`] until durable cleanup drops them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meridian_core::{cutoff_before, CacheLimits, Clock, ObjectId, StorageError, SystemClock, Timestamp};
use tracing::{debug, info, warn};

use super::recency::RecencyIndex;
use super::registry::{DurableCleanup, Evictable, EvictionOutcome};
use super::traits::{CacheStats, Cacheable, DurableBackend, StatsCounters};

struct MemoryTier<T> {
    entries: HashMap<ObjectId, T>,
    recency: RecencyIndex,
}

impl<T> Default for MemoryTier<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            recency: RecencyIndex::default(),
        }
    }
}

impl<T> MemoryTier<T> {
    fn insert(&mut self, id: ObjectId, item: T, now: Timestamp) {
        self.entries.insert(id, item);
        self.recency.touch(id, now);
    }

    /// Remove the oldest entry if either limit is exceeded.
    fn pop_expired(&mut self, now: Timestamp, limits: &CacheLimits) -> Option<(ObjectId, T)> {
        if !self
            .recency
            .is_over(now, limits.memory_max_age, limits.memory_max_count)
        {
            return None;
        }
        let id = self.recency.pop_oldest()?;
        self.entries.remove(&id).map(|item| (id, item))
    }
}

struct DurableTier {
    backend: Arc<dyn DurableBackend>,
    persisted: Mutex<HashSet<ObjectId>>,
}

impl DurableTier {
    fn persisted(&self) -> MutexGuard<'_, HashSet<ObjectId>> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache of the most recently seen instance per id.
///
/// # Example
///
/// ```ignore
/// let cache = ItemCache::<Point>::new("points", CacheLimits::default())
///     .with_backend(backend.clone());
/// cache.put(point);
/// let hit = cache.get(ObjectId::new(1));
/// ```
pub struct ItemCache<T> {
    name: String,
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
    memory: Mutex<MemoryTier<T>>,
    durable: Option<DurableTier>,
    stats: StatsCounters,
}

impl<T: Cacheable> ItemCache<T> {
    pub fn new(name: impl Into<String>, limits: CacheLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            clock: Arc::new(SystemClock),
            memory: Mutex::new(MemoryTier::default()),
            durable: None,
            stats: StatsCounters::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a durable overflow tier. The set of ids already persisted
    /// under this cache's name is loaded from the backend.
    pub fn with_backend(mut self, backend: Arc<dyn DurableBackend>) -> Self {
        self.durable = Some(DurableTier {
            backend,
            persisted: Mutex::new(HashSet::new()),
        });
        self.refresh_persisted();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock_memory(&self) -> MutexGuard<'_, MemoryTier<T>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an item, falling back to the durable tier on a memory miss.
    ///
    /// Backend failures count as misses and are logged.
    pub fn get(&self, id: ObjectId) -> Option<T> {
        if let Some(item) = self.lock_memory().entries.get(&id).cloned() {
            StatsCounters::bump(&self.stats.memory_hits);
            return Some(item);
        }

        let found = self.durable.as_ref().and_then(|durable| self.get_durable(durable, id));
        if found.is_some() {
            StatsCounters::bump(&self.stats.durable_hits);
        } else {
            StatsCounters::bump(&self.stats.misses);
        }
        found
    }

    fn get_durable(&self, durable: &DurableTier, id: ObjectId) -> Option<T> {
        if !durable.persisted().contains(&id) {
            return None;
        }

        let row = match durable.backend.get(&self.name, id) {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                StatsCounters::bump(&self.stats.backend_failures);
                warn!(cache = %self.name, id = %id, error = %e, "Durable lookup failed");
                return None;
            }
        };

        match serde_json::from_slice::<T>(&row.data) {
            Ok(item) => {
                debug!(cache = %self.name, id = %id, "Durable tier hit");
                Some(item)
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.backend_failures);
                warn!(cache = %self.name, id = %id, error = %e, "Durable row failed to deserialize");
                None
            }
        }
    }

    /// Insert or replace the entry for the item's id and mark it newest.
    pub fn put(&self, item: T) {
        let now = self.clock.now();
        let id = item.id();
        self.lock_memory().insert(id, item, now);
    }

    pub fn contains_in_memory(&self, id: ObjectId) -> bool {
        self.lock_memory().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock_memory().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    /// Number of ids known to be persisted in the durable tier.
    pub fn persisted_count(&self) -> usize {
        self.durable.as_ref().map_or(0, |durable| durable.persisted().len())
    }

    pub fn is_persisted(&self, id: ObjectId) -> bool {
        self.durable
            .as_ref()
            .is_some_and(|durable| durable.persisted().contains(&id))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    /// Drop entries from memory, oldest first, until the oldest is no
    /// older than the age limit and the count is within the count limit.
    ///
    /// Each evicted entry is written to the durable tier if one is
    /// attached. A failed write is logged and eviction carries on.
    pub fn evict_memory(&self) -> EvictionOutcome {
        let now = self.clock.now();
        let mut outcome = EvictionOutcome::default();

        loop {
            // The memory lock is released before any backend I/O.
            let evicted = self.lock_memory().pop_expired(now, &self.limits);
            let Some((id, item)) = evicted else {
                break;
            };
            outcome.evicted += 1;
            StatsCounters::bump(&self.stats.evictions);

            if let Some(durable) = &self.durable {
                match self.persist(durable, id, &item, now) {
                    Ok(()) => {
                        outcome.persisted += 1;
                        StatsCounters::bump(&self.stats.persisted);
                    }
                    Err(e) => {
                        outcome.backend_failures += 1;
                        StatsCounters::bump(&self.stats.backend_failures);
                        warn!(cache = %self.name, id = %id, error = %e, "Failed to persist evicted item");
                    }
                }
            }
        }

        if outcome.evicted > 0 {
            info!(
                cache = %self.name,
                evicted = outcome.evicted,
                persisted = outcome.persisted,
                failures = outcome.backend_failures,
                "Memory eviction completed"
            );
        }
        outcome
    }

    fn persist(&self, durable: &DurableTier, id: ObjectId, item: &T, now: Timestamp) -> Result<(), StorageError> {
        let data = serde_json::to_vec(item).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })?;
        durable.backend.upsert(&self.name, id, &data, now)?;
        durable.persisted().insert(id);
        Ok(())
    }

    /// Remove durable rows older than the durable age limit, then all but
    /// the most recent `durable_max_count`. Reloads the persisted-id set
    /// after any deletion.
    pub fn evict_durable(&self) -> DurableCleanup {
        let mut cleanup = DurableCleanup::default();
        let Some(durable) = &self.durable else {
            return cleanup;
        };

        let cutoff = cutoff_before(self.clock.now(), self.limits.durable_max_age);
        match durable.backend.delete_older_than(&self.name, cutoff) {
            Ok(n) => cleanup.deleted += n,
            Err(e) => {
                cleanup.backend_failures += 1;
                StatsCounters::bump(&self.stats.backend_failures);
                warn!(cache = %self.name, error = %e, "Failed to delete expired durable rows");
            }
        }

        match durable
            .backend
            .delete_beyond_most_recent(&self.name, self.limits.durable_max_count)
        {
            Ok(n) => cleanup.deleted += n,
            Err(e) => {
                cleanup.backend_failures += 1;
                StatsCounters::bump(&self.stats.backend_failures);
                warn!(cache = %self.name, error = %e, "Failed to trim durable rows");
            }
        }

        if cleanup.deleted > 0 {
            if !self.refresh_persisted() {
                cleanup.backend_failures += 1;
            }
            info!(cache = %self.name, deleted = cleanup.deleted, "Durable cleanup completed");
        }
        cleanup
    }

    /// Replace the persisted-id set with the backend's current id list.
    /// Returns false if the backend could not be listed.
    fn refresh_persisted(&self) -> bool {
        let Some(durable) = &self.durable else {
            return true;
        };
        match durable.backend.list_ids(&self.name) {
            Ok(ids) => {
                *durable.persisted() = ids.into_iter().collect();
                true
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.backend_failures);
                warn!(cache = %self.name, error = %e, "Failed to list durable ids");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let tier = self.lock_memory();
        tier.entries.len() == tier.recency.len()
            && tier.recency.ids().all(|id| tier.entries.contains_key(&id))
    }
}

impl<T: Cacheable> Evictable for ItemCache<T> {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    fn evict_memory(&self) -> EvictionOutcome {
        ItemCache::evict_memory(self)
    }

    fn evict_durable(&self) -> DurableCleanup {
        ItemCache::evict_durable(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryDurableBackend;
    use crate::cache::traits::{DurableResult, DurableRow};
    use meridian_core::{ManualClock, Point};
    use meridian_test_utils::fixtures::point_at;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn limits(max_count: usize, max_age_secs: u64) -> CacheLimits {
        CacheLimits::new()
            .with_memory_max_count(max_count)
            .with_memory_max_age(Duration::from_secs(max_age_secs))
            .with_durable_max_count(100)
            .with_durable_max_age(Duration::from_secs(3600))
    }

    fn cache_with_clock(limits: CacheLimits) -> (ItemCache<Point>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ItemCache::new("points", limits).with_clock(clock.clone());
        (cache, clock)
    }

    /// Backend that fails every call while `failing` is set.
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryDurableBackend,
        failing: AtomicBool,
    }

    impl FlakyBackend {
        fn check(&self) -> DurableResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    reason: "injected".to_string(),
                });
            }
            Ok(())
        }
    }

    impl DurableBackend for FlakyBackend {
        fn get(&self, cache_name: &str, id: ObjectId) -> DurableResult<Option<DurableRow>> {
            self.check()?;
            self.inner.get(cache_name, id)
        }

        fn list_ids(&self, cache_name: &str) -> DurableResult<Vec<ObjectId>> {
            self.check()?;
            self.inner.list_ids(cache_name)
        }

        fn upsert(&self, cache_name: &str, id: ObjectId, data: &[u8], written_at: Timestamp) -> DurableResult<()> {
            self.check()?;
            self.inner.upsert(cache_name, id, data, written_at)
        }

        fn delete_older_than(&self, cache_name: &str, cutoff: Timestamp) -> DurableResult<u64> {
            self.check()?;
            self.inner.delete_older_than(cache_name, cutoff)
        }

        fn delete_beyond_most_recent(&self, cache_name: &str, keep: usize) -> DurableResult<u64> {
            self.check()?;
            self.inner.delete_beyond_most_recent(cache_name, keep)
        }
    }

    // ========================================================================
    // Memory tier
    // ========================================================================

    #[test]
    fn test_put_then_get_returns_latest() {
        let (cache, _clock) = cache_with_clock(limits(10, 600));
        cache.put(point_at(1, 1, 0.0, 0.0));
        cache.put(point_at(1, 2, 1.0, 1.0));

        let hit = cache.get(ObjectId::new(1)).expect("item should be cached");
        assert_eq!(hit.version.as_u64(), 2);
        assert_eq!(hit.lat, 1.0);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_consistent());
    }

    #[test]
    fn test_get_miss_without_backend() {
        let (cache, _clock) = cache_with_clock(limits(10, 600));
        assert!(cache.get(ObjectId::new(99)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_evict_by_count_keeps_newest() {
        let (cache, clock) = cache_with_clock(limits(2, 600));
        for id in 1..=5u64 {
            cache.put(point_at(id, 1, 0.0, 0.0));
            clock.advance(Duration::from_secs(1));
        }

        let outcome = cache.evict_memory();
        assert_eq!(outcome.evicted, 3);
        assert_eq!(outcome.persisted, 0);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_in_memory(ObjectId::new(4)));
        assert!(cache.contains_in_memory(ObjectId::new(5)));
        assert!(cache.is_consistent());
    }

    #[test]
    fn test_evict_by_age() {
        let (cache, clock) = cache_with_clock(limits(10, 60));
        cache.put(point_at(1, 1, 0.0, 0.0));
        clock.advance(Duration::from_secs(30));
        cache.put(point_at(2, 1, 0.0, 0.0));
        clock.advance(Duration::from_secs(31));

        // Entry 1 is 61s old, entry 2 is 31s old.
        assert_eq!(cache.evict_memory().evicted, 1);
        assert!(!cache.contains_in_memory(ObjectId::new(1)));
        assert!(cache.contains_in_memory(ObjectId::new(2)));
    }

    #[test]
    fn test_eviction_stops_when_both_limits_hold() {
        let (cache, clock) = cache_with_clock(limits(3, 60));
        for id in 1..=3u64 {
            cache.put(point_at(id, 1, 0.0, 0.0));
        }
        clock.advance(Duration::from_secs(60));

        // Exactly at the age limit and the count limit: nothing to do.
        assert_eq!(cache.evict_memory().evicted, 0);
        assert_eq!(cache.len(), 3);

        cache.put(point_at(4, 1, 0.0, 0.0));
        assert_eq!(cache.evict_memory().evicted, 1);
        assert!(!cache.contains_in_memory(ObjectId::new(1)));
    }

    #[test]
    fn test_reput_moves_entry_to_newest() {
        let (cache, clock) = cache_with_clock(limits(1, 600));
        cache.put(point_at(1, 1, 0.0, 0.0));
        clock.advance(Duration::from_secs(1));
        cache.put(point_at(2, 1, 0.0, 0.0));
        clock.advance(Duration::from_secs(1));
        cache.put(point_at(1, 2, 0.0, 0.0));

        assert_eq!(cache.evict_memory().evicted, 1);
        assert!(cache.contains_in_memory(ObjectId::new(1)));
        assert!(!cache.contains_in_memory(ObjectId::new(2)));
    }

    #[test]
    fn test_zero_count_without_backend_drops_everything() {
        let (cache, _clock) = cache_with_clock(limits(0, 600));
        cache.put(point_at(1, 1, 0.0, 0.0));
        cache.put(point_at(2, 1, 0.0, 0.0));

        let outcome = cache.evict_memory();
        assert_eq!(outcome.evicted, 2);
        assert!(cache.is_empty());
        assert!(cache.get(ObjectId::new(1)).is_none());
    }

    // ========================================================================
    // Durable tier
    // ========================================================================

    #[test]
    fn test_evicted_items_are_served_from_durable_tier() {
        let backend = Arc::new(InMemoryDurableBackend::new());
        let (cache, _clock) = cache_with_clock(limits(0, 600));
        let cache = cache.with_backend(backend.clone());

        let original = point_at(7, 3, 51.5, -0.1);
        cache.put(original.clone());
        let outcome = cache.evict_memory();
        assert_eq!(outcome.persisted, 1);
        assert!(cache.is_empty());
        assert!(cache.is_persisted(ObjectId::new(7)));
        assert_eq!(backend.row_count("points"), 1);

        let restored = cache.get(ObjectId::new(7)).expect("durable hit");
        assert_eq!(restored, original);
        assert_eq!(restored.lat, original.lat);
        assert_eq!(restored.tags, original.tags);
        // Durable hits are not promoted back into memory.
        assert!(!cache.contains_in_memory(ObjectId::new(7)));
        assert_eq!(cache.stats().durable_hits, 1);
    }

    #[test]
    fn test_backend_loaded_ids_are_known_persisted() {
        let backend = Arc::new(InMemoryDurableBackend::new());
        let (first, _clock) = cache_with_clock(limits(0, 600));
        let first = first.with_backend(backend.clone());
        first.put(point_at(1, 1, 0.0, 0.0));
        first.evict_memory();
        drop(first);

        let (second, _clock) = cache_with_clock(limits(0, 600));
        let second = second.with_backend(backend);
        assert_eq!(second.persisted_count(), 1);
        assert!(second.get(ObjectId::new(1)).is_some());
    }

    #[test]
    fn test_backend_failure_does_not_abort_eviction() {
        let backend = Arc::new(FlakyBackend::default());
        let (cache, _clock) = cache_with_clock(limits(0, 600));
        let cache = cache.with_backend(backend.clone());

        for id in 1..=3u64 {
            cache.put(point_at(id, 1, 0.0, 0.0));
        }
        backend.failing.store(true, Ordering::SeqCst);

        let outcome = cache.evict_memory();
        assert_eq!(outcome.evicted, 3);
        assert_eq!(outcome.persisted, 0);
        assert_eq!(outcome.backend_failures, 3);
        assert!(cache.is_empty());
        assert_eq!(cache.persisted_count(), 0);
        assert_eq!(cache.stats().backend_failures, 3);
    }

    #[test]
    fn test_backend_read_failure_is_a_miss() {
        let backend = Arc::new(FlakyBackend::default());
        let (cache, _clock) = cache_with_clock(limits(0, 600));
        let cache = cache.with_backend(backend.clone());

        cache.put(point_at(1, 1, 0.0, 0.0));
        cache.evict_memory();
        backend.failing.store(true, Ordering::SeqCst);

        assert!(cache.get(ObjectId::new(1)).is_none());
        assert_eq!(cache.stats().misses, 1);

        backend.failing.store(false, Ordering::SeqCst);
        assert!(cache.get(ObjectId::new(1)).is_some());
    }

    #[test]
    fn test_evict_durable_by_age_and_count() {
        let backend = Arc::new(InMemoryDurableBackend::new());
        let clock = Arc::new(ManualClock::default());
        let limits = CacheLimits::new()
            .with_memory_max_count(0)
            .with_memory_max_age(Duration::from_secs(60))
            .with_durable_max_count(2)
            .with_durable_max_age(Duration::from_secs(3600));
        let cache = ItemCache::<Point>::new("points", limits)
            .with_clock(clock.clone())
            .with_backend(backend.clone());

        for id in 1..=4u64 {
            cache.put(point_at(id, 1, 0.0, 0.0));
            cache.evict_memory();
            clock.advance(Duration::from_secs(1000));
        }
        // Rows written at t=0, 1000, 2000, 3000; now t=4000.
        assert_eq!(cache.persisted_count(), 4);

        let cleanup = cache.evict_durable();
        // Row 1 is past the hour, then row 2 falls outside the newest two.
        assert_eq!(cleanup.deleted, 2);
        assert_eq!(cleanup.backend_failures, 0);
        assert_eq!(cache.persisted_count(), 2);
        assert!(!cache.is_persisted(ObjectId::new(1)));
        assert!(!cache.is_persisted(ObjectId::new(2)));
        assert!(cache.get(ObjectId::new(4)).is_some());
    }

    #[test]
    fn test_evict_durable_without_backend_is_noop() {
        let (cache, _clock) = cache_with_clock(limits(0, 600));
        assert_eq!(cache.evict_durable(), DurableCleanup::default());
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[test]
    fn test_concurrent_put_get_never_tears() {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(ItemCache::<Point>::new("points", limits(8, 600)).with_clock(clock));

        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let id = (t * 1000) + (i % 20);
                        cache.put(point_at(id + 1, i + 1, 0.0, 0.0));
                        let _ = cache.get(ObjectId::new(id + 1));
                        if i % 50 == 0 {
                            cache.evict_memory();
                        }
                    }
                })
            })
            .collect();

        for handle in writers {
            handle.join().expect("writer thread panicked");
        }

        assert!(cache.is_consistent());
        cache.evict_memory();
        assert!(cache.is_consistent());
        assert!(cache.len() <= 8);
    }
}
