//! Multi-version cache layered over [`ItemCache`].
//!
//! The wrapped item cache answers "current revision" lookups. On top of
//! it each id may own a history map from version to revision. A history
//! is only handed out when it is complete: every version from 1 up to
//! the current one is present.
//!
//! # Locking
//!
//! The outer history lock guards the id-to-map table and its recency
//! index. Each map has its own lock, taken only after the outer lock has
//! been released, so edits to one id's history never block another's.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meridian_core::{CacheLimits, Clock, HistoryLimits, ObjectId, Version, Versioned};
use tracing::{debug, info, warn};

use super::item_cache::ItemCache;
use super::recency::RecencyIndex;
use super::registry::{DurableCleanup, Evictable, EvictionOutcome};
use super::traits::{CacheStats, Cacheable, DurableBackend};

/// Revisions of one id, ordered by version.
pub type History<T> = BTreeMap<Version, T>;

type SharedHistory<T> = Arc<Mutex<History<T>>>;

struct HistoryTier<T> {
    maps: HashMap<ObjectId, SharedHistory<T>>,
    recency: RecencyIndex,
}

impl<T> Default for HistoryTier<T> {
    fn default() -> Self {
        Self {
            maps: HashMap::new(),
            recency: RecencyIndex::default(),
        }
    }
}

fn lock_history<T>(history: &SharedHistory<T>) -> MutexGuard<'_, History<T>> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

/// True if `history` holds every version in `1..=current`.
fn is_complete<T>(history: &History<T>, current: Version) -> bool {
    history.range(Version::FIRST..=current).count() as u64 == current.as_u64()
}

pub struct VersionedObjectCache<T> {
    current: ItemCache<T>,
    history_limits: HistoryLimits,
    histories: Mutex<HistoryTier<T>>,
}

impl<T: Cacheable + Versioned> VersionedObjectCache<T> {
    pub fn new(name: impl Into<String>, limits: CacheLimits, history_limits: HistoryLimits) -> Self {
        Self {
            current: ItemCache::new(name, limits),
            history_limits,
            histories: Mutex::new(HistoryTier::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.current = self.current.with_clock(clock);
        self
    }

    /// Attach a durable tier for current revisions. Histories stay in
    /// memory only.
    pub fn with_backend(mut self, backend: Arc<dyn DurableBackend>) -> Self {
        self.current = self.current.with_backend(backend);
        self
    }

    pub fn name(&self) -> &str {
        self.current.name()
    }

    /// The wrapped current-revision cache.
    pub fn current(&self) -> &ItemCache<T> {
        &self.current
    }

    pub fn history_limits(&self) -> &HistoryLimits {
        &self.history_limits
    }

    pub fn stats(&self) -> CacheStats {
        self.current.stats()
    }

    fn lock_histories(&self) -> MutexGuard<'_, HistoryTier<T>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shared map for `id`, if any. The outer lock is held only for
    /// the lookup.
    fn history_of(&self, id: ObjectId) -> Option<SharedHistory<T>> {
        self.lock_histories().maps.get(&id).cloned()
    }

    pub fn get_current(&self, id: ObjectId) -> Option<T> {
        self.current.get(id)
    }

    /// One exact revision. Does not require the history to be complete.
    pub fn get_version(&self, id: ObjectId, version: Version) -> Option<T> {
        let history = self.history_of(id)?;
        let revisions = lock_history(&history);
        revisions.get(&version).cloned()
    }

    /// The full history of `id`, or `None` if the current version is
    /// unknown or any version from 1 to current is missing.
    pub fn get_history(&self, id: ObjectId) -> Option<History<T>> {
        let current_version = self.current.get(id)?.version()?;
        let history = self.history_of(id)?;
        let revisions = lock_history(&history);
        if is_complete(&revisions, current_version) {
            Some(revisions.clone())
        } else {
            debug!(
                cache = %self.name(),
                id = %id,
                current = %current_version,
                cached = revisions.len(),
                "History has gaps"
            );
            None
        }
    }

    /// Store `object` as the current revision and add it to the history.
    pub fn cache_current(&self, object: T) {
        self.current.put(object.clone());
        self.cache_version(object);
    }

    /// Add one revision to the history of its id. Objects without a
    /// version are ignored.
    pub fn cache_version(&self, object: T) {
        let Some(version) = object.version() else {
            return;
        };
        let id = object.id();
        let now = self.current.clock().now();

        let history = {
            let mut tier = self.lock_histories();
            tier.recency.touch(id, now);
            tier.maps.entry(id).or_default().clone()
        };
        lock_history(&history).insert(version, object);
    }

    /// Replace the stored history of an id with `history` and make its
    /// highest revision current. Entries whose id differs from that
    /// revision's id are dropped.
    pub fn cache_history(&self, history: History<T>) {
        let Some(newest) = history.values().next_back().cloned() else {
            return;
        };
        let id = newest.id();
        self.current.put(newest);

        let before = history.len();
        let history: History<T> = history
            .into_iter()
            .filter(|(_, object)| object.id() == id)
            .collect();
        if history.len() != before {
            warn!(
                cache = %self.name(),
                id = %id,
                dropped = before - history.len(),
                "History contained revisions of other ids"
            );
        }

        let now = self.current.clock().now();
        let mut tier = self.lock_histories();
        tier.maps.insert(id, Arc::new(Mutex::new(history)));
        tier.recency.touch(id, now);
    }

    /// Number of ids with a history map.
    pub fn history_count(&self) -> usize {
        self.lock_histories().maps.len()
    }

    /// Drop whole history maps, oldest first, until both history limits
    /// hold. Returns the number of maps dropped.
    pub fn evict_history(&self) -> u64 {
        let now = self.current.clock().now();
        let mut evicted = 0u64;

        let mut tier = self.lock_histories();
        while tier
            .recency
            .is_over(now, self.history_limits.max_age, self.history_limits.max_count)
        {
            let Some(id) = tier.recency.pop_oldest() else {
                break;
            };
            tier.maps.remove(&id);
            evicted += 1;
        }
        drop(tier);

        if evicted > 0 {
            info!(cache = %self.name(), evicted, "History eviction completed");
        }
        evicted
    }

    /// Current-revision eviction followed by history eviction.
    pub fn clean_up(&self) -> EvictionOutcome {
        let mut outcome = self.current.evict_memory();
        outcome.histories_evicted = self.evict_history();
        outcome
    }
}

impl<T: Cacheable + Versioned> Evictable for VersionedObjectCache<T> {
    fn cache_name(&self) -> &str {
        self.current.name()
    }

    fn has_durable_tier(&self) -> bool {
        self.current.has_durable_tier()
    }

    fn evict_memory(&self) -> EvictionOutcome {
        self.clean_up()
    }

    fn evict_durable(&self) -> DurableCleanup {
        self.current.evict_durable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{ManualClock, Point};
    use meridian_test_utils::fixtures::point_at;
    use std::time::Duration;

    fn v(n: u64) -> Version {
        Version::new(n).unwrap()
    }

    fn new_cache() -> (VersionedObjectCache<Point>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = VersionedObjectCache::new(
            "points",
            CacheLimits::new().with_memory_max_count(100),
            HistoryLimits::default().with_max_count(2).with_max_age(Duration::from_secs(60)),
        )
        .with_clock(clock.clone());
        (cache, clock)
    }

    fn full_history(id: u64, current: u64) -> History<Point> {
        (1..=current).map(|n| (v(n), point_at(id, n, 0.0, 0.0))).collect()
    }

    #[test]
    fn test_cache_current_adds_to_history() {
        let (cache, _clock) = new_cache();
        cache.cache_current(point_at(1, 1, 0.0, 0.0));

        assert_eq!(cache.get_current(ObjectId::new(1)).unwrap().version, v(1));
        assert!(cache.get_version(ObjectId::new(1), v(1)).is_some());
        let history = cache.get_history(ObjectId::new(1)).expect("v1 alone is complete");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_get_history_requires_current() {
        let (cache, _clock) = new_cache();
        cache.cache_version(point_at(1, 1, 0.0, 0.0));
        assert!(cache.get_history(ObjectId::new(1)).is_none());
        assert!(cache.get_version(ObjectId::new(1), v(1)).is_some());
    }

    #[test]
    fn test_get_history_with_gap() {
        let (cache, _clock) = new_cache();
        cache.cache_version(point_at(1, 1, 0.0, 0.0));
        cache.cache_current(point_at(1, 3, 0.0, 0.0));
        assert!(cache.get_history(ObjectId::new(1)).is_none());

        // Filling the gap out of order completes it.
        cache.cache_version(point_at(1, 2, 0.0, 0.0));
        let history = cache.get_history(ObjectId::new(1)).expect("complete");
        assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![v(1), v(2), v(3)]);
    }

    #[test]
    fn test_get_history_current_versions() {
        for current in [1u64, 2, 50] {
            let (cache, _clock) = new_cache();
            cache.cache_history(full_history(9, current));
            let history = cache.get_history(ObjectId::new(9)).expect("complete");
            assert_eq!(history.len() as u64, current);

            for missing in 1..=current {
                let (cache, _clock) = new_cache();
                let mut gapped = full_history(9, current);
                gapped.remove(&v(missing));
                if gapped.is_empty() {
                    continue;
                }
                cache.cache_history(gapped);
                if missing == current {
                    // The top entry is gone, so the new current is one
                    // lower and the history is complete again.
                    assert!(cache.get_history(ObjectId::new(9)).is_some());
                } else {
                    assert!(cache.get_history(ObjectId::new(9)).is_none());
                }
            }
        }
    }

    #[test]
    fn test_history_ignores_entries_above_current() {
        let (cache, _clock) = new_cache();
        cache.cache_history(full_history(4, 2));
        cache.cache_version(point_at(4, 5, 0.0, 0.0));
        // Current is still 2 and 1..=2 is present.
        let history = cache.get_history(ObjectId::new(4)).expect("complete");
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_cache_history_top_entry_is_current() {
        let (cache, _clock) = new_cache();
        cache.cache_history(full_history(3, 4));

        let current = cache.get_current(ObjectId::new(3)).unwrap();
        let history = cache.get_history(ObjectId::new(3)).unwrap();
        let (_, top) = history.iter().next_back().unwrap();
        assert_eq!(top, &current);
        assert_eq!(current.version, v(4));
    }

    #[test]
    fn test_cache_history_replaces_existing_map() {
        let (cache, _clock) = new_cache();
        cache.cache_version(point_at(3, 7, 0.0, 0.0));
        cache.cache_history(full_history(3, 2));
        assert!(cache.get_version(ObjectId::new(3), v(7)).is_none());
    }

    #[test]
    fn test_cache_history_drops_foreign_ids() {
        let (cache, _clock) = new_cache();
        let mut history = full_history(3, 2);
        history.insert(v(1), point_at(8, 1, 0.0, 0.0));
        cache.cache_history(history);

        assert!(cache.get_version(ObjectId::new(3), v(2)).is_some());
        assert!(cache.get_version(ObjectId::new(3), v(1)).is_none());
    }

    #[test]
    fn test_cache_history_empty_is_noop() {
        let (cache, _clock) = new_cache();
        cache.cache_history(History::new());
        assert_eq!(cache.history_count(), 0);
    }

    #[test]
    fn test_evict_history_by_count_and_age() {
        let (cache, clock) = new_cache();
        for id in 1..=3u64 {
            cache.cache_version(point_at(id, 1, 0.0, 0.0));
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(cache.evict_history(), 1);
        assert!(cache.get_version(ObjectId::new(1), v(1)).is_none());
        assert_eq!(cache.history_count(), 2);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.evict_history(), 2);
        assert_eq!(cache.history_count(), 0);
    }

    #[test]
    fn test_clean_up_runs_both_passes() {
        let clock = Arc::new(ManualClock::default());
        let cache = VersionedObjectCache::<Point>::new(
            "points",
            CacheLimits::new().with_memory_max_count(0),
            HistoryLimits::default().with_max_count(0),
        )
        .with_clock(clock);

        cache.cache_history(full_history(1, 3));
        let outcome = cache.clean_up();
        assert_eq!(outcome.evicted, 1);
        assert_eq!(outcome.histories_evicted, 1);
        assert!(cache.get_current(ObjectId::new(1)).is_none());
        assert!(cache.get_version(ObjectId::new(1), v(1)).is_none());
    }

    #[test]
    fn test_concurrent_history_edits() {
        let (cache, _clock) = new_cache();
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in (1..=40u64).filter(|n| n % 4 == t) {
                        cache.cache_version(point_at(1, n, 0.0, 0.0));
                        let _ = cache.get_history(ObjectId::new(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        cache.cache_current(point_at(1, 40, 0.0, 0.0));
        assert_eq!(cache.get_history(ObjectId::new(1)).unwrap().len(), 40);
    }
}
