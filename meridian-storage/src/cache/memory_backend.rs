//! In-process durable backend.
//!
//! Same contract as [`super::LmdbDurableBackend`] without touching disk.
//! Useful in tests and for deployments that want the two-tier cache
//! behaviour but no persistence across restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use meridian_core::{ObjectId, StorageError, Timestamp};

use super::traits::{DurableBackend, DurableResult, DurableRow};

type Rows = HashMap<String, HashMap<ObjectId, DurableRow>>;

#[derive(Debug, Default)]
pub struct InMemoryDurableBackend {
    rows: RwLock<Rows>,
}

fn poisoned() -> StorageError {
    StorageError::Transaction {
        reason: "durable row lock poisoned".to_string(),
    }
}

impl InMemoryDurableBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for one cache.
    pub fn row_count(&self, cache_name: &str) -> usize {
        self.rows
            .read()
            .map(|rows| rows.get(cache_name).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

impl DurableBackend for InMemoryDurableBackend {
    fn get(&self, cache_name: &str, id: ObjectId) -> DurableResult<Option<DurableRow>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows.get(cache_name).and_then(|cache| cache.get(&id)).cloned())
    }

    fn list_ids(&self, cache_name: &str) -> DurableResult<Vec<ObjectId>> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(cache_name)
            .map(|cache| cache.keys().copied().collect())
            .unwrap_or_default())
    }

    fn upsert(&self, cache_name: &str, id: ObjectId, data: &[u8], written_at: Timestamp) -> DurableResult<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.entry(cache_name.to_string()).or_default().insert(
            id,
            DurableRow {
                data: data.to_vec(),
                written_at,
            },
        );
        Ok(())
    }

    fn delete_older_than(&self, cache_name: &str, cutoff: Timestamp) -> DurableResult<u64> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let Some(cache) = rows.get_mut(cache_name) else {
            return Ok(0);
        };
        let before = cache.len();
        cache.retain(|_, row| row.written_at >= cutoff);
        Ok((before - cache.len()) as u64)
    }

    fn delete_beyond_most_recent(&self, cache_name: &str, keep: usize) -> DurableResult<u64> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let Some(cache) = rows.get_mut(cache_name) else {
            return Ok(0);
        };
        if cache.len() <= keep {
            return Ok(0);
        }

        let mut by_recency: Vec<(Timestamp, ObjectId)> =
            cache.iter().map(|(id, row)| (row.written_at, *id)).collect();
        by_recency.sort_by(|a, b| b.cmp(a));

        let mut deleted = 0u64;
        for (_, id) in by_recency.into_iter().skip(keep) {
            if cache.remove(&id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{Clock, ManualClock};
    use std::time::Duration;

    #[test]
    fn test_matches_lmdb_semantics() {
        let backend = InMemoryDurableBackend::new();
        let clock = ManualClock::default();

        for id in 1..=4u64 {
            backend
                .upsert("c", ObjectId::new(id), b"x", clock.now())
                .unwrap();
            clock.advance(Duration::from_secs(10));
        }
        backend
            .upsert("other", ObjectId::new(1), b"y", clock.now())
            .unwrap();

        let cutoff = clock.now() - chrono::Duration::seconds(30);
        assert_eq!(backend.delete_older_than("c", cutoff).unwrap(), 1);
        assert_eq!(backend.delete_beyond_most_recent("c", 2).unwrap(), 1);

        let mut ids = backend.list_ids("c").unwrap();
        ids.sort();
        assert_eq!(ids, vec![ObjectId::new(3), ObjectId::new(4)]);
        assert_eq!(backend.row_count("other"), 1);
    }

    #[test]
    fn test_unknown_cache_is_empty() {
        let backend = InMemoryDurableBackend::new();
        assert!(backend.get("none", ObjectId::new(1)).unwrap().is_none());
        assert!(backend.list_ids("none").unwrap().is_empty());
        assert_eq!(backend.delete_beyond_most_recent("none", 0).unwrap(), 0);
    }
}
