//! Insertion-time index shared by the memory tiers.
//!
//! Each id appears once, keyed by when it was last written. Entries
//! written in the same millisecond are ordered by a sequence number, so
//! the oldest entry is always well defined.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::DateTime;
use meridian_core::{age_of, ObjectId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TouchKey {
    at_millis: i64,
    seq: u64,
}

#[derive(Debug, Default)]
pub(crate) struct RecencyIndex {
    order: BTreeMap<TouchKey, ObjectId>,
    positions: HashMap<ObjectId, TouchKey>,
    next_seq: u64,
}

impl RecencyIndex {
    /// Record a write of `id` at `at`, replacing any earlier position.
    pub fn touch(&mut self, id: ObjectId, at: Timestamp) {
        let key = TouchKey {
            at_millis: at.timestamp_millis(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if let Some(previous) = self.positions.insert(id, key) {
            self.order.remove(&previous);
        }
        self.order.insert(key, id);
    }

    pub fn remove(&mut self, id: ObjectId) -> bool {
        match self.positions.remove(&id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn oldest(&self) -> Option<(ObjectId, Timestamp)> {
        self.order.first_key_value().map(|(key, id)| {
            let at = DateTime::from_timestamp_millis(key.at_millis).unwrap_or_default();
            (*id, at)
        })
    }

    pub fn pop_oldest(&mut self) -> Option<ObjectId> {
        let (_, id) = self.order.pop_first()?;
        self.positions.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.positions.contains_key(&id)
    }

    /// True while the oldest entry is older than `max_age` or there are
    /// more than `max_count` entries. An empty index is never over.
    pub fn is_over(&self, now: Timestamp, max_age: Duration, max_count: usize) -> bool {
        match self.oldest() {
            None => false,
            Some((_, at)) => age_of(at, now) > max_age || self.len() > max_count,
        }
    }

    /// Ids from oldest to newest.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.order.values().copied()
    }
}
