//! Meridian Test Utilities
//!
//! Shared test infrastructure for the Meridian workspace:
//! - An in-memory element world acting as both upstream and API client
//! - Test fixtures with deterministic timestamps
//! - Proptest generators
//! - Assertions over resolved element sets

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use meridian_core::{
    ApiClient, ApiError, ApiResult, ElementType, GeoItem, ObjectId, Path, Point, Relation,
    RelationMember, Timestamp, Upstream, Version,
};

// ============================================================================
// MOCK WORLD
// ============================================================================

/// Operations the mock world counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamOp {
    Current,
    Version,
    History,
    Full,
    Fetch,
    FetchAt,
    FetchFull,
}

impl UpstreamOp {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

type Revisions = BTreeMap<Version, GeoItem>;

/// In-memory element store implementing both [`Upstream`] and
/// [`ApiClient`], with per-operation call counters and failure injection.
#[derive(Debug, Default)]
pub struct MockWorld {
    elements: Mutex<HashMap<(ElementType, ObjectId), Revisions>>,
    failing: Mutex<HashSet<ObjectId>>,
    misrouted: Mutex<HashMap<(ElementType, ObjectId), ElementType>>,
    calls: [AtomicUsize; UpstreamOp::COUNT],
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one revision of an element.
    pub fn insert(&self, item: impl Into<GeoItem>) {
        let item = item.into();
        lock(&self.elements)
            .entry((item.element_type(), item_id(&item)))
            .or_default()
            .insert(item.revision(), item);
    }

    /// Every request touching `id` fails with an upstream error.
    pub fn fail_on(&self, id: ObjectId) {
        lock(&self.failing).insert(id);
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    /// Requests for `requested` with this id are answered with whatever
    /// other element type is stored under the id.
    pub fn misroute(&self, id: ObjectId, requested: ElementType) {
        let actual = {
            let elements = lock(&self.elements);
            ElementType::ALL
                .into_iter()
                .find(|t| *t != requested && elements.contains_key(&(*t, id)))
        };
        if let Some(actual) = actual {
            lock(&self.misrouted).insert((requested, id), actual);
        }
    }

    pub fn calls(&self, op: UpstreamOp) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub fn reset_calls(&self) {
        for counter in &self.calls {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn count(&self, op: UpstreamOp) {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
    }

    fn revisions(&self, element_type: ElementType, id: ObjectId) -> ApiResult<Revisions> {
        if lock(&self.failing).contains(&id) {
            return Err(ApiError::Upstream {
                reason: format!("injected failure for {} {}", element_type, id),
            });
        }
        let actual = lock(&self.misrouted)
            .get(&(element_type, id))
            .copied()
            .unwrap_or(element_type);
        lock(&self.elements)
            .get(&(actual, id))
            .cloned()
            .ok_or(ApiError::NotFound { element_type, id })
    }

    fn latest(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem> {
        self.revisions(element_type, id)?
            .into_values()
            .next_back()
            .ok_or(ApiError::NotFound { element_type, id })
    }

    fn collect_full(&self, relation_id: ObjectId, seen: &mut HashSet<(ElementType, ObjectId)>, out: &mut Vec<GeoItem>) -> ApiResult<()> {
        if !seen.insert((ElementType::Relation, relation_id)) {
            return Ok(());
        }
        let item = self.latest(ElementType::Relation, relation_id)?;
        let members: Vec<RelationMember> = item
            .as_relation()
            .map(|relation| relation.members.clone())
            .unwrap_or_default();
        out.push(item);

        for member in members {
            match member.element_type {
                ElementType::Relation => self.collect_full(member.reference_id, seen, out)?,
                ElementType::Path => {
                    if !seen.insert((ElementType::Path, member.reference_id)) {
                        continue;
                    }
                    let path = self.latest(ElementType::Path, member.reference_id)?;
                    let point_ids = path.as_path().map(|p| p.point_ids.clone()).unwrap_or_default();
                    out.push(path);
                    for point_id in point_ids {
                        if seen.insert((ElementType::Point, point_id)) {
                            out.push(self.latest(ElementType::Point, point_id)?);
                        }
                    }
                }
                ElementType::Point => {
                    if seen.insert((ElementType::Point, member.reference_id)) {
                        out.push(self.latest(ElementType::Point, member.reference_id)?);
                    }
                }
            }
        }
        Ok(())
    }
}

fn item_id(item: &GeoItem) -> ObjectId {
    use meridian_core::Item;
    item.id()
}

impl Upstream for MockWorld {
    fn get_current(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem> {
        self.count(UpstreamOp::Current);
        self.latest(element_type, id)
    }

    fn get_version(&self, element_type: ElementType, id: ObjectId, version: Version) -> ApiResult<GeoItem> {
        self.count(UpstreamOp::Version);
        self.revisions(element_type, id)?
            .remove(&version)
            .ok_or(ApiError::VersionNotFound {
                element_type,
                id,
                version,
            })
    }

    fn get_history(&self, element_type: ElementType, id: ObjectId) -> ApiResult<Vec<GeoItem>> {
        self.count(UpstreamOp::History);
        Ok(self.revisions(element_type, id)?.into_values().collect())
    }

    fn get_full(&self, relation_id: ObjectId) -> ApiResult<Vec<GeoItem>> {
        self.count(UpstreamOp::Full);
        let mut out = Vec::new();
        self.collect_full(relation_id, &mut HashSet::new(), &mut out)?;
        Ok(out)
    }
}

impl ApiClient for MockWorld {
    fn fetch(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem> {
        self.count(UpstreamOp::Fetch);
        self.latest(element_type, id)
    }

    fn fetch_at(&self, element_type: ElementType, id: ObjectId, as_of: Timestamp) -> ApiResult<GeoItem> {
        self.count(UpstreamOp::FetchAt);
        self.revisions(element_type, id)?
            .into_values()
            .rev()
            .find(|item| item.timestamp() <= as_of)
            .ok_or(ApiError::NotFoundAt {
                element_type,
                id,
                as_of,
            })
    }

    fn fetch_full(&self, relation_id: ObjectId) -> ApiResult<()> {
        self.count(UpstreamOp::FetchFull);
        self.revisions(ElementType::Relation, relation_id).map(|_| ())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Elements with deterministic timestamps.
    //!
    //! Revision `n` of every fixture is stamped `ts(n - 1)`, so revisions
    //! of one element are exactly one day apart.

    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use meridian_core::Tags;

    /// 2015-03-01 12:00:00 UTC plus `day` days.
    pub fn ts(day: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 0)
            .single()
            .unwrap_or_default()
            + Duration::days(day)
    }

    fn version(n: u64) -> Version {
        Version::new(n).unwrap_or(Version::FIRST)
    }

    fn stamp(n: u64) -> Timestamp {
        ts(n.saturating_sub(1) as i64)
    }

    pub fn point_at(id: u64, version_number: u64, lat: f64, lon: f64) -> Point {
        Point {
            id: ObjectId::new(id),
            version: version(version_number),
            timestamp: stamp(version_number),
            lat,
            lon,
            tags: Tags::new(),
        }
    }

    /// First revision of a point at the origin.
    pub fn point(id: u64) -> Point {
        point_at(id, 1, 0.0, 0.0)
    }

    pub fn path_at(id: u64, version_number: u64, point_ids: &[u64]) -> Path {
        Path {
            id: ObjectId::new(id),
            version: version(version_number),
            timestamp: stamp(version_number),
            point_ids: point_ids.iter().copied().map(ObjectId::new).collect(),
            tags: Tags::new(),
        }
    }

    pub fn relation_at(id: u64, version_number: u64) -> Relation {
        Relation::new(ObjectId::new(id), version(version_number), stamp(version_number))
    }

    /// A world holding points `point_ids` and one path through them.
    pub fn world_with_path(path_id: u64, point_ids: &[u64]) -> MockWorld {
        let world = MockWorld::new();
        for id in point_ids {
            world.insert(point(*id));
        }
        world.insert(path_at(path_id, 1, point_ids));
        world
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Meridian values.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    pub fn arb_object_id() -> impl Strategy<Value = ObjectId> {
        (1u64..1_000_000).prop_map(ObjectId::new)
    }

    pub fn arb_version() -> impl Strategy<Value = Version> {
        (1u64..10_000).prop_map(|n| Version::new(n).unwrap_or(Version::FIRST))
    }

    pub fn arb_element_type() -> impl Strategy<Value = ElementType> {
        prop_oneof![
            Just(ElementType::Point),
            Just(ElementType::Path),
            Just(ElementType::Relation),
        ]
    }

    pub fn arb_point() -> impl Strategy<Value = Point> {
        (1u64..1000, 1u64..50, -90.0f64..90.0, -180.0f64..180.0)
            .prop_map(|(id, v, lat, lon)| fixtures::point_at(id, v, lat, lon))
    }

    /// `(id, version)` puts over ids `1..=max_id`.
    pub fn arb_put_sequence(max_id: u64, max_len: usize) -> impl Strategy<Value = Vec<(u64, u64)>> {
        proptest::collection::vec((1..=max_id, 1u64..100), 0..max_len)
    }

    /// A current version in `1..=max` and a random subset of `1..=current`.
    pub fn arb_version_subset(max: u64) -> impl Strategy<Value = (u64, BTreeSet<u64>)> {
        (1..=max).prop_flat_map(|current| {
            proptest::collection::vec(any::<bool>(), current as usize).prop_map(move |keep| {
                let present = keep
                    .iter()
                    .enumerate()
                    .filter(|(_, kept)| **kept)
                    .map(|(i, _)| i as u64 + 1)
                    .collect();
                (current, present)
            })
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Helpers for checking resolved element sets.

    use super::*;
    use meridian_core::Item;
    use std::collections::BTreeSet;

    /// Ids of the elements of one type in `items`.
    pub fn ids_of<'a>(items: impl IntoIterator<Item = &'a GeoItem>, element_type: ElementType) -> BTreeSet<u64> {
        items
            .into_iter()
            .filter(|item| item.element_type() == element_type)
            .map(|item| item.id().as_u64())
            .collect()
    }

    #[track_caller]
    pub fn assert_ids(items: &HashSet<GeoItem>, element_type: ElementType, expected: &[u64]) {
        let expected: BTreeSet<u64> = expected.iter().copied().collect();
        assert_eq!(
            ids_of(items, element_type),
            expected,
            "unexpected {} ids",
            element_type
        );
    }
}


#[cfg(test)]
mod prop_tests {
    use super::fixtures::{path_at, point_at, relation_at};
    use super::generators::{arb_element_type, arb_version};
    use super::*;
    use proptest::prelude::*;

    fn revision(element_type: ElementType, version: Version) -> GeoItem {
        let n = version.as_u64();
        match element_type {
            ElementType::Point => point_at(1, n, 0.0, 0.0).into(),
            ElementType::Path => path_at(1, n, &[]).into(),
            ElementType::Relation => relation_at(1, n).into(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The world answers an exact-revision request with what was
        /// inserted, and only under the inserted element type.
        #[test]
        fn prop_world_serves_inserted_revision(element_type in arb_element_type(), version in arb_version()) {
            let world = MockWorld::new();
            world.insert(revision(element_type, version));

            let found = world.get_version(element_type, ObjectId::new(1), version).unwrap();
            prop_assert_eq!(found.element_type(), element_type);
            prop_assert_eq!(found.revision(), version);

            for other in ElementType::ALL.into_iter().filter(|t| *t != element_type) {
                let is_not_found = matches!(
                    world.get_version(other, ObjectId::new(1), version),
                    Err(ApiError::NotFound { .. })
                );
                prop_assert!(is_not_found);
            }
        }
    }
}
