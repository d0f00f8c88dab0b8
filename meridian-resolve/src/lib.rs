//! Meridian Resolve - Relation Resolution
//!
//! Expands a relation into every element it transitively references and
//! derives the line geometry those elements imply. All fetches go through
//! an [`ApiClient`], normally a cache-backed one, so repeated resolutions
//! of overlapping relations stay cheap.

use std::collections::{HashMap, HashSet};

use meridian_core::{
    ApiClient, ApiError, ApiResult, Element, ElementType, GeoItem, ObjectId, Path, Point, Relation,
    RelationMember, Segment, Timestamp,
};

// ============================================================================
// RELATION RESOLVER
// ============================================================================

/// Stateless resolver over a borrowed API client.
///
/// Traversal is sequential and blocks on every fetch. The first fetch
/// failure aborts the whole resolution; there are no partial results.
#[derive(Debug)]
pub struct RelationResolver<'a, C: ApiClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: ApiClient + ?Sized> Clone for RelationResolver<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C: ApiClient + ?Sized> Copy for RelationResolver<'a, C> {}

impl<'a, C: ApiClient + ?Sized> RelationResolver<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &'a C {
        self.client
    }

    /// Every point, path and sub-relation reachable from `relation`.
    ///
    /// With `as_of` set, each member is fetched at the revision current at
    /// that instant; otherwise at its current revision, and `relation` and
    /// each sub-relation are prefetched in full before they are expanded.
    /// The relation itself is never part of the result.
    pub fn resolve_members(&self, relation: &Relation, as_of: Option<Timestamp>) -> ApiResult<HashSet<GeoItem>> {
        let mut visited = HashSet::new();
        self.resolve_members_excluding(relation, as_of, &mut visited)
    }

    /// [`resolve_members`](Self::resolve_members) with a caller-owned set
    /// of relation ids that must not be expanded.
    ///
    /// On return `visited` also holds `relation.id` and every relation
    /// expanded along the way.
    pub fn resolve_members_excluding(
        &self,
        relation: &Relation,
        as_of: Option<Timestamp>,
        visited: &mut HashSet<ObjectId>,
    ) -> ApiResult<HashSet<GeoItem>> {
        let mut resolved = HashSet::new();
        visited.insert(relation.id);
        if as_of.is_none() {
            self.client.fetch_full(relation.id)?;
        }

        // Explicit stack of partially expanded relations, walked depth
        // first in member order. Each id is marked visited when pushed, so
        // a relation is expanded at most once however often it is
        // referenced.
        let mut stack = vec![Frame::new(relation.clone())];

        loop {
            let member = match stack.last_mut().map(Frame::advance) {
                None => break,
                Some(None) => {
                    stack.pop();
                    continue;
                }
                Some(Some(member)) => member,
            };

            match member.element_type {
                ElementType::Point | ElementType::Path => {
                    let item = self.fetch(member.element_type, member.reference_id, as_of)?;
                    resolved.insert(item);
                }
                ElementType::Relation => {
                    if !visited.insert(member.reference_id) {
                        tracing::debug!(
                            relation = %member.relation_id,
                            member = %member.reference_id,
                            "Skipping already visited relation"
                        );
                        continue;
                    }
                    if as_of.is_none() {
                        self.client.fetch_full(member.reference_id)?;
                    }
                    let item = self.fetch(ElementType::Relation, member.reference_id, as_of)?;
                    let sub = Relation::from_item(item)?;
                    tracing::debug!(relation = %sub.id, members = sub.members.len(), "Expanding sub-relation");
                    resolved.insert(GeoItem::Relation(sub.clone()));
                    stack.push(Frame::new(sub));
                }
            }
        }

        Ok(resolved)
    }

    pub fn resolve_points(&self, relation: &Relation, as_of: Option<Timestamp>) -> ApiResult<HashSet<Point>> {
        Ok(only::<Point>(self.resolve_members(relation, as_of)?))
    }

    pub fn resolve_paths(&self, relation: &Relation, as_of: Option<Timestamp>) -> ApiResult<HashSet<Path>> {
        Ok(only::<Path>(self.resolve_members(relation, as_of)?))
    }

    pub fn resolve_relations(&self, relation: &Relation, as_of: Option<Timestamp>) -> ApiResult<HashSet<Relation>> {
        Ok(only::<Relation>(self.resolve_members(relation, as_of)?))
    }

    /// Line geometry of `relation`.
    ///
    /// Every resolved point becomes a degenerate segment. Every resolved
    /// path contributes one segment per consecutive pair of its points,
    /// fetched at the same `as_of`. Segments are unordered, so shared
    /// edges of adjacent paths collapse into one.
    pub fn resolve_segments(&self, relation: &Relation, as_of: Option<Timestamp>) -> ApiResult<HashSet<Segment>> {
        let members = self.resolve_members(relation, as_of)?;
        let mut segments = HashSet::new();
        let mut points: HashMap<ObjectId, Point> = HashMap::new();

        for item in &members {
            match item {
                GeoItem::Point(point) => {
                    segments.insert(Segment::point(point.clone()));
                }
                GeoItem::Path(path) => {
                    let vertices = path
                        .point_ids
                        .iter()
                        .map(|id| self.path_point(*id, as_of, &mut points))
                        .collect::<ApiResult<Vec<_>>>()?;
                    segments.extend(
                        vertices
                            .windows(2)
                            .map(|pair| Segment::new(pair[0].clone(), pair[1].clone())),
                    );
                }
                GeoItem::Relation(_) => {}
            }
        }

        tracing::debug!(relation = %relation.id, segments = segments.len(), "Resolved segments");
        Ok(segments)
    }

    fn path_point(&self, id: ObjectId, as_of: Option<Timestamp>, seen: &mut HashMap<ObjectId, Point>) -> ApiResult<Point> {
        if let Some(point) = seen.get(&id) {
            return Ok(point.clone());
        }
        let point = Point::from_item(self.fetch(ElementType::Point, id, as_of)?)?;
        seen.insert(id, point.clone());
        Ok(point)
    }

    fn fetch(&self, element_type: ElementType, id: ObjectId, as_of: Option<Timestamp>) -> ApiResult<GeoItem> {
        let item = match as_of {
            Some(at) => self.client.fetch_at(element_type, id, at)?,
            None => self.client.fetch(element_type, id)?,
        };
        if item.element_type() != element_type {
            return Err(ApiError::UnexpectedType {
                id,
                expected: element_type,
                got: item.element_type(),
            });
        }
        Ok(item)
    }
}

/// A relation whose members are being walked, and the next member index.
struct Frame {
    relation: Relation,
    next: usize,
}

impl Frame {
    fn new(relation: Relation) -> Self {
        Self { relation, next: 0 }
    }

    fn advance(&mut self) -> Option<RelationMember> {
        let member = self.relation.members.get(self.next).cloned();
        self.next += 1;
        member
    }
}

fn only<E: Element + Eq + std::hash::Hash>(items: HashSet<GeoItem>) -> HashSet<E> {
    items
        .into_iter()
        .filter(|item| item.element_type() == E::ELEMENT_TYPE)
        .filter_map(|item| E::from_item(item).ok())
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
