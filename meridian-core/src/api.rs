//! Collaborator traits for fetching elements.
//!
//! [`ApiClient`] is what the relation resolver consumes: a fetch-through
//! client that may itself be cache-backed. [`Upstream`] is the raw remote
//! API a cache-backed client sits in front of. Both are synchronous and
//! block the calling thread; timeouts belong to the implementation.

use crate::{ApiResult, ElementType, GeoItem, ObjectId, Timestamp, Version};

/// Fetch-through API client.
pub trait ApiClient: Send + Sync {
    /// Fetch the current revision of an element.
    fn fetch(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem>;

    /// Fetch the revision that was current at `as_of`.
    fn fetch_at(&self, element_type: ElementType, id: ObjectId, as_of: Timestamp) -> ApiResult<GeoItem>;

    /// Prefetch a relation together with everything it transitively
    /// references into whatever cache backs this client.
    fn fetch_full(&self, relation_id: ObjectId) -> ApiResult<()>;
}

/// Remote API returning freshly decoded elements.
pub trait Upstream: Send + Sync {
    fn get_current(&self, element_type: ElementType, id: ObjectId) -> ApiResult<GeoItem>;

    fn get_version(&self, element_type: ElementType, id: ObjectId, version: Version) -> ApiResult<GeoItem>;

    /// Every revision of an element, in any order.
    fn get_history(&self, element_type: ElementType, id: ObjectId) -> ApiResult<Vec<GeoItem>>;

    /// A relation, its members and, recursively, all sub-relations' members,
    /// each at its current revision.
    fn get_full(&self, relation_id: ObjectId) -> ApiResult<Vec<GeoItem>>;
}
