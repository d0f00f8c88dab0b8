//! Capability traits shared by everything the caches store.

use crate::{ApiResult, ElementType, GeoItem, ObjectId, Timestamp, Version};
use serde::{de::DeserializeOwned, Serialize};

/// Anything with an identifier. The unit a plain item cache stores.
pub trait Item {
    fn id(&self) -> ObjectId;
}

/// An item that may additionally carry a revision number.
///
/// Two versioned objects are the same object when their identifiers
/// match, and the same revision when identifier and version both match.
pub trait Versioned: Item {
    /// The revision, or `None` when the object carries no version.
    fn version(&self) -> Option<Version>;
}

/// One of the three concrete element variants.
///
/// Implemented by [`crate::Point`], [`crate::Path`] and [`crate::Relation`],
/// this lets typed caches move elements in and out of the [`GeoItem`] sum
/// type returned by API clients.
pub trait Element: Versioned + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    /// When this revision was created upstream.
    fn timestamp(&self) -> Timestamp;

    fn into_item(self) -> GeoItem;

    /// Unwrap the matching variant, or report what came back instead.
    fn from_item(item: GeoItem) -> ApiResult<Self>;
}
