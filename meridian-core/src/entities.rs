//! Core element structures

use crate::{ApiError, ApiResult, Element, ElementType, Item, ObjectId, Timestamp, Version, Versioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Free-form key/value tags attached to an element.
pub type Tags = BTreeMap<String, String>;

/// Point - a single located element.
///
/// Equality and hashing use identifier and version only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: ObjectId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: Tags,
}

/// Path - an ordered sequence of points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub id: ObjectId,
    pub version: Version,
    pub timestamp: Timestamp,
    /// Member points in path order. The same point may appear twice
    /// (closed rings start and end on one point).
    pub point_ids: Vec<ObjectId>,
    #[serde(default)]
    pub tags: Tags,
}

/// Relation - a composite referencing other elements by identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: ObjectId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub members: Vec<RelationMember>,
    #[serde(default)]
    pub tags: Tags,
}

/// One membership entry of a relation.
///
/// Relations may list the same element several times, even with the same
/// role; duplicates are kept as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationMember {
    /// The relation this member belongs to.
    pub relation_id: ObjectId,
    pub element_type: ElementType,
    pub reference_id: ObjectId,
    /// Arbitrary role text, possibly empty.
    pub role: String,
}

impl Relation {
    /// Create a relation with no members.
    pub fn new(id: ObjectId, version: Version, timestamp: Timestamp) -> Self {
        Self {
            id,
            version,
            timestamp,
            members: Vec::new(),
            tags: Tags::new(),
        }
    }

    /// Append a member, stamping this relation as its owner.
    pub fn push_member(&mut self, element_type: ElementType, reference_id: ObjectId, role: impl Into<String>) {
        self.members.push(RelationMember {
            relation_id: self.id,
            element_type,
            reference_id,
            role: role.into(),
        });
    }

    /// Builder form of [`Relation::push_member`].
    pub fn with_member(mut self, element_type: ElementType, reference_id: ObjectId, role: impl Into<String>) -> Self {
        self.push_member(element_type, reference_id, role);
        self
    }

    /// Members of one element type, in membership order.
    pub fn members_of(&self, element_type: ElementType) -> impl Iterator<Item = &RelationMember> {
        self.members.iter().filter(move |m| m.element_type == element_type)
    }
}

/// Polymorphic element returned by API clients and collected by the
/// relation resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeoItem {
    Point(Point),
    Path(Path),
    Relation(Relation),
}

impl GeoItem {
    pub fn element_type(&self) -> ElementType {
        match self {
            GeoItem::Point(_) => ElementType::Point,
            GeoItem::Path(_) => ElementType::Path,
            GeoItem::Relation(_) => ElementType::Relation,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            GeoItem::Point(p) => p.timestamp,
            GeoItem::Path(p) => p.timestamp,
            GeoItem::Relation(r) => r.timestamp,
        }
    }

    pub fn revision(&self) -> Version {
        match self {
            GeoItem::Point(p) => p.version,
            GeoItem::Path(p) => p.version,
            GeoItem::Relation(r) => r.version,
        }
    }

    pub fn as_point(&self) -> Option<&Point> {
        match self {
            GeoItem::Point(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            GeoItem::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            GeoItem::Relation(r) => Some(r),
            _ => None,
        }
    }
}

impl Item for GeoItem {
    fn id(&self) -> ObjectId {
        match self {
            GeoItem::Point(p) => p.id,
            GeoItem::Path(p) => p.id,
            GeoItem::Relation(r) => r.id,
        }
    }
}

impl Versioned for GeoItem {
    fn version(&self) -> Option<Version> {
        Some(self.revision())
    }
}

// ============================================================================
// PER-VARIANT IMPLEMENTATIONS
// ============================================================================

macro_rules! element_impls {
    ($ty:ident, $variant:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id && self.version == other.version
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
                self.version.hash(state);
            }
        }

        impl Item for $ty {
            fn id(&self) -> ObjectId {
                self.id
            }
        }

        impl Versioned for $ty {
            fn version(&self) -> Option<Version> {
                Some(self.version)
            }
        }

        impl Element for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn timestamp(&self) -> Timestamp {
                self.timestamp
            }

            fn into_item(self) -> GeoItem {
                GeoItem::$variant(self)
            }

            fn from_item(item: GeoItem) -> ApiResult<Self> {
                match item {
                    GeoItem::$variant(inner) => Ok(inner),
                    other => Err(ApiError::UnexpectedType {
                        id: other.id(),
                        expected: ElementType::$variant,
                        got: other.element_type(),
                    }),
                }
            }
        }

        impl From<$ty> for GeoItem {
            fn from(value: $ty) -> Self {
                GeoItem::$variant(value)
            }
        }
    };
}

element_impls!(Point, Point);
element_impls!(Path, Path);
element_impls!(Relation, Relation);
