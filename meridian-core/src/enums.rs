//! Enum types for Meridian elements

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type discriminator used by relation members and API lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementType {
    /// A single located point (a "node" upstream)
    Point,
    /// An ordered list of points (a "way" upstream)
    Path,
    /// A composite of other elements with roles
    Relation,
}

impl ElementType {
    pub const ALL: [ElementType; 3] = [ElementType::Point, ElementType::Path, ElementType::Relation];

    /// Name used on the wire by the upstream API.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ElementType::Point => "node",
            ElementType::Path => "way",
            ElementType::Relation => "relation",
        }
    }

    /// Parse either the wire name or the Meridian name.
    pub fn from_wire_str(s: &str) -> Result<Self, ElementTypeParseError> {
        match s.to_lowercase().as_str() {
            "node" | "point" => Ok(ElementType::Point),
            "way" | "path" => Ok(ElementType::Path),
            "relation" => Ok(ElementType::Relation),
            _ => Err(ElementTypeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ElementType::Point => "Point",
            ElementType::Path => "Path",
            ElementType::Relation => "Relation",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ElementType {
    type Err = ElementTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire_str(s)
    }
}

/// Error when parsing an invalid element type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementTypeParseError(pub String);

impl fmt::Display for ElementTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid element type: {}", self.0)
    }
}

impl std::error::Error for ElementTypeParseError {}
