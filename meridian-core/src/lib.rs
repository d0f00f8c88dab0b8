//! Meridian Core - Element Types
//!
//! Identifier and version value types, the three element variants and the
//! sum type over them, collaborator traits, configuration, clocks and the
//! error taxonomy. All other Meridian crates depend on this.

pub mod api;
pub mod clock;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod segment;
pub mod traits;

pub use api::{ApiClient, Upstream};
pub use clock::{age_of, cutoff_before, Clock, ManualClock, SystemClock};
pub use config::{CacheLimits, HistoryLimits, SweepConfig};
pub use entities::{GeoItem, Path, Point, Relation, RelationMember, Tags};
pub use enums::{ElementType, ElementTypeParseError};
pub use error::{
    ApiError, ApiResult, ConfigError, MeridianError, MeridianResult, StorageError, VersionError,
};
pub use identity::{ObjectId, Timestamp, Version};
pub use segment::Segment;
pub use traits::{Element, Item, Versioned};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
