//! Identity types for Meridian elements

use crate::VersionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Numeric identifier of one element within one element-type namespace.
///
/// A point and a path may share the same numeric value; callers keep one
/// cache per namespace, so the identifier itself carries no type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Revision number of an element. Always strictly positive; version 1 is
/// the first revision of every element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Version(u64);

impl Version {
    /// The first revision of any element.
    pub const FIRST: Version = Version(1);

    /// Create a version, rejecting zero.
    pub fn new(value: u64) -> Result<Self, VersionError> {
        if value == 0 {
            Err(VersionError::Zero)
        } else {
            Ok(Self(value))
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The revision directly after this one.
    pub fn next(self) -> Version {
        Version(self.0.saturating_add(1))
    }

    /// Iterate every revision from [`Version::FIRST`] up to and including `self`.
    pub fn up_to(self) -> impl Iterator<Item = Version> {
        (1..=self.0).map(Version)
    }
}

impl TryFrom<u64> for Version {
    type Error = VersionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Version::new(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
