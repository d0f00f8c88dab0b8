//! Line segments produced by relation resolution.

use crate::Point;
use serde::{Deserialize, Serialize};

/// An unordered pair of points forming one edge of resolved geometry.
///
/// Endpoints are stored in canonical (identifier, version) order, so
/// `Segment::new(a, b) == Segment::new(b, a)`. A standalone point is a
/// degenerate segment whose endpoints are the same point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    first: Point,
    second: Point,
}

impl Segment {
    pub fn new(a: Point, b: Point) -> Self {
        if (b.id, b.version) < (a.id, a.version) {
            Self { first: b, second: a }
        } else {
            Self { first: a, second: b }
        }
    }

    /// The degenerate segment for a standalone point.
    pub fn point(p: Point) -> Self {
        Self {
            first: p.clone(),
            second: p,
        }
    }

    pub fn endpoints(&self) -> (&Point, &Point) {
        (&self.first, &self.second)
    }

    pub fn is_degenerate(&self) -> bool {
        self.first == self.second
    }
}
