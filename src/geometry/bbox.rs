//! Axis-aligned bounding boxes in 3-D.

use crate::geometry::spherical::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// A box containing nothing; including any point makes it non-empty.
    pub const fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut b = Self::empty();
        for p in points {
            b.include(*p);
        }
        b
    }

    pub fn include(&mut self, p: Vec3) {
        for d in 0..3 {
            self.min[d] = self.min[d].min(p[d]);
            self.max[d] = self.max[d].max(p[d]);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.min[d] > self.max[d])
    }

    /// Overlap test with both boxes grown by `slack` on every side.
    pub fn overlaps(&self, other: &BoundingBox, slack: f64) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..3).all(|d| {
            self.min[d] - slack <= other.max[d] + slack && other.min[d] - slack <= self.max[d] + slack
        })
    }

    pub fn contains(&self, p: Vec3, slack: f64) -> bool {
        !self.is_empty() && (0..3).all(|d| p[d] >= self.min[d] - slack && p[d] <= self.max[d] + slack)
    }

    /// Flat `[min, max]` layout used on the wire.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        ]
    }

    pub fn from_array(a: [f64; 6]) -> Self {
        Self {
            min: [a[0], a[1], a[2]],
            max: [a[3], a[4], a[5]],
        }
    }
}
