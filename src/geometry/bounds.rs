//! Axis-aligned bounding boxes in double precision

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::Axis;

/// Axis-aligned box with inclusive min/max corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox3D {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for BoundingBox3D {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox3D {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any point expands into
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    pub fn from_points<I: IntoIterator<Item = DVec3>>(points: I) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.expand_point(p);
        }
        bounds
    }

    /// False for the inverted empty box
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn expand_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn half_size(&self) -> DVec3 {
        self.size() * 0.5
    }

    pub fn extent(&self, axis: Axis) -> f64 {
        self.max[axis.index()] - self.min[axis.index()]
    }

    pub fn max_extent(&self) -> f64 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    /// Split at the midpoint of `axis` into lower and upper halves
    pub fn split(&self, axis: Axis) -> (Self, Self) {
        self.split_at(axis, self.center()[axis.index()])
    }

    /// Split at an arbitrary plane; `value` is clamped into the box
    pub fn split_at(&self, axis: Axis, value: f64) -> (Self, Self) {
        let i = axis.index();
        let cut = value.clamp(self.min[i], self.max[i]);
        let mut lower = *self;
        let mut upper = *self;
        lower.max[i] = cut;
        upper.min[i] = cut;
        (lower, upper)
    }

    /// Bounds of child `octant`; bit 0 selects +X, bit 1 +Y, bit 2 +Z
    pub fn child_bounds(&self, octant: u8) -> Self {
        let center = self.center();
        let min = DVec3::new(
            if octant & 1 == 0 { self.min.x } else { center.x },
            if octant & 2 == 0 { self.min.y } else { center.y },
            if octant & 4 == 0 { self.min.z } else { center.z },
        );
        let max = DVec3::new(
            if octant & 1 == 0 { center.x } else { self.max.x },
            if octant & 2 == 0 { center.y } else { self.max.y },
            if octant & 4 == 0 { center.z } else { self.max.z },
        );
        Self { min, max }
    }

    pub fn contains_point(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn contains_box(&self, other: &Self) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow every side by `extent * ratio / 2`
    pub fn grow(&self, ratio: f64) -> Self {
        let pad = self.size() * (ratio * 0.5);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Eight corners, octant order
    pub fn corners(&self) -> [DVec3; 8] {
        let mut out = [DVec3::ZERO; 8];
        for (i, corner) in out.iter_mut().enumerate() {
            *corner = DVec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
        }
        out
    }

    /// JSON form persisted with slice records
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "min": [self.min.x, self.min.y, self.min.z],
            "max": [self.max.x, self.max.y, self.max.z],
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> BoundingBox3D {
        BoundingBox3D::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn test_split_halves() {
        let (lo, hi) = unit().split(Axis::Y);
        assert_eq!(lo.max.y, 0.5);
        assert_eq!(hi.min.y, 0.5);
        assert_eq!(lo.max.x, 1.0);
        assert_eq!(lo.union(&hi), unit());
    }

    #[test]
    fn test_split_at_clamps() {
        let (lo, hi) = unit().split_at(Axis::X, 3.0);
        assert_eq!(lo, unit());
        assert_eq!(hi.min.x, 1.0);
    }

    #[test]
    fn test_empty_and_expand() {
        let mut b = BoundingBox3D::empty();
        assert!(!b.is_valid());
        b.expand_point(DVec3::new(1.0, -2.0, 3.0));
        b.expand_point(DVec3::new(-1.0, 2.0, 0.0));
        assert!(b.is_valid());
        assert_eq!(b.center(), DVec3::new(0.0, 0.0, 1.5));
        assert_eq!(b.max_extent(), 4.0);
    }

    #[test]
    fn test_child_bounds_tile_parent() {
        let parent = unit();
        let mut total = 0.0;
        for octant in 0..8u8 {
            let child = parent.child_bounds(octant);
            assert!(parent.contains_box(&child));
            let s = child.size();
            total += s.x * s.y * s.z;
        }
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_grow() {
        let grown = unit().grow(0.2);
        assert!((grown.min.x + 0.1).abs() < 1e-12);
        assert!((grown.max.z - 1.1).abs() < 1e-12);
    }
}
