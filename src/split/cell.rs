//! Cell addressing for the spatial trees (D-X-Y-Z keys)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{Axis, BoundingBox3D};

/// Integer address of a cell: depth plus per-axis index at that depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct CellKey {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl CellKey {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(depth: u32, x: u32, y: u32, z: u32) -> Self {
        Self { depth, x, y, z }
    }

    /// Child key for `octant`; bit 0 selects upper X, bit 1 upper Y, bit 2 upper Z
    pub fn child(&self, octant: u8) -> Self {
        Self {
            depth: self.depth + 1,
            x: (self.x << 1) | (octant & 1) as u32,
            y: (self.y << 1) | ((octant >> 1) & 1) as u32,
            z: (self.z << 1) | ((octant >> 2) & 1) as u32,
        }
    }

    /// Child after a single binary cut along `axis`
    pub fn child_along(&self, axis: Axis, upper: bool) -> Self {
        let bit = upper as u32;
        let mut key = Self {
            depth: self.depth + 1,
            ..*self
        };
        match axis {
            Axis::X => key.x = (self.x << 1) | bit,
            Axis::Y => key.y = (self.y << 1) | bit,
            Axis::Z => key.z = (self.z << 1) | bit,
        }
        key
    }

    /// Parent in an octree/quadtree addressing scheme
    pub fn parent(&self) -> Option<Self> {
        if self.depth == 0 {
            return None;
        }
        Some(Self {
            depth: self.depth - 1,
            x: self.x >> 1,
            y: self.y >> 1,
            z: self.z >> 1,
        })
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('-');
        let key = Self {
            depth: parts.next()?.parse().ok()?,
            x: parts.next()?.parse().ok()?,
            y: parts.next()?.parse().ok()?,
            z: parts.next()?.parse().ok()?,
        };
        parts.next().is_none().then_some(key)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }
}

/// Cell box of a partition node and the cut that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitTreeNode {
    /// Cell box the node covers
    pub bounds: BoundingBox3D,
    pub depth: u32,
    /// Axis of the last cut that produced this cell; `None` for the root
    pub axis: Option<Axis>,
}

impl SplitTreeNode {
    pub fn root(bounds: BoundingBox3D) -> Self {
        Self {
            bounds,
            depth: 0,
            axis: None,
        }
    }

    /// The two halves of this node cut along `axis` at `cut`
    pub fn split_at(&self, axis: Axis, cut: f64) -> (Self, Self) {
        let (lower, upper) = self.bounds.split_at(axis, cut);
        let child = |bounds| Self {
            bounds,
            depth: self.depth + 1,
            axis: Some(axis),
        };
        (child(lower), child(upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_child_and_parent() {
        let key = CellKey::new(1, 1, 0, 0);
        let child = key.child(0b011);
        assert_eq!(child, CellKey::new(2, 3, 1, 0));
        assert_eq!(child.parent(), Some(key));
        assert_eq!(CellKey::root().parent(), None);
    }

    #[test]
    fn test_child_along_touches_one_axis() {
        let key = CellKey::new(2, 1, 1, 0).child_along(Axis::Y, true);
        assert_eq!(key, CellKey::new(3, 1, 3, 0));
    }

    #[test]
    fn test_node_split_records_axis() {
        let root = SplitTreeNode::root(BoundingBox3D::new(DVec3::ZERO, DVec3::splat(4.0)));
        assert_eq!(root.axis, None);
        let (lower, upper) = root.split_at(Axis::Y, 1.0);
        assert_eq!(lower.axis, Some(Axis::Y));
        assert_eq!(upper.depth, 1);
        assert_eq!(lower.bounds.max.y, 1.0);
        assert_eq!(upper.bounds.min.y, 1.0);
    }

    #[test]
    fn test_display_and_parse() {
        let key = CellKey::new(3, 5, 2, 0);
        assert_eq!(key.to_string(), "3-5-2-0");
        assert_eq!(CellKey::parse("3-5-2-0"), Some(key));
        assert_eq!(CellKey::parse("3-5-2"), None);
        assert_eq!(CellKey::parse("3-5-2-0-1"), None);
    }

    #[test]
    fn test_ordering_is_depth_first() {
        let mut keys = vec![CellKey::new(1, 1, 0, 0), CellKey::new(0, 0, 0, 0), CellKey::new(1, 0, 1, 0)];
        keys.sort();
        assert_eq!(keys[0], CellKey::root());
        assert_eq!(keys[1], CellKey::new(1, 0, 1, 0));
    }
}
