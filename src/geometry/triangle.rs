//! Standalone triangle value type

use glam::{DVec2, DVec3};

use super::BoundingBox3D;

/// Three positions plus optional UVs; copied out of a mesh for intersection math
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: DVec3,
    pub b: DVec3,
    pub c: DVec3,
    pub uvs: Option<[DVec2; 3]>,
    pub material: u32,
}

impl Triangle {
    pub fn new(a: DVec3, b: DVec3, c: DVec3) -> Self {
        Self {
            a,
            b,
            c,
            uvs: None,
            material: 0,
        }
    }

    pub fn vertices(&self) -> [DVec3; 3] {
        [self.a, self.b, self.c]
    }

    /// Unnormalized face normal (length = 2 * area)
    pub fn cross(&self) -> DVec3 {
        (self.b - self.a).cross(self.c - self.a)
    }

    pub fn normal(&self) -> DVec3 {
        self.cross().normalize_or_zero()
    }

    pub fn area(&self) -> f64 {
        self.cross().length() * 0.5
    }

    pub fn centroid(&self) -> DVec3 {
        (self.a + self.b + self.c) / 3.0
    }

    pub fn bounds(&self) -> BoundingBox3D {
        BoundingBox3D::from_points(self.vertices())
    }

    /// Zero area within `eps` or a non-finite corner
    pub fn is_degenerate(&self, eps: f64) -> bool {
        !(self.a.is_finite() && self.b.is_finite() && self.c.is_finite()) || self.area() <= eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_and_normal() {
        let t = Triangle::new(DVec3::ZERO, DVec3::X, DVec3::Y);
        assert!((t.area() - 0.5).abs() < 1e-12);
        assert_eq!(t.normal(), DVec3::Z);
        assert!(!t.is_degenerate(1e-12));
    }

    #[test]
    fn test_collinear_is_degenerate() {
        let t = Triangle::new(DVec3::ZERO, DVec3::X, DVec3::X * 2.0);
        assert!(t.is_degenerate(1e-12));
        assert_eq!(t.normal(), DVec3::ZERO);
    }
}
