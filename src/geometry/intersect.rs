//! Exact triangle/box overlap via the separating axis theorem
//!
//! Thirteen candidate axes are tested: the three box face normals, the
//! triangle normal, and the nine cross products of triangle edges with the
//! box axes. Boxes are closed, so a triangle touching a face overlaps it.

use glam::DVec3;

use super::BoundingBox3D;

/// Box in center/half-extent form, the shape SAT works with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AabbHalfExtents {
    pub center: DVec3,
    pub half: DVec3,
}

impl From<&BoundingBox3D> for AabbHalfExtents {
    fn from(bounds: &BoundingBox3D) -> Self {
        Self {
            center: bounds.center(),
            half: bounds.half_size(),
        }
    }
}

/// True when the triangle and the closed box share at least one point
pub fn triangle_intersects_aabb(tri: &[DVec3; 3], bounds: &BoundingBox3D) -> bool {
    let AabbHalfExtents { center, half } = AabbHalfExtents::from(bounds);
    let v = [tri[0] - center, tri[1] - center, tri[2] - center];

    // Box face normals
    for i in 0..3 {
        let lo = v[0][i].min(v[1][i]).min(v[2][i]);
        let hi = v[0][i].max(v[1][i]).max(v[2][i]);
        if lo > half[i] || hi < -half[i] {
            return false;
        }
    }

    let edges = [v[1] - v[0], v[2] - v[1], v[0] - v[2]];

    // Edge x box-axis cross products
    for edge in &edges {
        for axis in [DVec3::X, DVec3::Y, DVec3::Z] {
            let a = axis.cross(*edge);
            if a.length_squared() <= f64::EPSILON * f64::EPSILON {
                continue;
            }
            if separated_on(a, &v, half) {
                return false;
            }
        }
    }

    // Triangle plane
    let n = edges[0].cross(edges[1]);
    if n.length_squared() > 0.0 {
        let d = n.dot(v[0]);
        let r = half.x * n.x.abs() + half.y * n.y.abs() + half.z * n.z.abs();
        if d.abs() > r {
            return false;
        }
    }

    true
}

fn separated_on(axis: DVec3, v: &[DVec3; 3], half: DVec3) -> bool {
    let p0 = axis.dot(v[0]);
    let p1 = axis.dot(v[1]);
    let p2 = axis.dot(v[2]);
    let r = half.x * axis.x.abs() + half.y * axis.y.abs() + half.z * axis.z.abs();
    p0.min(p1).min(p2) > r || p0.max(p1).max(p2) < -r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> BoundingBox3D {
        BoundingBox3D::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn test_triangle_inside() {
        let tri = [DVec3::splat(0.2), DVec3::new(0.8, 0.2, 0.5), DVec3::new(0.5, 0.8, 0.5)];
        assert!(triangle_intersects_aabb(&tri, &unit()));
    }

    #[test]
    fn test_triangle_far_away() {
        let tri = [DVec3::splat(5.0), DVec3::new(6.0, 5.0, 5.0), DVec3::new(5.0, 6.0, 5.0)];
        assert!(!triangle_intersects_aabb(&tri, &unit()));
    }

    #[test]
    fn test_large_triangle_through_box() {
        // No vertex inside, but the face cuts the box
        let tri = [
            DVec3::new(-10.0, -10.0, 0.5),
            DVec3::new(10.0, -10.0, 0.5),
            DVec3::new(0.0, 10.0, 0.5),
        ];
        assert!(triangle_intersects_aabb(&tri, &unit()));
    }

    #[test]
    fn test_plane_separates_diagonal_triangle() {
        // Per-axis ranges overlap the box; the box lies below the plane x+y+z=3.2
        let tri = [
            DVec3::new(2.2, 0.5, 0.5),
            DVec3::new(0.5, 2.2, 0.5),
            DVec3::new(0.5, 0.5, 2.2),
        ];
        assert!(!triangle_intersects_aabb(&tri, &unit()));
    }

    #[test]
    fn test_touching_face_counts() {
        let tri = [DVec3::new(1.0, 0.2, 0.2), DVec3::new(2.0, 0.2, 0.2), DVec3::new(1.0, 0.8, 0.8)];
        assert!(triangle_intersects_aabb(&tri, &unit()));
    }
}
