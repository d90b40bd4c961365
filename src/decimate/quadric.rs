use std::ops::{Add, AddAssign};

use glam::DVec3;

/// Symmetric 4x4 error quadric stored as its 10 upper-triangle terms
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymmetricMatrix {
    m: [f64; 10],
}

impl SymmetricMatrix {
    pub fn new(m: [f64; 10]) -> Self {
        Self { m }
    }

    /// Fundamental quadric of the plane `ax + by + cz + d = 0`
    pub fn plane(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            m: [
                a * a,
                a * b,
                a * c,
                a * d,
                b * b,
                b * c,
                b * d,
                c * c,
                c * d,
                d * d,
            ],
        }
    }

    pub fn from_normal(n: DVec3, point_on_plane: DVec3) -> Self {
        Self::plane(n.x, n.y, n.z, -n.dot(point_on_plane))
    }

    pub fn terms(&self) -> &[f64; 10] {
        &self.m
    }

    /// Determinant of the 3x3 minor selected by term indices
    #[allow(clippy::too_many_arguments)]
    pub fn det(
        &self,
        a11: usize,
        a12: usize,
        a13: usize,
        a21: usize,
        a22: usize,
        a23: usize,
        a31: usize,
        a32: usize,
        a33: usize,
    ) -> f64 {
        let m = &self.m;
        m[a11] * m[a22] * m[a33] + m[a13] * m[a21] * m[a32] + m[a12] * m[a23] * m[a31]
            - m[a13] * m[a22] * m[a31]
            - m[a11] * m[a23] * m[a32]
            - m[a12] * m[a21] * m[a33]
    }

    /// Quadric error vᵀQv of placing a vertex at `p`
    pub fn vertex_error(&self, p: DVec3) -> f64 {
        let q = &self.m;
        let (x, y, z) = (p.x, p.y, p.z);
        q[0] * x * x + 2.0 * q[1] * x * y + 2.0 * q[2] * x * z + 2.0 * q[3] * x + q[4] * y * y
            + 2.0 * q[5] * y * z
            + 2.0 * q[6] * y
            + q[7] * z * z
            + 2.0 * q[8] * z
            + q[9]
    }

    /// Position minimising the error, if the system is well conditioned
    pub fn optimal_point(&self) -> Option<DVec3> {
        let det = self.det(0, 1, 2, 1, 4, 5, 2, 5, 7);
        if det.abs() <= 1e-10 {
            return None;
        }
        let inv = 1.0 / det;
        let p = DVec3::new(
            -inv * self.det(1, 2, 3, 4, 5, 6, 5, 7, 8),
            inv * self.det(0, 2, 3, 1, 5, 6, 2, 7, 8),
            -inv * self.det(0, 1, 3, 1, 4, 6, 2, 5, 8),
        );
        p.is_finite().then_some(p)
    }
}

impl Add for SymmetricMatrix {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let mut m = self.m;
        for (a, b) in m.iter_mut().zip(rhs.m.iter()) {
            *a += b;
        }
        Self { m }
    }
}

impl AddAssign for SymmetricMatrix {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
