// src/geometry/mod.rs
// Geometry module hub: immutable indexed meshes, boxes, triangles and intersection math
// RELEVANT FILES:src/geometry/mesh.rs,src/geometry/bounds.rs,src/geometry/intersect.rs,src/split/mod.rs

//! Core geometry types shared by every pipeline stage.

mod bounds;
mod intersect;
mod mesh;
mod triangle;
mod validate;
mod weld;

pub use bounds::BoundingBox3D;
pub use intersect::{triangle_intersects_aabb, AabbHalfExtents};
pub use mesh::{Face, Material, Mesh, MeshBuilder, SubMeshBuilder, TextureRef, TextureSource};
pub use triangle::Triangle;
pub use validate::{
    drop_degenerate_faces, validate_mesh, MeshStats, MeshValidationIssue, MeshValidationReport, DEGENERATE_AREA_EPSILON,
};
pub use weld::{weld_vertices, WeldResult};

use serde::{Deserialize, Serialize};

/// Coordinate axis used for split planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index (0, 1, 2)
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Axis following this one in X → Y → Z → X order
    pub fn next(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::Z,
            Axis::Z => Axis::X,
        }
    }
}

/// Error type returned by geometry helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryError {
    message: String,
}

impl GeometryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GeometryError {}

/// Convenience alias for geometry results.
pub type GeometryResult<T> = Result<T, GeometryError>;
