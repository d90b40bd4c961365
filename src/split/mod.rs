// src/split/mod.rs
// Spatial subdivision of meshes into tile cells
// RELEVANT FILES: src/split/clip.rs, src/split/tree.rs, src/split/cell.rs, src/geometry/intersect.rs

//! Spatial splitter.
//!
//! [`split_mesh`] cuts one mesh by one axis-aligned plane and returns two new
//! meshes; [`Splitter`] applies it recursively (quadtree, octree or kd-tree)
//! and collects the non-empty leaves.

pub mod cell;
pub mod clip;
pub mod tree;

pub use cell::{CellKey, SplitTreeNode};
pub use clip::{classify_triangle, interpolate_x, interpolate_y, interpolate_z, split_mesh, Side, SplitOutcome};
pub use tree::{LeafCell, SplitOutput, SplitPoint, SplitPointFn, SplitSettings, Splitter};

use thiserror::Error;

use crate::geometry::GeometryError;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("split cancelled")]
    Cancelled,

    #[error("invalid split result: {0}")]
    Geometry(#[from] GeometryError),
}

pub type SplitResult<T> = Result<T, SplitError>;
