// src/decimate/mod.rs
// Multi-resolution mesh simplification with quadric error metrics
// RELEVANT FILES: src/decimate/simplify.rs, src/decimate/lod.rs, src/pipeline/orchestrator.rs

pub mod lod;
pub mod quadric;
pub mod simplify;

pub use lod::{generate_lods, LodLevel, LodSettings};
pub use quadric::SymmetricMatrix;
pub use simplify::{DecimationReport, MeshDecimator};

/// Per-iteration progress of one decimation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimationStatus {
    /// LOD level being produced
    pub level: u32,
    pub iteration: usize,
    pub original_triangles: usize,
    pub current_triangles: usize,
    pub target_triangles: usize,
}
