//! LOD chain generation

use crossbeam_channel::Sender;
use rayon::prelude::*;

use crate::config::{DecimationConfig, SlicingConfig};
use crate::geometry::{weld_vertices, GeometryResult, Mesh};

use super::simplify::{DecimationReport, MeshDecimator};
use super::DecimationStatus;

/// Ratios per level plus the decimation options
#[derive(Debug, Clone, PartialEq)]
pub struct LodSettings {
    /// Triangle ratio of each level relative to the source; level 0 is ignored
    pub ratios: Vec<f64>,
    pub decimation: DecimationConfig,
}

impl LodSettings {
    pub fn from_config(config: &SlicingConfig) -> Self {
        Self {
            ratios: (0..config.lod_levels).map(|level| config.lod_ratio(level)).collect(),
            decimation: config.decimation.clone(),
        }
    }

    pub fn levels(&self) -> u32 {
        self.ratios.len() as u32
    }

    /// Triangle target of `level` for a mesh of `face_count` triangles
    pub fn target_for(&self, level: u32, face_count: usize) -> usize {
        let ratio = self.ratios.get(level as usize).copied().unwrap_or(1.0);
        ((face_count as f64 * ratio).floor() as usize).clamp(1.min(face_count), face_count)
    }
}

/// One level of detail; 0 is the finest
#[derive(Debug, Clone)]
pub struct LodLevel {
    pub level: u32,
    pub target_triangles: usize,
    pub mesh: Mesh,
    /// `None` for level 0 and when decimation is disabled
    pub report: Option<DecimationReport>,
}

/// Build every LOD of `mesh` in parallel.
///
/// Level 0 is the input itself; coarser levels are decimated independently
/// from a welded copy of the input.
pub fn generate_lods(
    mesh: &Mesh,
    settings: &LodSettings,
    status: Option<Sender<DecimationStatus>>,
) -> GeometryResult<Vec<LodLevel>> {
    let face_count = mesh.face_count();
    let levels = settings.levels().max(1);
    let decimation = &settings.decimation;

    let welded;
    let source = if decimation.enabled && decimation.weld_epsilon > 0.0 && levels > 1 {
        let result = weld_vertices(mesh, decimation.weld_epsilon)?;
        if result.collapsed > 0 {
            log::debug!(
                "welded {} coincident vertices before decimation ({} faces dropped)",
                result.collapsed,
                result.dropped_faces
            );
        }
        welded = result.mesh;
        &welded
    } else {
        mesh
    };

    let coarser = (1..levels)
        .into_par_iter()
        .map(|level| {
            let target = settings.target_for(level, face_count);
            if !decimation.enabled {
                return Ok(LodLevel {
                    level,
                    target_triangles: face_count,
                    mesh: mesh.clone(),
                    report: None,
                });
            }

            let mut decimator = MeshDecimator::new(decimation);
            if let Some(tx) = &status {
                decimator = decimator.with_status(tx.clone(), level);
            }
            decimator.initialize(source);
            let report = decimator.decimate(target);
            let out = decimator.to_mesh()?;
            log::info!(
                "LOD {}: {} -> {} triangles (target {}, {} iterations)",
                level,
                face_count,
                out.face_count(),
                target,
                report.iterations
            );
            Ok(LodLevel {
                level,
                target_triangles: target,
                mesh: out,
                report: Some(report),
            })
        })
        .collect::<GeometryResult<Vec<_>>>()?;

    let mut lods = Vec::with_capacity(levels as usize);
    lods.push(LodLevel {
        level: 0,
        target_triangles: face_count,
        mesh: mesh.clone(),
        report: None,
    });
    lods.extend(coarser);
    Ok(lods)
}
