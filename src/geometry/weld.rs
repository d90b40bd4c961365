// src/geometry/weld.rs
// Position welding ahead of decimation
// Exists so that UV seams and per-primitive vertex copies do not read as open borders
// RELEVANT FILES:src/geometry/mod.rs,src/geometry/validate.rs,src/decimate/mod.rs

use std::collections::BTreeMap;

use super::validate::quantize_scalar;
use super::{Face, GeometryResult, Mesh, MeshBuilder};

/// Result from a weld operation including remapping information.
#[derive(Debug, Clone)]
pub struct WeldResult {
    pub mesh: Mesh,
    /// Old vertex index → new vertex index
    pub remap: Vec<u32>,
    /// Vertices merged into an earlier one
    pub collapsed: usize,
    /// Faces removed because two corners welded together
    pub dropped_faces: usize,
}

/// Merge vertices whose positions quantize to the same `epsilon` grid cell.
///
/// UV indices are untouched since UVs are indexed per corner.
pub fn weld_vertices(mesh: &Mesh, epsilon: f64) -> GeometryResult<WeldResult> {
    let vertex_count = mesh.vertex_count();
    let mut key_map: BTreeMap<(i64, i64, i64), u32> = BTreeMap::new();
    let mut builder = MeshBuilder::with_capacity(mesh.materials_arc(), vertex_count, mesh.face_count());
    let mut remap = vec![0u32; vertex_count];

    for (idx, p) in mesh.vertices().iter().enumerate() {
        let key = (
            quantize_scalar(p.x, epsilon),
            quantize_scalar(p.y, epsilon),
            quantize_scalar(p.z, epsilon),
        );
        remap[idx] = *key_map.entry(key).or_insert_with(|| builder.push_vertex(*p));
    }

    for uv in mesh.uvs() {
        builder.push_uv(*uv);
    }

    let mut dropped_faces = 0usize;
    for face in mesh.faces() {
        let [a, b, c] = face.vertices.map(|v| remap[v as usize]);
        if a == b || b == c || a == c {
            dropped_faces += 1;
            continue;
        }
        builder.push_face(Face::new([a, b, c], face.uvs, face.material));
    }

    let collapsed = vertex_count.saturating_sub(builder.vertex_count());
    Ok(WeldResult {
        mesh: builder.build()?,
        remap,
        collapsed,
        dropped_faces,
    })
}
