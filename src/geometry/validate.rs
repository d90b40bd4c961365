// src/geometry/validate.rs
// Mesh diagnostics run after loading: stats, degenerate faces, duplicates and topology issues
// RELEVANT FILES:src/geometry/mod.rs,src/geometry/weld.rs,src/pipeline/orchestrator.rs

use std::collections::BTreeMap;

use super::{BoundingBox3D, GeometryResult, Mesh, SubMeshBuilder};

/// Faces with less area than this are reported as degenerate.
pub const DEGENERATE_AREA_EPSILON: f64 = 1e-12;

/// Basic statistics collected for a mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshStats {
    pub vertex_count: usize,
    pub face_count: usize,
    pub textured_faces: usize,
    pub bounds: BoundingBox3D,
    pub surface_area: f64,
}

/// Issue categories detected by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshValidationIssue {
    DegenerateTriangle { face: usize },
    InvalidUv { face: usize },
    DuplicateVertex { first: usize, duplicate: usize },
    NonManifoldEdge { edge: (u32, u32), count: u32 },
}

/// Complete validation report.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshValidationReport {
    pub stats: MeshStats,
    pub issues: Vec<MeshValidationIssue>,
}

impl MeshValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn degenerate_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, MeshValidationIssue::DegenerateTriangle { .. }))
            .count()
    }
}

/// Run validation across topology, geometry, and statistics.
pub fn validate_mesh(mesh: &Mesh) -> MeshValidationReport {
    let stats = MeshStats {
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        textured_faces: mesh.faces().iter().filter(|f| f.uvs.is_some()).count(),
        bounds: mesh.bounds(),
        surface_area: mesh.surface_area(),
    };
    let mut issues = Vec::new();

    detect_degenerate_triangles(mesh, &mut issues);
    detect_invalid_uvs(mesh, &mut issues);
    detect_duplicate_vertices(mesh, &mut issues);
    detect_non_manifold_edges(mesh, &mut issues);

    MeshValidationReport { stats, issues }
}

/// Copy of `mesh` without degenerate or non-finite-UV faces, plus the number dropped
pub fn drop_degenerate_faces(mesh: &Mesh) -> GeometryResult<(Mesh, usize)> {
    let mut builder = SubMeshBuilder::new(mesh);
    let mut dropped = 0usize;
    for (i, face) in mesh.faces().iter().enumerate() {
        if is_degenerate(mesh, i) || has_invalid_uv(mesh, i) {
            dropped += 1;
            continue;
        }
        builder.copy_face(face);
    }
    Ok((builder.build()?, dropped))
}

fn is_degenerate(mesh: &Mesh, face: usize) -> bool {
    let [a, b, c] = mesh.faces()[face].vertices;
    a == b || b == c || a == c || mesh.triangle(face).is_degenerate(DEGENERATE_AREA_EPSILON)
}

fn has_invalid_uv(mesh: &Mesh, face: usize) -> bool {
    match mesh.faces()[face].uvs {
        Some(uvs) => uvs.iter().any(|&t| !mesh.uvs()[t as usize].is_finite()),
        None => false,
    }
}

fn detect_degenerate_triangles(mesh: &Mesh, issues: &mut Vec<MeshValidationIssue>) {
    for face in 0..mesh.face_count() {
        if is_degenerate(mesh, face) {
            issues.push(MeshValidationIssue::DegenerateTriangle { face });
        }
    }
}

fn detect_invalid_uvs(mesh: &Mesh, issues: &mut Vec<MeshValidationIssue>) {
    for face in 0..mesh.face_count() {
        if has_invalid_uv(mesh, face) {
            issues.push(MeshValidationIssue::InvalidUv { face });
        }
    }
}

fn detect_duplicate_vertices(mesh: &Mesh, issues: &mut Vec<MeshValidationIssue>) {
    let mut seen = BTreeMap::new();
    let eps = 1e-9;
    for (idx, pos) in mesh.vertices().iter().enumerate() {
        let key = (
            quantize_scalar(pos.x, eps),
            quantize_scalar(pos.y, eps),
            quantize_scalar(pos.z, eps),
        );
        if let Some(&first) = seen.get(&key) {
            issues.push(MeshValidationIssue::DuplicateVertex {
                first,
                duplicate: idx,
            });
        } else {
            seen.insert(key, idx);
        }
    }
}

fn detect_non_manifold_edges(mesh: &Mesh, issues: &mut Vec<MeshValidationIssue>) {
    let mut edge_counts: BTreeMap<(u32, u32), u32> = BTreeMap::new();

    for face in mesh.faces() {
        let [a, b, c] = face.vertices;
        if a == b || b == c || a == c {
            continue;
        }
        add_edge(&mut edge_counts, a, b);
        add_edge(&mut edge_counts, b, c);
        add_edge(&mut edge_counts, c, a);
    }

    for (edge, count) in edge_counts {
        if count > 2 {
            issues.push(MeshValidationIssue::NonManifoldEdge { edge, count });
        }
    }
}

fn add_edge(edge_counts: &mut BTreeMap<(u32, u32), u32>, a: u32, b: u32) {
    let key = if a < b { (a, b) } else { (b, a) };
    *edge_counts.entry(key).or_insert(0) += 1;
}

pub(crate) fn quantize_scalar(value: f64, eps: f64) -> i64 {
    (value / eps).round() as i64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{DVec2, DVec3};

    use super::*;
    use crate::geometry::Face;

    fn make_triangle_mesh(extra: Vec<DVec3>, faces: Vec<Face>) -> Mesh {
        let mut vertices = vec![DVec3::ZERO, DVec3::X, DVec3::Y];
        vertices.extend(extra);
        Mesh::new(vertices, Vec::new(), faces, Arc::from(Vec::new())).unwrap()
    }

    #[test]
    fn test_detects_clean_mesh() {
        let mesh = make_triangle_mesh(Vec::new(), vec![Face::new([0, 1, 2], None, 0)]);
        let report = validate_mesh(&mesh);
        assert!(report.is_clean());
        assert_eq!(report.stats.vertex_count, 3);
        assert_eq!(report.stats.face_count, 1);
    }

    #[test]
    fn test_detects_duplicate_vertices() {
        let mesh = make_triangle_mesh(vec![DVec3::ZERO], vec![Face::new([0, 1, 2], None, 0)]);
        let report = validate_mesh(&mesh);
        assert!(report
            .issues
            .iter()
            .any(|issue| matches!(issue, MeshValidationIssue::DuplicateVertex { .. })));
    }

    #[test]
    fn test_detects_non_manifold_edges() {
        let mesh = make_triangle_mesh(
            vec![DVec3::new(1.0, 1.0, 0.0), DVec3::new(0.0, -1.0, 0.0)],
            vec![
                Face::new([0, 1, 2], None, 0),
                Face::new([2, 1, 3], None, 0),
                Face::new([1, 2, 4], None, 0),
            ],
        );
        let report = validate_mesh(&mesh);
        assert!(report
            .issues
            .iter()
            .any(|issue| matches!(issue, MeshValidationIssue::NonManifoldEdge { .. })));
    }

    #[test]
    fn test_drop_degenerate_faces() {
        let mesh = make_triangle_mesh(
            vec![DVec3::X * 2.0],
            vec![Face::new([0, 1, 2], None, 0), Face::new([0, 1, 3], None, 0), Face::new([1, 1, 2], None, 0)],
        );
        let report = validate_mesh(&mesh);
        assert_eq!(report.degenerate_count(), 2);
        let (clean, dropped) = drop_degenerate_faces(&mesh).unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(clean.face_count(), 1);
    }

    #[test]
    fn test_flags_non_finite_uv() {
        let mesh = Mesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            vec![DVec2::ZERO, DVec2::new(f64::NAN, 0.0), DVec2::Y],
            vec![Face::new([0, 1, 2], Some([0, 1, 2]), 0)],
            Arc::from(Vec::new()),
        )
        .unwrap();
        let report = validate_mesh(&mesh);
        assert!(report.issues.contains(&MeshValidationIssue::InvalidUv { face: 0 }));
    }
}
