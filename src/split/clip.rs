// src/split/clip.rs
// Single-plane mesh split: SAT classification and Sutherland-Hodgman clipping
// RELEVANT FILES: src/split/mod.rs, src/geometry/intersect.rs, src/geometry/mesh.rs

use std::collections::HashMap;

use glam::{DVec2, DVec3};

use crate::geometry::{triangle_intersects_aabb, Axis, BoundingBox3D, Face, Mesh, SubMeshBuilder};

use super::SplitResult;

/// Relative tolerance for "vertex on the plane", scaled by the piece size
const PLANE_EPSILON: f64 = 1e-9;

/// Two halves of a mesh cut by an axis-aligned plane
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// Faces on the lower-coordinate side
    pub left: Mesh,
    pub right: Mesh,
    /// Source triangles that straddled the plane and were clipped
    pub split_count: usize,
    /// Source triangles dropped because clipping produced non-finite geometry
    pub dropped: usize,
}

/// Which side of the plane a triangle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lower,
    Upper,
    Straddle,
}

/// Point where segment `a`-`b` meets the plane `x = value`, with its parameter along `a`→`b`
pub fn interpolate_x(a: DVec3, b: DVec3, value: f64) -> Option<(DVec3, f64)> {
    let t = (value - a.x) / (b.x - a.x);
    let p = DVec3::new(value, a.y + t * (b.y - a.y), a.z + t * (b.z - a.z));
    (t.is_finite() && p.is_finite()).then_some((p, t))
}

pub fn interpolate_y(a: DVec3, b: DVec3, value: f64) -> Option<(DVec3, f64)> {
    let t = (value - a.y) / (b.y - a.y);
    let p = DVec3::new(a.x + t * (b.x - a.x), value, a.z + t * (b.z - a.z));
    (t.is_finite() && p.is_finite()).then_some((p, t))
}

pub fn interpolate_z(a: DVec3, b: DVec3, value: f64) -> Option<(DVec3, f64)> {
    let t = (value - a.z) / (b.z - a.z);
    let p = DVec3::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y), value);
    (t.is_finite() && p.is_finite()).then_some((p, t))
}

fn interpolate(axis: Axis, a: DVec3, b: DVec3, value: f64) -> Option<(DVec3, f64)> {
    match axis {
        Axis::X => interpolate_x(a, b, value),
        Axis::Y => interpolate_y(a, b, value),
        Axis::Z => interpolate_z(a, b, value),
    }
}

/// Lower and upper half-boxes of `bounds` around `cut`, extended to reach the plane
fn half_boxes(bounds: &BoundingBox3D, axis: Axis, cut: f64) -> (BoundingBox3D, BoundingBox3D) {
    let i = axis.index();
    let mut lower = *bounds;
    let mut upper = *bounds;
    lower.min[i] = bounds.min[i].min(cut);
    lower.max[i] = cut;
    upper.min[i] = cut;
    upper.max[i] = bounds.max[i].max(cut);
    (lower, upper)
}

/// Classify a triangle against the plane.
///
/// Overlap with each closed half-box is decided by SAT; a triangle touching
/// both is settled by the signed distances of its vertices. A triangle lying
/// in the plane goes to the lower side, one merely touching it stays on the
/// side it comes from.
pub fn classify_triangle(
    tri: &[DVec3; 3],
    axis: Axis,
    cut: f64,
    lower: &BoundingBox3D,
    upper: &BoundingBox3D,
    eps: f64,
) -> Side {
    match (triangle_intersects_aabb(tri, lower), triangle_intersects_aabb(tri, upper)) {
        (true, false) => Side::Lower,
        (false, true) => Side::Upper,
        _ => {
            let i = axis.index();
            let d = tri.map(|p| p[i] - cut);
            if d.iter().all(|&v| v <= eps) {
                Side::Lower
            } else if d.iter().all(|&v| v >= -eps) {
                Side::Upper
            } else {
                Side::Straddle
            }
        }
    }
}

/// Polygon corner produced while clipping
#[derive(Debug, Clone, Copy)]
enum Corner {
    Source { v: u32, uv: Option<u32> },
    /// On edge (`lo`, `hi`) with `lo < hi`; `uv` holds the UV indices at `lo` and `hi`
    Seam { lo: u32, hi: u32, uv: Option<(u32, u32)> },
}

/// Seam points shared by both halves, computed once per source edge
struct SeamCache<'a> {
    mesh: &'a Mesh,
    axis: Axis,
    cut: f64,
    points: HashMap<(u32, u32), Option<(DVec3, f64)>>,
}

impl<'a> SeamCache<'a> {
    fn point(&mut self, lo: u32, hi: u32) -> Option<(DVec3, f64)> {
        let (mesh, axis, cut) = (self.mesh, self.axis, self.cut);
        *self.points.entry((lo, hi)).or_insert_with(|| {
            let a = mesh.vertices()[lo as usize];
            let b = mesh.vertices()[hi as usize];
            interpolate(axis, a, b, cut)
        })
    }

    fn position(&mut self, corner: Corner) -> Option<DVec3> {
        match corner {
            Corner::Source { v, .. } => Some(self.mesh.vertices()[v as usize]),
            Corner::Seam { lo, hi, .. } => self.point(lo, hi).map(|(p, _)| p),
        }
    }
}

/// Output half under construction
struct HalfBuilder<'a> {
    sub: SubMeshBuilder<'a>,
    seam_vertices: HashMap<(u32, u32), u32>,
    seam_uvs: HashMap<(u32, u32, u32, u32), u32>,
}

impl<'a> HalfBuilder<'a> {
    fn new(mesh: &'a Mesh) -> Self {
        Self {
            sub: SubMeshBuilder::new(mesh),
            seam_vertices: HashMap::new(),
            seam_uvs: HashMap::new(),
        }
    }

    fn vertex(&mut self, corner: Corner, seams: &mut SeamCache<'_>) -> Option<u32> {
        match corner {
            Corner::Source { v, .. } => Some(self.sub.map_vertex(v)),
            Corner::Seam { lo, hi, .. } => {
                if let Some(&i) = self.seam_vertices.get(&(lo, hi)) {
                    return Some(i);
                }
                let (p, _) = seams.point(lo, hi)?;
                let i = self.sub.push_vertex(p);
                self.seam_vertices.insert((lo, hi), i);
                Some(i)
            }
        }
    }

    fn uv(&mut self, corner: Corner, seams: &mut SeamCache<'_>) -> Option<u32> {
        match corner {
            Corner::Source { uv, .. } => uv.map(|t| self.sub.map_uv(t)),
            Corner::Seam { lo, hi, uv } => {
                let (uv_lo, uv_hi) = uv?;
                let key = (lo, hi, uv_lo, uv_hi);
                if let Some(&i) = self.seam_uvs.get(&key) {
                    return Some(i);
                }
                let (_, t) = seams.point(lo, hi)?;
                let uvs = self.sub.source().uvs();
                let a: DVec2 = uvs[uv_lo as usize];
                let b: DVec2 = uvs[uv_hi as usize];
                let i = self.sub.push_uv(a + (b - a) * t);
                self.seam_uvs.insert(key, i);
                Some(i)
            }
        }
    }

    /// Fan-triangulate a clipped polygon into this half
    fn push_polygon(&mut self, polygon: &[Corner], material: u32, textured: bool, seams: &mut SeamCache<'_>, min_area: f64) {
        for k in 1..polygon.len().saturating_sub(1) {
            let tri = [polygon[0], polygon[k], polygon[k + 1]];
            let (Some(a), Some(b), Some(c)) =
                (seams.position(tri[0]), seams.position(tri[1]), seams.position(tri[2]))
            else {
                continue;
            };
            if (b - a).cross(c - a).length() * 0.5 <= min_area {
                log::debug!("dropping zero-area clip fragment");
                continue;
            }
            let mut vertices = [0u32; 3];
            for (slot, corner) in vertices.iter_mut().zip(tri) {
                match self.vertex(corner, seams) {
                    Some(i) => *slot = i,
                    None => return,
                }
            }
            let uvs = if textured {
                let mut out = [0u32; 3];
                let mut complete = true;
                for (slot, corner) in out.iter_mut().zip(tri) {
                    match self.uv(corner, seams) {
                        Some(i) => *slot = i,
                        None => complete = false,
                    }
                }
                complete.then_some(out)
            } else {
                None
            };
            self.sub.push_face(Face::new(vertices, uvs, material));
        }
    }
}

/// Sutherland-Hodgman clip of one face against one side of the plane
fn clip_face(face: &Face, d: [f64; 3], eps: f64, keep_lower: bool) -> Vec<Corner> {
    let inside = |v: f64| if keep_lower { v <= eps } else { v >= -eps };
    let crosses = |a: f64, b: f64| (a < -eps && b > eps) || (a > eps && b < -eps);

    let mut out = Vec::with_capacity(4);
    for cur in 0..3 {
        let next = (cur + 1) % 3;
        if inside(d[cur]) {
            out.push(Corner::Source {
                v: face.vertices[cur],
                uv: face.uvs.map(|t| t[cur]),
            });
        }
        if crosses(d[cur], d[next]) {
            let (va, vb) = (face.vertices[cur], face.vertices[next]);
            let (lo_slot, hi_slot) = if va < vb { (cur, next) } else { (next, cur) };
            out.push(Corner::Seam {
                lo: face.vertices[lo_slot],
                hi: face.vertices[hi_slot],
                uv: face.uvs.map(|t| (t[lo_slot], t[hi_slot])),
            });
        }
    }
    out
}

/// Cut `mesh` by the plane `axis = cut` into two new meshes.
///
/// Triangles entirely on one side are copied; straddling triangles are
/// clipped and both halves share bit-identical seam vertices.
pub fn split_mesh(mesh: &Mesh, axis: Axis, cut: f64) -> SplitResult<SplitOutcome> {
    let bounds = mesh.bounds();
    let scale = if bounds.is_valid() { bounds.max_extent().max(1.0) } else { 1.0 };
    let eps = PLANE_EPSILON * scale;
    let min_area = f64::EPSILON * scale * scale;
    let (lower, upper) = half_boxes(&bounds, axis, cut);
    let i = axis.index();

    let mut left = HalfBuilder::new(mesh);
    let mut right = HalfBuilder::new(mesh);
    let mut seams = SeamCache {
        mesh,
        axis,
        cut,
        points: HashMap::new(),
    };
    let mut split_count = 0;
    let mut dropped = 0;

    for (index, face) in mesh.faces().iter().enumerate() {
        let tri = face.vertices.map(|v| mesh.vertices()[v as usize]);
        match classify_triangle(&tri, axis, cut, &lower, &upper, eps) {
            Side::Lower => left.sub.copy_face(face),
            Side::Upper => right.sub.copy_face(face),
            Side::Straddle => {
                let d = tri.map(|p| p[i] - cut);
                let below = clip_face(face, d, eps, true);
                let above = clip_face(face, d, eps, false);

                let finite = below
                    .iter()
                    .chain(above.iter())
                    .all(|&corner| seams.position(corner).is_some());
                if !finite {
                    log::warn!("dropping triangle {index}: non-finite intersection with plane {axis:?}={cut}");
                    dropped += 1;
                    continue;
                }

                let textured = face.uvs.is_some();
                left.push_polygon(&below, face.material, textured, &mut seams, min_area);
                right.push_polygon(&above, face.material, textured, &mut seams, min_area);
                split_count += 1;
            }
        }
    }

    Ok(SplitOutcome {
        left: left.sub.build()?,
        right: right.sub.build()?,
        split_count,
        dropped,
    })
}
