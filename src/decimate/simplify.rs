//! Quadric error metric edge-collapse decimation.
//!
//! The collapse loop follows the "fast quadric" scheme: per-vertex error
//! quadrics are accumulated from the incident face planes, every edge gets
//! the cost of collapsing it to its best position, and each iteration
//! collapses the edges cheaper than a threshold that grows with the
//! iteration count. Triangles touched by a collapse are marked dirty and
//! skipped until the next iteration, which keeps the order close to
//! ascending error without maintaining a heap.

use std::sync::Arc;

use crossbeam_channel::Sender;
use glam::{DVec2, DVec3};

use crate::config::DecimationConfig;
use crate::geometry::{Face, GeometryResult, Material, Mesh, MeshBuilder};

use super::quadric::SymmetricMatrix;
use super::DecimationStatus;

/// Threshold used by lossless decimation; only near-zero-cost collapses pass
const LOSSLESS_THRESHOLD: f64 = 1.0e-3;
/// Triangles whose neighbour directions are this parallel are considered degenerate
const PARALLEL_LIMIT: f64 = 0.999;
/// Minimum cosine between a face normal before and after a collapse
const FLIP_LIMIT: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct Vertex {
    p: DVec3,
    q: SymmetricMatrix,
    tstart: usize,
    tcount: usize,
    border: bool,
}

#[derive(Debug, Clone, Copy)]
struct Tri {
    v: [usize; 3],
    uv: Option<[u32; 3]>,
    material: u32,
    err: [f64; 4],
    n: DVec3,
    deleted: bool,
    dirty: bool,
}

/// Vertex → triangle corner back-reference
#[derive(Debug, Clone, Copy, Default)]
struct Ref {
    tid: usize,
    tvertex: usize,
}

/// Summary of a decimation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecimationReport {
    pub original_triangles: usize,
    pub final_triangles: usize,
    pub iterations: usize,
    /// Collapses made past the regular threshold schedule
    pub relaxed_collapses: usize,
    /// Both the triangle target and the vertex cap hold
    pub reached_target: bool,
}

#[derive(Debug, Clone, Copy)]
struct Constraints {
    check_borders: bool,
    preserve_borders: bool,
}

/// Counts a collapse pass stops at
#[derive(Debug, Clone, Copy)]
struct Goal {
    triangles: usize,
    /// 0 = unlimited
    vertices: usize,
}

/// Stateful decimator over a copy of a mesh.
///
/// `initialize` loads a mesh, `decimate`/`decimate_lossless` reduce it, and
/// `to_mesh` produces a new immutable mesh from the current state.
#[derive(Debug)]
pub struct MeshDecimator {
    config: DecimationConfig,
    vertices: Vec<Vertex>,
    triangles: Vec<Tri>,
    refs: Vec<Ref>,
    uvs: Vec<DVec2>,
    materials: Arc<[Material]>,
    live_triangles: usize,
    /// Upper bound on referenced vertices, refreshed per pass
    live_vertices: usize,
    original_triangles: usize,
    level: u32,
    status: Option<Sender<DecimationStatus>>,
}

impl MeshDecimator {
    pub fn new(config: &DecimationConfig) -> Self {
        Self {
            config: config.clone(),
            vertices: Vec::new(),
            triangles: Vec::new(),
            refs: Vec::new(),
            uvs: Vec::new(),
            materials: Arc::from(Vec::new()),
            live_triangles: 0,
            live_vertices: 0,
            original_triangles: 0,
            level: 0,
            status: None,
        }
    }

    /// Report per-iteration progress on `sender`
    pub fn with_status(mut self, sender: Sender<DecimationStatus>, level: u32) -> Self {
        self.status = Some(sender);
        self.level = level;
        self
    }

    /// Load `mesh`, replacing any previous state
    pub fn initialize(&mut self, mesh: &Mesh) {
        self.vertices = mesh
            .vertices()
            .iter()
            .map(|&p| Vertex {
                p,
                q: SymmetricMatrix::default(),
                tstart: 0,
                tcount: 0,
                border: false,
            })
            .collect();
        self.triangles = mesh
            .faces()
            .iter()
            .map(|f| Tri {
                v: f.vertices.map(|v| v as usize),
                uv: f.uvs,
                material: f.material,
                err: [0.0; 4],
                n: DVec3::ZERO,
                deleted: false,
                dirty: false,
            })
            .collect();
        self.uvs = mesh.uvs().to_vec();
        self.materials = mesh.materials_arc();
        self.refs.clear();
        self.live_triangles = self.triangles.len();
        self.live_vertices = self.vertex_count();
        self.original_triangles = self.triangles.len();
    }

    pub fn triangle_count(&self) -> usize {
        self.live_triangles
    }

    /// Number of vertices still referenced by a live triangle
    pub fn vertex_count(&self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for t in self.triangles.iter().filter(|t| !t.deleted) {
            for &v in &t.v {
                used[v] = true;
            }
        }
        used.into_iter().filter(|&u| u).count()
    }

    fn goal(&self, target: usize) -> Goal {
        Goal {
            triangles: target,
            vertices: self.config.max_vertex_count,
        }
    }

    fn goal_met(&self, goal: Goal) -> bool {
        self.live_triangles <= goal.triangles && (goal.vertices == 0 || self.live_vertices <= goal.vertices)
    }

    /// Reduce to at most `target` triangles and `max_vertex_count` vertices.
    ///
    /// With a non-zero `target_error`, every collapse within the budget is
    /// made first, even below `target`; the count bounds are then enforced
    /// the same way as without a budget. Borders stay fixed when
    /// `preserve_borders` is set, so a target that needs them moved is
    /// reported as not reached.
    pub fn decimate(&mut self, target: usize) -> DecimationReport {
        let constraints = Constraints {
            check_borders: true,
            preserve_borders: self.config.preserve_borders,
        };
        let goal = self.goal(target);
        let mut report = DecimationReport {
            original_triangles: self.original_triangles,
            ..Default::default()
        };

        self.compact();
        self.update_mesh(true);
        self.live_vertices = self.vertex_count();

        let budget = self.config.target_error;
        if budget > 0.0 {
            report.iterations = self.budget_passes(budget, constraints, target);
        }

        let mut iteration = 0;
        while iteration < self.config.max_iterations && !self.goal_met(goal) {
            if iteration > 0 && iteration % 5 == 0 {
                self.update_mesh(false);
            }
            self.clear_dirty();
            let threshold = 1e-9 * ((iteration + 3) as f64).powf(self.config.aggressiveness);
            self.collapse_pass(threshold, constraints, goal);
            self.send_status(report.iterations + iteration, target);
            iteration += 1;
        }
        report.iterations += iteration;

        if !self.goal_met(goal) {
            report.relaxed_collapses = self.relaxed_passes(goal);
        }

        report.final_triangles = self.live_triangles;
        self.live_vertices = self.vertex_count();
        report.reached_target = self.goal_met(goal);
        if !report.reached_target {
            log::warn!(
                "decimation stopped at {} triangles / {} vertices, short of {} / {}",
                self.live_triangles,
                self.live_vertices,
                target,
                self.config.max_vertex_count
            );
        }
        report
    }

    /// Collapse only edges whose cost is effectively zero, until none remain
    pub fn decimate_lossless(&mut self) -> DecimationReport {
        let constraints = Constraints {
            check_borders: true,
            preserve_borders: self.config.preserve_borders,
        };
        let mut report = DecimationReport {
            original_triangles: self.original_triangles,
            ..Default::default()
        };

        self.compact();
        let mut iteration = 0;
        loop {
            self.update_mesh(iteration == 0);
            self.clear_dirty();
            let collapsed = self.collapse_pass(LOSSLESS_THRESHOLD, constraints, self.goal(0));
            self.send_status(iteration, 0);
            iteration += 1;
            if collapsed == 0 {
                break;
            }
        }

        report.iterations = iteration;
        report.final_triangles = self.live_triangles;
        report.reached_target = true;
        report
    }

    /// Build a new mesh from the live triangles
    pub fn to_mesh(&self) -> GeometryResult<Mesh> {
        const UNMAPPED: u32 = u32::MAX;
        let mut builder = MeshBuilder::with_capacity(self.materials.clone(), self.vertices.len(), self.live_triangles);
        let mut vertex_map = vec![UNMAPPED; self.vertices.len()];
        let mut uv_map = vec![UNMAPPED; self.uvs.len()];

        for t in self.triangles.iter().filter(|t| !t.deleted) {
            let mut vertices = [0u32; 3];
            for (slot, &v) in vertices.iter_mut().zip(t.v.iter()) {
                if vertex_map[v] == UNMAPPED {
                    vertex_map[v] = builder.push_vertex(self.vertices[v].p);
                }
                *slot = vertex_map[v];
            }
            let uvs = t.uv.map(|corner| {
                let mut mapped = [0u32; 3];
                for (slot, &i) in mapped.iter_mut().zip(corner.iter()) {
                    let i = i as usize;
                    if uv_map[i] == UNMAPPED {
                        uv_map[i] = builder.push_uv(self.uvs[i]);
                    }
                    *slot = uv_map[i];
                }
                mapped
            });
            builder.push_face(Face::new(vertices, uvs, t.material));
        }
        builder.build()
    }

    fn send_status(&self, iteration: usize, target: usize) {
        if let Some(tx) = &self.status {
            // full or disconnected receivers are not our problem
            let _ = tx.try_send(DecimationStatus {
                level: self.level,
                iteration,
                original_triangles: self.original_triangles,
                current_triangles: self.live_triangles,
                target_triangles: target,
            });
        }
    }

    fn compact(&mut self) {
        self.triangles.retain(|t| !t.deleted);
    }

    fn clear_dirty(&mut self) {
        for t in &mut self.triangles {
            t.dirty = false;
        }
    }

    fn cheapest_collapse(&self) -> f64 {
        self.triangles
            .iter()
            .filter(|t| !t.deleted)
            .map(|t| t.err[3])
            .fold(f64::INFINITY, f64::min)
    }

    /// Collapse everything cheaper than `budget`; returns the iterations used
    fn budget_passes(&mut self, budget: f64, constraints: Constraints, target: usize) -> usize {
        let unbounded = Goal {
            triangles: 0,
            vertices: 0,
        };
        let mut iteration = 0;
        while iteration < self.config.max_iterations {
            if iteration > 0 && iteration % 5 == 0 {
                self.update_mesh(false);
            }
            self.clear_dirty();
            let cheapest = self.cheapest_collapse();
            if cheapest > budget {
                log::debug!("error budget {budget} exhausted at iteration {iteration} (cheapest {cheapest})");
                break;
            }
            let threshold = (1e-9 * ((iteration + 3) as f64).powf(self.config.aggressiveness)).min(budget);
            let collapsed = self.collapse_pass(threshold, constraints, unbounded);
            self.send_status(iteration, target);
            iteration += 1;
            if collapsed == 0 && threshold >= budget {
                break;
            }
        }
        iteration
    }

    /// Passes with an unbounded threshold, run when the regular loop stalls short of `goal`.
    ///
    /// Mixed border/interior edges may collapse here unless borders are preserved.
    fn relaxed_passes(&mut self, goal: Goal) -> usize {
        let constraints = Constraints {
            check_borders: self.config.preserve_borders,
            preserve_borders: self.config.preserve_borders,
        };
        let mut total = 0;
        for _ in 0..self.config.max_iterations.max(1) {
            if self.goal_met(goal) {
                break;
            }
            self.update_mesh(false);
            self.clear_dirty();
            let collapsed = self.collapse_pass(f64::INFINITY, constraints, goal);
            if collapsed == 0 {
                break;
            }
            total += collapsed;
        }
        if total > 0 {
            log::debug!("relaxed decimation made {total} extra collapses");
        }
        total
    }

    /// One sweep over all triangles; returns the number of collapses
    fn collapse_pass(&mut self, threshold: f64, constraints: Constraints, goal: Goal) -> usize {
        let mut collapses = 0;
        let mut deleted0: Vec<bool> = Vec::new();
        let mut deleted1: Vec<bool> = Vec::new();
        self.live_vertices = self.vertex_count();

        for tid in 0..self.triangles.len() {
            if self.goal_met(goal) {
                break;
            }
            let t = self.triangles[tid];
            if t.err[3] > threshold || t.deleted || t.dirty {
                continue;
            }

            for j in 0..3 {
                if t.err[j] > threshold {
                    continue;
                }
                let i0 = t.v[j];
                let i1 = t.v[(j + 1) % 3];
                let (b0, b1) = (self.vertices[i0].border, self.vertices[i1].border);
                if constraints.check_borders && b0 != b1 {
                    continue;
                }
                if constraints.preserve_borders && (b0 || b1) {
                    continue;
                }

                let (_, p) = self.calculate_error(i0, i1);
                if !p.is_finite() {
                    continue;
                }

                deleted0.clear();
                deleted0.resize(self.vertices[i0].tcount, false);
                deleted1.clear();
                deleted1.resize(self.vertices[i1].tcount, false);
                if self.flipped(p, i1, i0, &mut deleted0) || self.flipped(p, i0, i1, &mut deleted1) {
                    continue;
                }

                self.vertices[i0].p = p;
                let q1 = self.vertices[i1].q;
                self.vertices[i0].q += q1;

                let tstart = self.refs.len();
                self.update_triangles(i0, i0, &deleted0);
                self.update_triangles(i0, i1, &deleted1);
                let tcount = self.refs.len() - tstart;

                if tcount <= self.vertices[i0].tcount {
                    let dst = self.vertices[i0].tstart;
                    self.refs.copy_within(tstart..tstart + tcount, dst);
                    self.refs.truncate(tstart);
                } else {
                    self.vertices[i0].tstart = tstart;
                }
                self.vertices[i0].tcount = tcount;
                // i1 is no longer referenced
                self.live_vertices -= 1;
                collapses += 1;
                break;
            }
        }
        collapses
    }

    /// Would moving `v0` to `p` flip or degenerate one of its faces?
    ///
    /// Marks the faces shared with `i1` in `deleted`; those disappear with the collapse.
    fn flipped(&self, p: DVec3, i1: usize, v0: usize, deleted: &mut [bool]) -> bool {
        let vertex = self.vertices[v0];
        for k in 0..vertex.tcount {
            let r = self.refs[vertex.tstart + k];
            let t = &self.triangles[r.tid];
            if t.deleted {
                continue;
            }
            let s = r.tvertex;
            let id1 = t.v[(s + 1) % 3];
            let id2 = t.v[(s + 2) % 3];
            if id1 == i1 || id2 == i1 {
                deleted[k] = true;
                continue;
            }
            let d1 = (self.vertices[id1].p - p).normalize_or_zero();
            let d2 = (self.vertices[id2].p - p).normalize_or_zero();
            if d1.dot(d2).abs() > PARALLEL_LIMIT {
                return true;
            }
            let n = d1.cross(d2).normalize_or_zero();
            deleted[k] = false;
            if n.dot(t.n) < FLIP_LIMIT {
                return true;
            }
        }
        false
    }

    /// Re-point the faces of `v` at `i0`, deleting the ones marked in `deleted`
    fn update_triangles(&mut self, i0: usize, v: usize, deleted: &[bool]) {
        let Vertex { tstart, tcount, .. } = self.vertices[v];
        for k in 0..tcount {
            let r = self.refs[tstart + k];
            if self.triangles[r.tid].deleted {
                continue;
            }
            if deleted[k] {
                self.triangles[r.tid].deleted = true;
                self.live_triangles -= 1;
                continue;
            }

            self.triangles[r.tid].v[r.tvertex] = i0;
            let tv = self.triangles[r.tid].v;
            let err = self.edge_errors(tv);
            let [a, b, c] = tv.map(|i| self.vertices[i].p);
            let n = (b - a).cross(c - a).normalize_or_zero();

            let t = &mut self.triangles[r.tid];
            t.dirty = true;
            t.err = err;
            if n != DVec3::ZERO {
                t.n = n;
            }
            self.refs.push(r);
        }
    }

    fn edge_errors(&self, v: [usize; 3]) -> [f64; 4] {
        let mut err = [0.0; 4];
        for j in 0..3 {
            err[j] = self.calculate_error(v[j], v[(j + 1) % 3]).0;
        }
        err[3] = err[0].min(err[1]).min(err[2]);
        err
    }

    /// Cost and target position of collapsing edge (`id_v1`, `id_v2`)
    fn calculate_error(&self, id_v1: usize, id_v2: usize) -> (f64, DVec3) {
        let v1 = &self.vertices[id_v1];
        let v2 = &self.vertices[id_v2];
        let q = v1.q + v2.q;
        let border = v1.border && v2.border;

        let mid = (v1.p + v2.p) * 0.5;
        let mut best = (q.vertex_error(v1.p), v1.p);
        for candidate in [v2.p, mid] {
            let e = q.vertex_error(candidate);
            if e < best.0 {
                best = (e, candidate);
            }
        }

        if !border {
            // reject far-flung solutions of nearly singular systems
            let reach = (v1.p - v2.p).length() * 2.0;
            if let Some(p) = q.optimal_point().filter(|p| (*p - mid).length() <= reach) {
                let e = q.vertex_error(p);
                if e <= best.0 {
                    best = (e, p);
                }
            }
        }
        best
    }

    /// Rebuild vertex→triangle references; on `initial`, also borders, quadrics and edge errors
    fn update_mesh(&mut self, initial: bool) {
        self.compact();

        for v in &mut self.vertices {
            v.tstart = 0;
            v.tcount = 0;
        }
        for t in &self.triangles {
            for &v in &t.v {
                self.vertices[v].tcount += 1;
            }
        }
        let mut tstart = 0;
        for v in &mut self.vertices {
            v.tstart = tstart;
            tstart += v.tcount;
            v.tcount = 0;
        }
        self.refs.clear();
        self.refs.resize(self.triangles.len() * 3, Ref::default());
        for (tid, t) in self.triangles.iter().enumerate() {
            for (tvertex, &v) in t.v.iter().enumerate() {
                let vertex = &mut self.vertices[v];
                self.refs[vertex.tstart + vertex.tcount] = Ref { tid, tvertex };
                vertex.tcount += 1;
            }
        }

        if !initial {
            return;
        }

        // border vertices: a neighbour shared by exactly one incident face
        for v in &mut self.vertices {
            v.border = false;
        }
        let mut vcount: Vec<usize> = Vec::new();
        let mut vids: Vec<usize> = Vec::new();
        for i in 0..self.vertices.len() {
            vcount.clear();
            vids.clear();
            let Vertex { tstart, tcount, .. } = self.vertices[i];
            for k in 0..tcount {
                let t = &self.triangles[self.refs[tstart + k].tid];
                for &id in &t.v {
                    match vids.iter().position(|&x| x == id) {
                        Some(ofs) => vcount[ofs] += 1,
                        None => {
                            vids.push(id);
                            vcount.push(1);
                        }
                    }
                }
            }
            for (ofs, &count) in vcount.iter().enumerate() {
                if count == 1 {
                    self.vertices[vids[ofs]].border = true;
                }
            }
        }

        for v in &mut self.vertices {
            v.q = SymmetricMatrix::default();
        }
        for t in &mut self.triangles {
            let [a, b, c] = t.v.map(|i| self.vertices[i].p);
            let n = (b - a).cross(c - a).normalize_or_zero();
            t.n = n;
            let plane = SymmetricMatrix::from_normal(n, a);
            for &v in &t.v {
                self.vertices[v].q += plane;
            }
        }
        for tid in 0..self.triangles.len() {
            let err = self.edge_errors(self.triangles[tid].v);
            self.triangles[tid].err = err;
        }
    }
}
