// src/split/tree.rs
// Recursive quadtree / octree / kd-tree subdivision into leaf cells
// RELEVANT FILES: src/split/clip.rs, src/split/cell.rs, src/pipeline/orchestrator.rs

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::{SlicingConfig, SplitPointStrategy, SplitStrategy};
use crate::geometry::{Axis, BoundingBox3D, Mesh};
use crate::pipeline::CancellationToken;

use super::cell::{CellKey, SplitTreeNode};
use super::clip::split_mesh;
use super::{SplitError, SplitResult};

/// Caller-supplied cut position for a piece, cell box and axis
pub type SplitPointFn = dyn Fn(&Mesh, &BoundingBox3D, Axis) -> f64 + Send + Sync;

/// Where the fixed trees place their cut planes
#[derive(Clone)]
pub enum SplitPoint {
    /// Halve the cell box
    BoundsCenter,
    /// Centre of the piece's own bounds
    AbsoluteCenter,
    /// Mean vertex position of the piece
    VertexBarycenter,
    Custom(Arc<SplitPointFn>),
}

impl fmt::Debug for SplitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitPoint::BoundsCenter => write!(f, "BoundsCenter"),
            SplitPoint::AbsoluteCenter => write!(f, "AbsoluteCenter"),
            SplitPoint::VertexBarycenter => write!(f, "VertexBarycenter"),
            SplitPoint::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl From<SplitPointStrategy> for SplitPoint {
    fn from(strategy: SplitPointStrategy) -> Self {
        match strategy {
            SplitPointStrategy::BoundsCenter => SplitPoint::BoundsCenter,
            SplitPointStrategy::AbsoluteCenter => SplitPoint::AbsoluteCenter,
            SplitPointStrategy::VertexBarycenter => SplitPoint::VertexBarycenter,
        }
    }
}

impl SplitPoint {
    pub fn cut(&self, mesh: &Mesh, cell: &BoundingBox3D, axis: Axis) -> f64 {
        let i = axis.index();
        match self {
            SplitPoint::BoundsCenter => cell.center()[i],
            SplitPoint::AbsoluteCenter => mesh.bounds().center()[i],
            SplitPoint::VertexBarycenter => {
                let vertices = mesh.vertices();
                if vertices.is_empty() {
                    return cell.center()[i];
                }
                vertices.iter().map(|p| p[i]).sum::<f64>() / vertices.len() as f64
            }
            SplitPoint::Custom(f) => f(mesh, cell, axis),
        }
    }
}

/// Subdivision parameters for one LOD
#[derive(Debug, Clone)]
pub struct SplitSettings {
    pub strategy: SplitStrategy,
    pub split_point: SplitPoint,
    /// Levels of the fixed trees
    pub depth: u32,
    /// KD-tree stops once the cell's longest side is at or under this
    pub tile_size: f64,
    pub max_split_depth: u32,
    pub min_triangles: usize,
    pub parallel_threshold: usize,
}

impl SplitSettings {
    /// Settings for LOD `level`: coarser levels split less
    pub fn for_lod(config: &SlicingConfig, level: u32) -> Self {
        Self {
            strategy: config.split_strategy,
            split_point: config.split_point.into(),
            depth: config.split_depth_for_lod(level),
            tile_size: config.tile_size_for_lod(level),
            max_split_depth: config.max_split_depth,
            min_triangles: config.min_triangles_per_cell,
            parallel_threshold: config.parallel_split_threshold,
        }
    }
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self::for_lod(&SlicingConfig::default(), 0)
    }
}

/// A finished cell
#[derive(Debug, Clone)]
pub struct LeafCell {
    pub key: CellKey,
    pub node: SplitTreeNode,
    /// Tight bounds of the cell's geometry
    pub bounds: BoundingBox3D,
    pub mesh: Mesh,
}

/// Leaves plus clipping statistics
#[derive(Debug, Clone, Default)]
pub struct SplitOutput {
    /// Non-empty leaves ordered by key
    pub leaves: Vec<LeafCell>,
    pub split_count: usize,
    pub dropped: usize,
}

impl SplitOutput {
    pub fn triangle_count(&self) -> usize {
        self.leaves.iter().map(|l| l.mesh.face_count()).sum()
    }
}

struct Collector {
    leaves: Mutex<Vec<LeafCell>>,
    split_count: AtomicUsize,
    dropped: AtomicUsize,
}

impl Collector {
    fn push(&self, key: CellKey, node: SplitTreeNode, mesh: Mesh) {
        if mesh.is_empty() {
            return;
        }
        let leaf = LeafCell {
            key,
            node,
            bounds: mesh.bounds(),
            mesh,
        };
        self.leaves.lock().push(leaf);
    }

    fn record(&self, split_count: usize, dropped: usize) {
        self.split_count.fetch_add(split_count, Ordering::Relaxed);
        self.dropped.fetch_add(dropped, Ordering::Relaxed);
    }
}

/// Recursive mesh subdivision
#[derive(Debug, Clone)]
pub struct Splitter {
    settings: SplitSettings,
    cancel: CancellationToken,
}

impl Splitter {
    pub fn new(settings: SplitSettings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }

    pub fn settings(&self) -> &SplitSettings {
        &self.settings
    }

    /// Subdivide `mesh` into leaf cells
    pub fn split(&self, mesh: Mesh) -> SplitResult<SplitOutput> {
        let cell = mesh.bounds();
        self.split_within(mesh, cell)
    }

    /// Subdivide `mesh` starting from the root cell `root`.
    ///
    /// Splitting every LOD from the same root keeps their cell boxes nested.
    pub fn split_within(&self, mesh: Mesh, root: BoundingBox3D) -> SplitResult<SplitOutput> {
        let collector = Collector {
            leaves: Mutex::new(Vec::new()),
            split_count: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        };
        if mesh.is_empty() || !mesh.bounds().is_valid() {
            return Ok(SplitOutput::default());
        }
        let cell = if root.is_valid() && root.contains_box(&mesh.bounds()) {
            root
        } else {
            root.union(&mesh.bounds())
        };

        match self.settings.strategy {
            SplitStrategy::Quadtree | SplitStrategy::Octree => {
                self.recurse_fixed(mesh, SplitTreeNode::root(cell), CellKey::root(), self.settings.depth, &collector)?
            }
            SplitStrategy::KdTree => self.recurse_kd(mesh, SplitTreeNode::root(cell), CellKey::root(), &collector)?,
        }

        let mut leaves = collector.leaves.into_inner();
        leaves.sort_by_key(|leaf| leaf.key);
        let output = SplitOutput {
            leaves,
            split_count: collector.split_count.into_inner(),
            dropped: collector.dropped.into_inner(),
        };
        log::debug!(
            "split into {} leaves ({} triangles clipped, {} dropped)",
            output.leaves.len(),
            output.split_count,
            output.dropped
        );
        Ok(output)
    }

    fn check_cancel(&self) -> SplitResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        Ok(())
    }

    fn axes(&self) -> &'static [Axis] {
        match self.settings.strategy {
            SplitStrategy::Octree => &[Axis::X, Axis::Y, Axis::Z],
            _ => &[Axis::X, Axis::Y],
        }
    }

    /// One quadtree/octree level: cut along each axis in turn, then recurse into the children
    fn recurse_fixed(
        &self,
        mesh: Mesh,
        node: SplitTreeNode,
        key: CellKey,
        levels_left: u32,
        collector: &Collector,
    ) -> SplitResult<()> {
        self.check_cancel()?;
        if mesh.is_empty() {
            return Ok(());
        }
        if levels_left == 0
            || mesh.face_count() <= self.settings.min_triangles
            || key.depth >= self.settings.max_split_depth
        {
            collector.push(key, node, mesh);
            return Ok(());
        }

        let parallel = mesh.face_count() > self.settings.parallel_threshold;
        let mut pieces: Vec<(u8, Mesh, BoundingBox3D)> = vec![(0, mesh, node.bounds)];
        for (bit, &axis) in self.axes().iter().enumerate() {
            let mut next = Vec::with_capacity(pieces.len() * 2);
            for (octant, piece, piece_cell) in pieces {
                let cut = self.settings.split_point.cut(&piece, &piece_cell, axis);
                let outcome = split_mesh(&piece, axis, cut)?;
                collector.record(outcome.split_count, outcome.dropped);
                let (lower, upper) = piece_cell.split_at(axis, cut);
                next.push((octant, outcome.left, lower));
                next.push((octant | (1 << bit), outcome.right, upper));
            }
            pieces = next;
        }

        let children: Vec<_> = pieces.into_iter().filter(|(_, m, _)| !m.is_empty()).collect();
        let last_axis = self.axes().last().copied();
        let descend = |(octant, child, child_cell): (u8, Mesh, BoundingBox3D)| {
            let child_node = SplitTreeNode {
                bounds: child_cell,
                depth: node.depth + 1,
                axis: last_axis,
            };
            self.recurse_fixed(child, child_node, key.child(octant), levels_left - 1, collector)
        };
        if parallel {
            children.into_par_iter().try_for_each(descend)
        } else {
            children.into_iter().try_for_each(descend)
        }
    }

    /// Next axis after `previous` whose extent still exceeds the tile size
    fn kd_axis(&self, cell: &BoundingBox3D, previous: Option<Axis>) -> Option<Axis> {
        let mut axis = previous.map_or(Axis::X, Axis::next);
        for _ in 0..3 {
            if cell.extent(axis) > self.settings.tile_size {
                return Some(axis);
            }
            axis = axis.next();
        }
        None
    }

    /// One kd-tree cut, along the axis after the one that produced `node`
    fn recurse_kd(&self, mesh: Mesh, node: SplitTreeNode, key: CellKey, collector: &Collector) -> SplitResult<()> {
        self.check_cancel()?;
        if mesh.is_empty() {
            return Ok(());
        }
        let axis = match self.kd_axis(&node.bounds, node.axis) {
            Some(axis)
                if key.depth < self.settings.max_split_depth && mesh.face_count() > self.settings.min_triangles =>
            {
                axis
            }
            _ => {
                collector.push(key, node, mesh);
                return Ok(());
            }
        };

        let cut = node.bounds.center()[axis.index()];
        let outcome = split_mesh(&mesh, axis, cut)?;
        collector.record(outcome.split_count, outcome.dropped);
        let (lower, upper) = node.split_at(axis, cut);
        let parallel = mesh.face_count() > self.settings.parallel_threshold;
        drop(mesh);

        let left = || self.recurse_kd(outcome.left, lower, key.child_along(axis, false), collector);
        let right = || self.recurse_kd(outcome.right, upper, key.child_along(axis, true), collector);
        if parallel {
            let (l, r) = rayon::join(left, right);
            l.and(r)
        } else {
            left()?;
            right()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Face;
    use glam::DVec3;

    /// `n x n` unit quads on z = 0 starting at `origin`
    fn plate(n: u32, origin: DVec3) -> Mesh {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.push(origin + DVec3::new(x as f64, y as f64, 0.0));
            }
        }
        let idx = |x: u32, y: u32| y * (n + 1) + x;
        let mut faces = Vec::new();
        for y in 0..n {
            for x in 0..n {
                faces.push(Face::new([idx(x, y), idx(x + 1, y), idx(x + 1, y + 1)], None, 0));
                faces.push(Face::new([idx(x, y), idx(x + 1, y + 1), idx(x, y + 1)], None, 0));
            }
        }
        Mesh::new(vertices, Vec::new(), faces, Arc::from(Vec::new())).unwrap()
    }

    fn settings(strategy: SplitStrategy, depth: u32) -> SplitSettings {
        SplitSettings {
            strategy,
            split_point: SplitPoint::BoundsCenter,
            depth,
            tile_size: 1.0,
            max_split_depth: 8,
            min_triangles: 0,
            parallel_threshold: 16,
        }
    }

    fn total_area(output: &SplitOutput) -> f64 {
        output.leaves.iter().map(|l| l.mesh.surface_area()).sum()
    }

    #[test]
    fn test_quadtree_conserves_area() {
        let mesh = plate(7, DVec3::ZERO);
        let splitter = Splitter::new(settings(SplitStrategy::Quadtree, 2), CancellationToken::new());
        let output = splitter.split(mesh.clone()).unwrap();
        assert_eq!(output.leaves.len(), 16);
        assert!(output.split_count > 0);
        assert!((total_area(&output) - mesh.surface_area()).abs() < 1e-9);
        for leaf in &output.leaves {
            assert_eq!(leaf.key.depth, 2);
            assert_eq!(leaf.node.depth, leaf.key.depth);
            assert_eq!(leaf.node.axis, Some(Axis::Y));
            assert!(leaf.node.bounds.grow(1e-9).contains_box(&leaf.bounds));
        }
    }

    #[test]
    fn test_leaves_are_sorted_and_unique() {
        let splitter = Splitter::new(settings(SplitStrategy::Quadtree, 3), CancellationToken::new());
        let output = splitter.split(plate(16, DVec3::ZERO)).unwrap();
        let keys: Vec<CellKey> = output.leaves.iter().map(|l| l.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 64);
    }

    #[test]
    fn test_resplitting_a_leaf_at_depth_zero_is_identity() {
        let splitter = Splitter::new(settings(SplitStrategy::Quadtree, 1), CancellationToken::new());
        let output = splitter.split(plate(4, DVec3::ZERO)).unwrap();
        let leaf = &output.leaves[0];
        let again = Splitter::new(settings(SplitStrategy::Quadtree, 0), CancellationToken::new())
            .split(leaf.mesh.clone())
            .unwrap();
        assert_eq!(again.leaves.len(), 1);
        assert_eq!(again.leaves[0].mesh.face_count(), leaf.mesh.face_count());
        assert_eq!(again.leaves[0].bounds, leaf.bounds);
    }

    #[test]
    fn test_min_triangles_stops_recursion() {
        let mut s = settings(SplitStrategy::Quadtree, 4);
        s.min_triangles = 1000;
        let output = Splitter::new(s, CancellationToken::new()).split(plate(5, DVec3::ZERO)).unwrap();
        assert_eq!(output.leaves.len(), 1);
        assert_eq!(output.leaves[0].key, CellKey::root());
    }

    #[test]
    fn test_octree_uses_three_axes() {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for corner in BoundingBox3D::new(DVec3::ZERO, DVec3::splat(4.0)).corners().iter() {
            let base = vertices.len() as u32;
            let inward = (DVec3::splat(2.0) - *corner).signum() * 0.5;
            vertices.push(*corner);
            vertices.push(*corner + DVec3::new(inward.x, 0.0, 0.0));
            vertices.push(*corner + DVec3::new(0.0, inward.y, inward.z));
            faces.push(Face::new([base, base + 1, base + 2], None, 0));
        }
        let mesh = Mesh::new(vertices, Vec::new(), faces, Arc::from(Vec::new())).unwrap();
        let output = Splitter::new(settings(SplitStrategy::Octree, 1), CancellationToken::new())
            .split(mesh)
            .unwrap();
        assert_eq!(output.leaves.len(), 8);
        assert!(output.leaves.iter().any(|l| l.key == CellKey::new(1, 1, 1, 1)));
        assert_eq!(output.split_count, 0);
    }

    #[test]
    fn test_kdtree_stops_at_tile_size() {
        let mut s = settings(SplitStrategy::KdTree, 0);
        s.tile_size = 2.0;
        let output = Splitter::new(s, CancellationToken::new()).split(plate(8, DVec3::ZERO)).unwrap();
        for leaf in &output.leaves {
            assert!(leaf.node.bounds.extent(Axis::X) <= 2.0 + 1e-9);
            assert!(leaf.node.bounds.extent(Axis::Y) <= 2.0 + 1e-9);
            assert_eq!(leaf.node.depth, leaf.key.depth);
            assert!(leaf.node.axis.is_some());
        }
        assert_eq!(output.leaves.len(), 16);
        assert!(output.triangle_count() >= 128);
    }

    #[test]
    fn test_custom_split_point() {
        let mut s = settings(SplitStrategy::Quadtree, 1);
        s.split_point = SplitPoint::Custom(Arc::new(|_, cell, axis| cell.min[axis.index()] + 1.0));
        let output = Splitter::new(s, CancellationToken::new()).split(plate(4, DVec3::ZERO)).unwrap();
        let root_leaf = output.leaves.iter().find(|l| l.key == CellKey::new(1, 0, 0, 0)).unwrap();
        assert_eq!(root_leaf.mesh.face_count(), 2);
    }

    #[test]
    fn test_cancelled_split_returns_error() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Splitter::new(settings(SplitStrategy::Quadtree, 2), token)
            .split(plate(4, DVec3::ZERO))
            .unwrap_err();
        assert!(matches!(err, SplitError::Cancelled));
    }
}
