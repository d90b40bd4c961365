// src/pipeline/orchestrator.rs
// Runs a slicing task end to end: load, decimate, split, encode, index
// RELEVANT FILES: src/pipeline/task.rs, src/pipeline/progress.rs, src/split/tree.rs, src/tiles3d/tileset.rs

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::atlas::{prepare_cell_textures, AtlasSettings, TextureCache};
use crate::decimate::{generate_lods, DecimationStatus, LodLevel, LodSettings};
use crate::error::{TilerError, TilerResult};
use crate::geo::{GeoOrigin, GeoTransform};
use crate::geometry::{drop_degenerate_faces, validate_mesh, GeometryError, Mesh};
use crate::io::{LoaderRegistry, TileStorage};
use crate::split::{CellKey, LeafCell, SplitSettings, Splitter};
use crate::tiles3d::{encode_tile, tile_path, tile_uri, TileRecord, TilesetBuilder};

use super::progress::{LogProgressSink, ProgressEvent, ProgressSink};
use super::status::{Stage, TaskStatus};
use super::task::SlicingTask;

/// Name of the index document written next to the tiles
pub const TILESET_PATH: &str = "tileset.json";

/// One tile written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub level: u32,
    pub key: CellKey,
    /// URI reported by the storage backend
    pub path: String,
    /// Tight content bounds as `{"min": [..], "max": [..]}`
    pub bounds: String,
    pub byte_size: usize,
    pub created_at: DateTime<Utc>,
}

/// Result of a finished (or cancelled with partial output) run
#[derive(Debug, Clone, Default)]
pub struct SlicingOutput {
    /// Written tiles ordered by level, then key
    pub records: Vec<SliceRecord>,
    pub tileset_uri: Option<String>,
    /// Cells whose encoding failed; they are absent from the index
    pub failed_cells: Vec<(u32, CellKey)>,
    pub cancelled: bool,
}

struct EncodedCell {
    record: SliceRecord,
    tile: TileRecord,
}

/// Drives slicing tasks against a loader registry and a storage backend
pub struct Pipeline {
    registry: LoaderRegistry,
    storage: Arc<dyn TileStorage>,
    sink: Arc<dyn ProgressSink>,
    textures: Arc<TextureCache>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("cached_textures", &self.textures.len())
            .finish()
    }
}

impl Pipeline {
    pub fn new(storage: Arc<dyn TileStorage>) -> Self {
        Self {
            registry: LoaderRegistry::default(),
            storage,
            sink: Arc::new(LogProgressSink),
            textures: Arc::new(TextureCache::new()),
        }
    }

    pub fn with_registry(mut self, registry: LoaderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn storage(&self) -> &Arc<dyn TileStorage> {
        &self.storage
    }

    /// Run `task` on the model at `source`, georeferenced at `origin`.
    ///
    /// The task always ends in a terminal status: `Completed`, `Cancelled`
    /// (also when partial output was kept) or `Failed` with the error message.
    pub fn run(&self, task: &SlicingTask, source: &Path, origin: GeoOrigin) -> TilerResult<SlicingOutput> {
        if task.status() == TaskStatus::Created {
            task.transition(TaskStatus::Queued)?;
        }
        if task.status() != TaskStatus::Queued {
            return Err(TilerError::invalid_state(format!(
                "task {} cannot start from status {}",
                task.id(),
                task.status()
            )));
        }

        let started = Instant::now();
        let result = match build_pool(task.config().worker_threads) {
            Some(pool) => pool.install(|| self.run_stages(task, source, origin)),
            None => self.run_stages(task, source, origin),
        };

        let next = match &result {
            Ok(output) if output.cancelled => TaskStatus::Cancelled,
            Ok(_) => TaskStatus::Completed,
            Err(e) if e.is_cancelled() => TaskStatus::Cancelled,
            Err(e) => TaskStatus::Failed(e.to_status_message()),
        };
        match &next {
            TaskStatus::Failed(message) => warn!("task {} failed: {}", task.id(), message),
            other => info!("task {} {} in {:.2?}", task.id(), other, started.elapsed()),
        }
        if let Err(e) = task.transition(next) {
            warn!("{}", e);
        }
        result
    }

    fn enter(&self, task: &SlicingTask, stage: Stage) -> TilerResult<()> {
        checkpoint(task)?;
        task.transition(TaskStatus::Processing(stage))?;
        self.sink.report(ProgressEvent::stage(task.id(), stage, 0.0));
        Ok(())
    }

    fn run_stages(&self, task: &SlicingTask, source: &Path, origin: GeoOrigin) -> TilerResult<SlicingOutput> {
        let config = task.config();
        config.validate()?;
        origin.validate()?;

        self.enter(task, Stage::Load)?;
        let mesh = self.load(source)?;
        let model_bounds = mesh.bounds();

        self.enter(task, Stage::Decimate)?;
        let lods = self.decimate(task, &mesh)?;
        drop(mesh);

        self.enter(task, Stage::Split)?;
        let token = task.token();
        let splits = lods
            .into_par_iter()
            .map(|lod| -> TilerResult<(u32, Vec<LeafCell>)> {
                let splitter = Splitter::new(SplitSettings::for_lod(config, lod.level), token.clone());
                let output = splitter.split_within(lod.mesh, model_bounds)?;
                info!(
                    "LOD {}: {} cells, {} triangles clipped",
                    lod.level,
                    output.leaves.len(),
                    output.split_count
                );
                Ok((lod.level, output.leaves))
            })
            .collect::<TilerResult<Vec<_>>>()?;
        let coarsest = splits.iter().map(|(level, _)| *level).max().unwrap_or(0);
        let cells: Vec<(u32, LeafCell)> = splits
            .into_iter()
            .flat_map(|(level, leaves)| leaves.into_iter().map(move |leaf| (level, leaf)))
            .collect();

        self.enter(task, Stage::Encode)?;
        let written = Mutex::new(Vec::new());
        let encoded = self.encode(task, &cells, coarsest, &written);
        let (mut encoded, failed_cells) = match encoded {
            Ok(done) => done,
            Err(e) => {
                if !config.keep_partial_output {
                    self.discard(&written.into_inner());
                }
                return Err(e);
            }
        };
        encoded.sort_by_key(|cell| (cell.record.level, cell.record.key));

        let cancelled = task.is_cancelled();
        if cancelled && (!config.keep_partial_output || encoded.is_empty()) {
            self.discard(&written.into_inner());
            return Err(TilerError::Cancelled);
        }
        if cancelled {
            info!("task {} cancelled, indexing {} tiles already written", task.id(), encoded.len());
        }

        task.transition(TaskStatus::Processing(Stage::Index))?;
        self.sink.report(ProgressEvent::stage(task.id(), Stage::Index, 0.0));
        let tiles: Vec<TileRecord> = encoded.iter().map(|cell| cell.tile.clone()).collect();
        let tileset = TilesetBuilder::new(config, GeoTransform::new(origin)).build(&tiles, &model_bounds)?;
        let tileset_uri = self.storage.put(TILESET_PATH, &tileset.to_vec_pretty()?)?;
        self.sink.report(ProgressEvent::stage(task.id(), Stage::Index, 1.0));
        info!("wrote {} ({} tiles)", tileset_uri, tiles.len());

        Ok(SlicingOutput {
            records: encoded.into_iter().map(|cell| cell.record).collect(),
            tileset_uri: Some(tileset_uri),
            failed_cells,
            cancelled,
        })
    }

    fn load(&self, source: &Path) -> TilerResult<Mesh> {
        let model = self.registry.load(source)?;
        let report = validate_mesh(&model.mesh);
        info!(
            "loaded {}: {} vertices, {} triangles, {} materials",
            source.display(),
            report.stats.vertex_count,
            report.stats.face_count,
            model.materials.len()
        );

        let mut mesh = model.mesh;
        if report.degenerate_count() > 0 {
            let (clean, dropped) = drop_degenerate_faces(&mesh)?;
            warn!("dropped {} degenerate triangles from {}", dropped, source.display());
            mesh = clean;
        }
        if mesh.is_empty() {
            return Err(GeometryError::new(format!("{} has no usable triangles", source.display())).into());
        }
        Ok(mesh)
    }

    fn decimate(&self, task: &SlicingTask, mesh: &Mesh) -> TilerResult<Vec<LodLevel>> {
        let settings = LodSettings::from_config(task.config());
        let levels = settings.levels().max(1) as f64;
        let (tx, rx) = crossbeam_channel::bounded::<DecimationStatus>(256);

        let lods = std::thread::scope(|scope| {
            scope.spawn(|| {
                for status in rx.iter() {
                    debug!(
                        "LOD {} iteration {}: {} triangles (target {})",
                        status.level, status.iteration, status.current_triangles, status.target_triangles
                    );
                    let span = status.original_triangles.saturating_sub(status.target_triangles).max(1);
                    let removed = status.original_triangles.saturating_sub(status.current_triangles);
                    let fraction = (status.level as f64 - 1.0 + removed as f64 / span as f64) / levels;
                    self.sink.report(ProgressEvent::stage(task.id(), Stage::Decimate, fraction));
                }
            });
            generate_lods(mesh, &settings, Some(tx))
        })?;
        checkpoint(task)?;
        Ok(lods)
    }

    /// Encode every cell in parallel. Cell failures are collected, except
    /// for the root cell of the coarsest level which aborts the run.
    fn encode(
        &self,
        task: &SlicingTask,
        cells: &[(u32, LeafCell)],
        coarsest: u32,
        written: &Mutex<Vec<String>>,
    ) -> TilerResult<(Vec<EncodedCell>, Vec<(u32, CellKey)>)> {
        let config = task.config();
        let atlas = AtlasSettings::from_config(config);
        let total = cells.len();
        let processed = AtomicUsize::new(0);
        let failed = Mutex::new(Vec::new());
        let started = Instant::now();

        let encoded = cells
            .par_iter()
            .map(|(level, leaf)| -> TilerResult<Option<EncodedCell>> {
                if task.is_cancelled() {
                    return Ok(None);
                }
                let level = *level;
                let prepared = prepare_cell_textures(&leaf.mesh, &self.textures, &atlas);
                let bytes = match encode_tile(&prepared.mesh, &prepared.images, config.output_format) {
                    Ok(bytes) => bytes,
                    Err(e) if level == coarsest && leaf.key == CellKey::root() => return Err(e.into()),
                    Err(e) => {
                        warn!("skipping cell {} of LOD {}: {}", leaf.key, level, e);
                        failed.lock().push((level, leaf.key));
                        return Ok(None);
                    }
                };

                let path = tile_path(level, leaf.key, config.output_format);
                let uri = match self.storage.put(&path, &bytes) {
                    Ok(uri) => uri,
                    Err(e) if level == coarsest && leaf.key == CellKey::root() => return Err(e.into()),
                    Err(e) => {
                        warn!("could not store cell {} of LOD {}: {}", leaf.key, level, e);
                        failed.lock().push((level, leaf.key));
                        return Ok(None);
                    }
                };
                written.lock().push(path);
                debug!("wrote {} ({} triangles, {} bytes)", uri, leaf.mesh.face_count(), bytes.len());

                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                self.sink.report(encode_progress(task.id(), done, total, started));

                Ok(Some(EncodedCell {
                    record: SliceRecord {
                        level,
                        key: leaf.key,
                        path: uri,
                        bounds: leaf.bounds.to_json(),
                        byte_size: bytes.len(),
                        created_at: Utc::now(),
                    },
                    tile: TileRecord {
                        level,
                        key: leaf.key,
                        uri: tile_uri(level, leaf.key, config.output_format),
                        cell_bounds: leaf.node.bounds,
                        content_bounds: leaf.bounds,
                    },
                }))
            })
            .collect::<TilerResult<Vec<_>>>()?;

        let mut failed = failed.into_inner();
        failed.sort();
        let encoded: Vec<EncodedCell> = encoded.into_iter().flatten().collect();
        info!("encoded {} of {} cells ({} failed)", encoded.len(), total, failed.len());
        Ok((encoded, failed))
    }

    fn discard(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.storage.remove(path) {
                warn!("could not remove {}: {}", path, e);
            }
        }
    }
}

fn checkpoint(task: &SlicingTask) -> TilerResult<()> {
    if task.is_cancelled() {
        return Err(TilerError::Cancelled);
    }
    Ok(())
}

fn encode_progress(task_id: &str, done: usize, total: usize, started: Instant) -> ProgressEvent {
    let fraction = done as f64 / total.max(1) as f64;
    let elapsed = started.elapsed().as_millis() as f64;
    let eta_ms = (done > 0).then(|| (elapsed / done as f64 * total.saturating_sub(done) as f64) as u64);
    ProgressEvent {
        processed_tiles: done,
        total_tiles: total,
        eta_ms,
        ..ProgressEvent::stage(task_id, Stage::Encode, fraction)
    }
}

/// Bounded worker pool; `None` falls back to the global pool
fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("tileforge-worker-{i}"))
        .build();
    match pool {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("could not build a pool of {} workers, using the global pool: {}", threads, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlicingConfig;
    use crate::io::{MemoryStorage, StorageError, StorageResult};
    use crate::pipeline::ChannelProgressSink;

    const GRID_OBJ: &str = "v 0 0 0\nv 10 0 0\nv 20 0 0\nv 0 10 0\nv 10 10 1\nv 20 10 0\nv 0 20 0\nv 10 20 0\nv 20 20 0\n\
f 1 2 5\nf 1 5 4\nf 2 3 6\nf 2 6 5\nf 4 5 8\nf 4 8 7\nf 5 6 9\nf 5 9 8\n";

    fn write_obj(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("grid.obj");
        std::fs::write(&path, GRID_OBJ).unwrap();
        path
    }

    fn small_config() -> SlicingConfig {
        SlicingConfig {
            lod_levels: 2,
            division_depth: 1,
            min_triangles_per_cell: 1,
            worker_threads: 2,
            ..SlicingConfig::default()
        }
    }

    #[test]
    fn test_run_writes_tiles_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_obj(&dir);
        let storage = Arc::new(MemoryStorage::new());
        let (sink, events) = ChannelProgressSink::bounded(1024);
        let pipeline = Pipeline::new(storage.clone()).with_progress_sink(Arc::new(sink));
        let task = SlicingTask::new("grid", small_config());

        let output = pipeline.run(&task, &source, GeoOrigin::default()).unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(!output.cancelled);
        assert!(output.failed_cells.is_empty());
        assert!(output.records.iter().any(|r| r.level == 0));
        assert!(output.records.iter().any(|r| r.level == 1));
        assert_eq!(storage.len(), output.records.len() + 1);
        assert!(storage.get(TILESET_PATH).is_ok());

        let events: Vec<ProgressEvent> = events.try_iter().collect();
        assert!(events.iter().any(|e| e.stage == Stage::Encode && e.processed_tiles > 0));
        assert!(events.windows(2).all(|w| w[0].stage <= w[1].stage));
    }

    /// Memory storage that refuses every key under `prefix`
    struct RejectingStorage {
        inner: MemoryStorage,
        prefix: &'static str,
    }

    impl TileStorage for RejectingStorage {
        fn put(&self, path: &str, bytes: &[u8]) -> StorageResult<String> {
            if path.starts_with(self.prefix) {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
            self.inner.put(path, bytes)
        }

        fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
            self.inner.get(path)
        }

        fn remove(&self, path: &str) -> StorageResult<()> {
            self.inner.remove(path)
        }
    }

    #[test]
    fn test_storage_failure_of_finer_cells_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_obj(&dir);
        let storage = Arc::new(RejectingStorage {
            inner: MemoryStorage::new(),
            prefix: "lod0/",
        });
        let task = SlicingTask::new("grid", small_config());

        let output = Pipeline::new(storage.clone()).run(&task, &source, GeoOrigin::default()).unwrap();

        assert_eq!(task.status(), TaskStatus::Completed);
        assert!(!output.failed_cells.is_empty());
        assert!(output.failed_cells.iter().all(|(level, _)| *level == 0));
        assert!(output.records.iter().all(|r| r.level == 1));
        assert!(!output.records.is_empty());
        assert!(storage.inner.get(TILESET_PATH).is_ok());
    }

    #[test]
    fn test_storage_failure_of_root_cell_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_obj(&dir);
        let storage = Arc::new(RejectingStorage {
            inner: MemoryStorage::new(),
            prefix: "lod1/",
        });
        let task = SlicingTask::new("grid", small_config());

        let err = Pipeline::new(storage.clone()).run(&task, &source, GeoOrigin::default()).unwrap_err();

        assert!(matches!(err, TilerError::Storage(_)));
        assert!(matches!(task.status(), TaskStatus::Failed(_)));
        assert!(storage.inner.is_empty());
    }

    #[test]
    fn test_cancelled_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_obj(&dir);
        let storage = Arc::new(MemoryStorage::new());
        let task = SlicingTask::new("grid", small_config());
        task.cancel();

        let err = Pipeline::new(storage.clone()).run(&task, &source, GeoOrigin::default()).unwrap_err();
        assert!(matches!(err, TilerError::InvalidState(_)));
        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_missing_source_fails_task() {
        let storage = Arc::new(MemoryStorage::new());
        let task = SlicingTask::new("missing", small_config());
        let err = Pipeline::new(storage)
            .run(&task, Path::new("/nonexistent/model.obj"), GeoOrigin::default())
            .unwrap_err();
        assert!(matches!(err, TilerError::Load(_)));
        match task.status() {
            TaskStatus::Failed(message) => assert!(message.starts_with("[Load]")),
            other => panic!("unexpected status {other}"),
        }
    }

    #[test]
    fn test_invalid_config_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_obj(&dir);
        let config = SlicingConfig {
            lod_levels: 0,
            ..small_config()
        };
        let task = SlicingTask::new("bad", config);
        let err = Pipeline::new(Arc::new(MemoryStorage::new()))
            .run(&task, &source, GeoOrigin::default())
            .unwrap_err();
        assert!(matches!(err, TilerError::Config(_)));
        assert!(matches!(task.status(), TaskStatus::Failed(_)));
    }

    #[test]
    fn test_encode_progress_eta() {
        let event = encode_progress("t", 0, 4, Instant::now());
        assert_eq!(event.eta_ms, None);
        assert_eq!(event.percent, 50.0);
        let event = encode_progress("t", 4, 4, Instant::now());
        assert_eq!(event.eta_ms, Some(0));
        assert_eq!(event.percent, 95.0);
    }

    #[test]
    fn test_degenerate_faces_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("degenerate.obj");
        std::fs::write(&path, format!("{GRID_OBJ}f 1 2 3\n")).unwrap();
        let mesh = Pipeline::new(Arc::new(MemoryStorage::new())).load(&path).unwrap();
        assert_eq!(mesh.face_count(), 8);
    }
}
