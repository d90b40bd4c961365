use std::path::{Path, PathBuf};
use std::sync::Arc;

use tileforge::config::{OutputFormat, SlicingConfig, TextureStrategy};
use tileforge::geo::{enu_to_ecef, GeoOrigin};
use tileforge::io::{FsStorage, MemoryStorage, TileStorage};
use tileforge::pipeline::{
    CancellationToken, Pipeline, ProgressEvent, ProgressSink, SlicingTask, Stage, TaskStatus, TILESET_PATH,
};
use tileforge::tiles3d::{decode_tile, Tileset};
use tileforge::TilerError;

const LON: f64 = 116.397477;
const LAT: f64 = 39.908692;
const HEIGHT: f64 = 43.5;

/// Write an `n` x `n` textured height field with its material and texture
fn write_model(dir: &Path, n: usize) -> PathBuf {
    let texture = image::RgbaImage::from_fn(8, 8, |x, y| image::Rgba([(x * 32) as u8, (y * 32) as u8, 128, 255]));
    texture.save(dir.join("ground.png")).unwrap();
    std::fs::write(dir.join("model.mtl"), "newmtl ground\nKd 1 1 1\nmap_Kd ground.png\n").unwrap();

    let mut obj = String::from("mtllib model.mtl\n");
    for y in 0..=n {
        for x in 0..=n {
            let z = ((x as f64) * 0.7).sin() * 2.0 + ((y as f64) * 0.4).cos();
            obj.push_str(&format!("v {} {} {:.4}\n", x * 10, y * 10, z));
            obj.push_str(&format!("vt {:.4} {:.4}\n", x as f64 / n as f64, y as f64 / n as f64));
        }
    }
    obj.push_str("usemtl ground\n");
    let idx = |x: usize, y: usize| y * (n + 1) + x + 1;
    for y in 0..n {
        for x in 0..n {
            let (a, b, c, d) = (idx(x, y), idx(x + 1, y), idx(x + 1, y + 1), idx(x, y + 1));
            obj.push_str(&format!("f {a}/{a} {b}/{b} {c}/{c}\nf {a}/{a} {c}/{c} {d}/{d}\n"));
        }
    }
    let path = dir.join("model.obj");
    std::fs::write(&path, obj).unwrap();
    path
}

fn config() -> SlicingConfig {
    SlicingConfig {
        lod_levels: 2,
        division_depth: 2,
        min_triangles_per_cell: 1,
        worker_threads: 2,
        ..SlicingConfig::default()
    }
}

fn origin() -> GeoOrigin {
    GeoOrigin::new(LON, LAT, HEIGHT).unwrap()
}

#[test]
fn test_end_to_end_writes_a_loadable_tileset() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), 8);
    let out = dir.path().join("tiles");
    let pipeline = Pipeline::new(Arc::new(FsStorage::new(&out)));
    let task = SlicingTask::new(
        "model",
        SlicingConfig {
            texture_strategy: TextureStrategy::Repack,
            ..config()
        },
    );

    let output = pipeline.run(&task, &source, origin()).unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    assert!(output.failed_cells.is_empty());

    let tileset = Tileset::load(out.join(TILESET_PATH)).unwrap();
    let transform = tileset.root().transform.unwrap();
    for (written, expected) in transform.iter().zip(enu_to_ecef(LON, LAT, HEIGHT)) {
        assert!((written - expected).abs() < 1e-6);
    }
    assert!(tileset.geometric_error() > 0.0);

    let uris = tileset.root().content_uris();
    assert_eq!(uris.len(), output.records.len());
    let mut finest_triangles = 0;
    for uri in uris {
        let bytes = std::fs::read(tileset.resolve_uri(uri)).unwrap();
        let tile = decode_tile(&bytes).unwrap();
        assert!(tile.triangle_count() > 0);
        assert_eq!(tile.batch_length, Some(tile.primitives.len() as u32));
        assert!(tile.materials.iter().all(|m| m.image.as_ref().is_some_and(|i| i.mime_type == "image/png")));
        if uri.starts_with("./lod0/") {
            finest_triangles += tile.triangle_count();
        }
    }
    assert!(finest_triangles >= 128);
}

#[test]
fn test_glb_output_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), 4);
    let storage = Arc::new(MemoryStorage::new());
    let task = SlicingTask::new(
        "model",
        SlicingConfig {
            output_format: OutputFormat::Glb,
            ..config()
        },
    );

    let output = Pipeline::new(storage.clone()).run(&task, &source, origin()).unwrap();
    let paths = storage.paths();
    assert_eq!(paths.len(), output.records.len() + 1);
    for path in paths.iter().filter(|p| p.as_str() != TILESET_PATH) {
        assert!(path.ends_with(".glb"), "{path}");
        let tile = decode_tile(&storage.get(path).unwrap()).unwrap();
        assert_eq!(tile.batch_length, None);
    }
    for record in &output.records {
        let bounds: serde_json::Value = serde_json::from_str(&record.bounds).unwrap();
        assert_eq!(bounds["min"].as_array().map(Vec::len), Some(3));
    }
}

/// Cancels the task once the first tile has been written
struct CancelAfterFirstTile(CancellationToken);

impl ProgressSink for CancelAfterFirstTile {
    fn report(&self, event: ProgressEvent) {
        if event.stage == Stage::Encode && event.processed_tiles > 0 {
            self.0.cancel();
        }
    }
}

fn cancelling_run(keep_partial_output: bool) -> (SlicingTask, Arc<MemoryStorage>, Result<tileforge::SlicingOutput, TilerError>) {
    let dir = tempfile::tempdir().unwrap();
    let source = write_model(dir.path(), 8);
    let storage = Arc::new(MemoryStorage::new());
    let task = SlicingTask::new(
        "model",
        SlicingConfig {
            worker_threads: 1,
            keep_partial_output,
            ..config()
        },
    );
    let pipeline = Pipeline::new(storage.clone()).with_progress_sink(Arc::new(CancelAfterFirstTile(task.token())));
    let result = pipeline.run(&task, &source, origin());
    (task, storage, result)
}

#[test]
fn test_cancellation_removes_written_tiles() {
    let (task, storage, result) = cancelling_run(false);
    assert!(matches!(result, Err(TilerError::Cancelled)));
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(storage.is_empty());
}

#[test]
fn test_cancellation_can_keep_partial_output() {
    let (task, storage, result) = cancelling_run(true);
    let output = result.unwrap();
    assert!(output.cancelled);
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(!output.records.is_empty());
    assert!(storage.get(TILESET_PATH).is_ok());
    assert_eq!(storage.len(), output.records.len() + 1);
}

#[test]
fn test_unsupported_format_fails_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("model.fbx");
    std::fs::write(&source, b"not a model").unwrap();
    let task = SlicingTask::new("fbx", config());
    let err = Pipeline::new(Arc::new(MemoryStorage::new()))
        .run(&task, &source, origin())
        .unwrap_err();
    assert!(matches!(err, TilerError::Load(_)));
    assert!(matches!(task.status(), TaskStatus::Failed(_)));
}
