//! Model loader boundary and extension-based dispatch

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::geometry::{BoundingBox3D, GeometryError, Material, Mesh};
use crate::tiles3d::{decode_tile, Tiles3dError};

use super::obj_read::ObjLoader;

/// Typed load failure; always fatal for the task
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("parse error in {path} at line {line}: {message}")]
    Parse { path: PathBuf, line: usize, message: String },

    #[error("corrupt model {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("invalid mesh in {path}: {source}")]
    Geometry {
        path: PathBuf,
        #[source]
        source: GeometryError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for loader results.
pub type LoadResult<T> = Result<T, LoadError>;

/// What every loader returns: the mesh, its bounds and its material table
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub mesh: Mesh,
    pub bounds: BoundingBox3D,
    pub materials: Arc<[Material]>,
}

impl LoadedModel {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            bounds: mesh.bounds(),
            materials: mesh.materials_arc(),
            mesh,
        }
    }
}

/// A source format reader
pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case file extensions handled, without the dot
    fn extensions(&self) -> &[&str];

    fn load(&self, path: &Path) -> LoadResult<LoadedModel>;
}

/// Reads `.glb` models and `.b3dm` tiles back into a mesh
#[derive(Debug, Default, Clone, Copy)]
pub struct GlbLoader;

impl ModelLoader for GlbLoader {
    fn name(&self) -> &str {
        "glb"
    }

    fn extensions(&self) -> &[&str] {
        &["glb", "b3dm"]
    }

    fn load(&self, path: &Path) -> LoadResult<LoadedModel> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::Io(e),
        })?;
        let decoded = decode_tile(&data).map_err(|e| corrupt(path, e))?;
        let prefix = path.to_string_lossy();
        let mesh = decoded.to_mesh(&prefix).map_err(|source| LoadError::Geometry {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(LoadedModel::new(mesh))
    }
}

fn corrupt(path: &Path, e: Tiles3dError) -> LoadError {
    LoadError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Extension → loader table
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<String, Arc<dyn ModelLoader>>,
}

impl Default for LoaderRegistry {
    /// OBJ and GLB/B3DM readers
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ObjLoader::default()));
        registry.register(Arc::new(GlbLoader));
        registry
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("extensions", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LoaderRegistry {
    pub fn empty() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    /// Register `loader` for each of its extensions, replacing earlier entries
    pub fn register(&mut self, loader: Arc<dyn ModelLoader>) {
        for ext in loader.extensions() {
            self.loaders.insert(ext.to_ascii_lowercase(), Arc::clone(&loader));
        }
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.loaders.contains_key(&extension.to_ascii_lowercase())
    }

    pub fn loader_for(&self, path: &Path) -> LoadResult<Arc<dyn ModelLoader>> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        self.loaders
            .get(&extension)
            .cloned()
            .ok_or_else(|| LoadError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
    }

    pub fn load(&self, path: &Path) -> LoadResult<LoadedModel> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let loader = self.loader_for(path)?;
        log::info!("loading {} with {} loader", path.display(), loader.name());
        loader.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_is_unsupported() {
        let registry = LoaderRegistry::default();
        let err = registry.loader_for(Path::new("scene.osgb")).err().unwrap();
        assert!(matches!(err, LoadError::UnsupportedFormat { ref extension, .. } if extension == "osgb"));
    }

    #[test]
    fn test_extension_lookup_is_case_insensitive() {
        let registry = LoaderRegistry::default();
        assert!(registry.loader_for(Path::new("MODEL.OBJ")).is_ok());
        assert!(registry.supports("b3dm"));
    }

    #[test]
    fn test_missing_file_reports_not_found() {
        let registry = LoaderRegistry::default();
        let err = registry.load(Path::new("/definitely/not/here.obj")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    struct FixedLoader;

    impl ModelLoader for FixedLoader {
        fn name(&self) -> &str {
            "fixed"
        }
        fn extensions(&self) -> &[&str] {
            &["osgb"]
        }
        fn load(&self, _path: &Path) -> LoadResult<LoadedModel> {
            Ok(LoadedModel::new(Mesh::empty(Arc::from(Vec::new()))))
        }
    }

    #[test]
    fn test_external_loader_can_be_registered() {
        let mut registry = LoaderRegistry::default();
        registry.register(Arc::new(FixedLoader));
        assert_eq!(registry.loader_for(Path::new("tile.osgb")).unwrap().name(), "fixed");
    }
}
