//! Tile output storage.
//!
//! Paths handed to a [`TileStorage`] are relative, '/'-separated keys such as
//! `lod0/2-1-3-0.b3dm`. Each backend decides what URI it reports back.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for encoded tiles and the tileset document
pub trait TileStorage: Send + Sync {
    /// Store `bytes` under `path`, returning the URI the object is reachable at
    fn put(&self, path: &str, bytes: &[u8]) -> StorageResult<String>;

    fn get(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Remove an object; missing objects are not an error
    fn remove(&self, path: &str) -> StorageResult<()>;
}

/// Reject absolute paths and parent traversal
fn check_key(path: &str) -> StorageResult<()> {
    let invalid = path.is_empty()
        || Path::new(path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Writes objects under a root directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        check_key(path)?;
        Ok(self.root.join(path))
    }
}

impl TileStorage for FsStorage {
    fn put(&self, path: &str, bytes: &[u8]) -> StorageResult<String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&full, bytes).map_err(|source| StorageError::Io {
            path: full.clone(),
            source,
        })?;
        Ok(full.to_string_lossy().into_owned())
    }

    fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io { path: full.clone(), source },
        })
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path: full, source }),
        }
    }
}

/// In-memory object store, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in lexical order
    pub fn paths(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl TileStorage for MemoryStorage {
    fn put(&self, path: &str, bytes: &[u8]) -> StorageResult<String> {
        check_key(path)?;
        self.objects.write().insert(path.to_string(), bytes.to_vec());
        Ok(format!("mem://{path}"))
    }

    fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn remove(&self, path: &str) -> StorageResult<()> {
        self.objects.write().remove(path);
        Ok(())
    }
}
