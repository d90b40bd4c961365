//! IO module: model loaders on the way in, tile storage on the way out.
//!
//! Both sides are narrow traits so that native-library readers (paged
//! scene-graph datasets) and blob stores can be plugged in without touching
//! the pipeline.

pub mod loader;
pub mod obj_read;
pub mod storage;

pub use loader::{GlbLoader, LoadError, LoadResult, LoadedModel, LoaderRegistry, ModelLoader};
pub use obj_read::{parse_obj, ObjLoader};
pub use storage::{FsStorage, MemoryStorage, StorageError, StorageResult, TileStorage};
