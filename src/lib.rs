//! tileforge: turn large textured meshes into streamable 3D Tiles.
//!
//! A model is loaded ([`io`]), simplified into levels of detail
//! ([`decimate`]), cut into spatial cells ([`split`]), given per-cell
//! textures ([`atlas`]), encoded as b3dm/GLB and indexed into a
//! `tileset.json` ([`tiles3d`]) placed on the globe by [`geo`].
//! [`pipeline`] runs those stages as a cancellable task.

pub mod atlas;
pub mod cli;
pub mod config;
pub mod decimate;
pub mod error;
pub mod geo;
pub mod geometry;
pub mod io;
pub mod pipeline;
pub mod split;
pub mod tiles3d;

pub use config::{OutputFormat, SlicingConfig, SplitStrategy, TextureStrategy};
pub use error::{TilerError, TilerResult};
pub use geo::{GeoOrigin, GeoTransform};
pub use geometry::{BoundingBox3D, Mesh};
pub use io::{FsStorage, MemoryStorage, TileStorage};
pub use pipeline::{CancellationToken, Pipeline, SlicingOutput, SlicingTask, TaskStatus};
