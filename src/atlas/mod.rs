// src/atlas/mod.rs
// Texture atlas packing and per-cell texture strategies
// RELEVANT FILES: src/atlas/maxrects.rs, src/atlas/repack.rs, src/atlas/texture.rs

pub mod maxrects;
pub mod repack;
pub mod texture;

pub use maxrects::{FreeRectChoiceHeuristic, MaxRectsBinPack, Rect};
pub use repack::{
    prepare_cell_textures, repack_cell, AtlasSettings, CellTextures, TextureAtlasResult, UvRegion, ATLAS_TEXTURE_ID,
};
pub use texture::{EncodedImage, TextureCache, MIME_JPEG, MIME_PNG};

use std::fmt::Display;

use thiserror::Error;

use crate::geometry::GeometryError;

#[derive(Error, Debug)]
pub enum PackingError {
    #[error("texture {id}: {message}")]
    Texture { id: String, message: String },

    #[error("region of texture {id} is {width}x{height} px, too large for a {max} px atlas")]
    RegionTooLarge { id: String, width: u64, height: u64, max: u32 },

    #[error("{regions} texture regions do not fit a {max}x{max} atlas")]
    AtlasOverflow { regions: usize, max: u32 },

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

impl PackingError {
    pub fn texture(id: &str, message: impl Display) -> Self {
        PackingError::Texture {
            id: id.to_string(),
            message: message.to_string(),
        }
    }
}

pub type PackingResult<T> = Result<T, PackingError>;
