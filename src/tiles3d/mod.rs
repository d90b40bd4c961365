//! 3D Tiles output for tileforge
//!
//! Encodes cell meshes as GLB / b3dm payloads and links them into a
//! `tileset.json` hierarchy. Decoders for both containers let produced
//! tiles be read back.

mod b3dm;
mod bounds;
mod error;
mod glb;
mod tile;
mod tileset;

pub use b3dm::{
    decode_b3dm, encode_b3dm, encode_b3dm_with_names, load_b3dm, B3dmHeader, B3dmPayload, BatchTable,
    B3DM_HEADER_LEN,
};
pub use bounds::{BoundingBox, BoundingRegion, BoundingVolume, MIN_BOX_EXTENT};
pub use error::{Tiles3dError, Tiles3dResult};
pub use glb::{
    build_glb, decode_glb, decode_tile, encode_tile, read_glb_chunks, DecodedMaterial, DecodedPrimitive, DecodedTile,
    GlbPayload, GENERATOR, UNLIT_EXTENSION,
};
pub use tile::{Tile, TileContent, TileRefine};
pub use tileset::{tile_path, tile_uri, TileRecord, Tileset, TilesetAsset, TilesetBuilder, TilesetJson};
