// src/geo/mod.rs
// Geodetic placement: WGS84 ENU/ECEF conversions and optional CRS reprojection
// RELEVANT FILES: src/geo/enu.rs, src/geo/reproject.rs, src/tiles3d/tileset.rs

pub mod enu;
pub mod reproject;

pub use enu::{
    cartographic_to_ecef, ecef_to_cartographic, enu_to_ecef, enu_to_ecef_matrix, Cartographic, GeoOrigin,
    GeoTransform, WGS84_A, WGS84_E2, WGS84_F,
};
pub use reproject::{parse_epsg_code, reproject_point, GeoError};

/// Check if the proj feature is available
pub fn proj_available() -> bool {
    cfg!(feature = "proj")
}
