// src/geo/enu.rs
// WGS84 East-North-Up frames and ECEF conversions
// RELEVANT FILES: src/geo/mod.rs, src/tiles3d/tileset.rs, src/pipeline/orchestrator.rs

//! Every function here is a pure function of its inputs. A `GeoTransform`
//! is an explicit context object handed to whoever needs the placement, so
//! several datasets with different origins can be processed concurrently.

use glam::{DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use super::reproject::{reproject_point, GeoError};

/// WGS84 semi-major axis in meters
pub const WGS84_A: f64 = 6378137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;
/// WGS84 first eccentricity squared, f(2 - f)
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Geodetic position; angles in degrees, height in meters above the ellipsoid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cartographic {
    pub lon_deg: f64,
    pub lat_deg: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(lon_deg: f64, lat_deg: f64, height: f64) -> Self {
        Self { lon_deg, lat_deg, height }
    }

    pub fn lon_rad(&self) -> f64 {
        self.lon_deg.to_radians()
    }

    pub fn lat_rad(&self) -> f64 {
        self.lat_deg.to_radians()
    }
}

/// Prime-vertical radius of curvature at `lat_rad`
fn prime_vertical_radius(lat_rad: f64) -> f64 {
    let s = lat_rad.sin();
    WGS84_A / (1.0 - WGS84_E2 * s * s).sqrt()
}

/// Geodetic degrees/meters to Earth-centered Earth-fixed meters
pub fn cartographic_to_ecef(lon_deg: f64, lat_deg: f64, height: f64) -> DVec3 {
    let lon = lon_deg.to_radians();
    let lat = lat_deg.to_radians();
    let n = prime_vertical_radius(lat);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    DVec3::new(
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + height) * sin_lat,
    )
}

/// Inverse of [`cartographic_to_ecef`], iterating on latitude until it settles
pub fn ecef_to_cartographic(p: DVec3) -> Cartographic {
    let lon = p.y.atan2(p.x);
    let rho = (p.x * p.x + p.y * p.y).sqrt();

    if rho < 1e-9 {
        let b = WGS84_A * (1.0 - WGS84_F);
        let lat = if p.z >= 0.0 { 90.0 } else { -90.0 };
        return Cartographic::new(lon.to_degrees(), lat, p.z.abs() - b);
    }

    let mut lat = p.z.atan2(rho * (1.0 - WGS84_E2));
    let mut height = 0.0;
    for _ in 0..16 {
        let n = prime_vertical_radius(lat);
        height = rho / lat.cos() - n;
        let next = p.z.atan2(rho * (1.0 - WGS84_E2 * n / (n + height)));
        let settled = (next - lat).abs() < 1e-14;
        lat = next;
        if settled {
            break;
        }
    }

    Cartographic::new(lon.to_degrees(), lat.to_degrees(), height)
}

/// Matrix placing a local East-North-Up frame at the given point in ECEF space
pub fn enu_to_ecef_matrix(lon_deg: f64, lat_deg: f64, height: f64) -> DMat4 {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();

    let east = DVec4::new(-sin_lon, cos_lon, 0.0, 0.0);
    let north = DVec4::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat, 0.0);
    let up = DVec4::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat, 0.0);
    let origin = cartographic_to_ecef(lon_deg, lat_deg, height).extend(1.0);

    DMat4::from_cols(east, north, up, origin)
}

/// Column-major 4x4 ENU→ECEF transform as written into tileset documents
pub fn enu_to_ecef(lon_deg: f64, lat_deg: f64, height: f64) -> [f64; 16] {
    enu_to_ecef_matrix(lon_deg, lat_deg, height).to_cols_array()
}

/// Dataset reference point in WGS84
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    pub lon_deg: f64,
    pub lat_deg: f64,
    pub height: f64,
}

impl Default for GeoOrigin {
    fn default() -> Self {
        Self {
            lon_deg: 0.0,
            lat_deg: 0.0,
            height: 0.0,
        }
    }
}

impl GeoOrigin {
    pub fn new(lon_deg: f64, lat_deg: f64, height: f64) -> Result<Self, GeoError> {
        let origin = Self { lon_deg, lat_deg, height };
        origin.validate()?;
        Ok(origin)
    }

    /// Origin given in a projected CRS (e.g. "EPSG:4547"), reprojected to WGS84
    pub fn from_projected(x: f64, y: f64, height: f64, crs: &str) -> Result<Self, GeoError> {
        let (lon, lat) = reproject_point(x, y, crs, "EPSG:4326")?;
        Self::new(lon, lat, height)
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        let finite = self.lon_deg.is_finite() && self.lat_deg.is_finite() && self.height.is_finite();
        if !finite || self.lat_deg.abs() > 90.0 || self.lon_deg.abs() > 180.0 {
            return Err(GeoError::InvalidOrigin(format!(
                "lon={} lat={} h={}",
                self.lon_deg, self.lat_deg, self.height
            )));
        }
        Ok(())
    }
}

/// Placement context: local ENU frame anchored at an origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    origin: GeoOrigin,
    matrix: DMat4,
    inverse: DMat4,
}

impl GeoTransform {
    pub fn new(origin: GeoOrigin) -> Self {
        let matrix = enu_to_ecef_matrix(origin.lon_deg, origin.lat_deg, origin.height);
        Self {
            origin,
            matrix,
            inverse: matrix.inverse(),
        }
    }

    pub fn origin(&self) -> GeoOrigin {
        self.origin
    }

    pub fn matrix(&self) -> DMat4 {
        self.matrix
    }

    /// The 16 column-major values for a tileset root `transform`
    pub fn to_cols_array(&self) -> [f64; 16] {
        self.matrix.to_cols_array()
    }

    pub fn local_to_ecef(&self, local: DVec3) -> DVec3 {
        self.matrix.transform_point3(local)
    }

    pub fn ecef_to_local(&self, ecef: DVec3) -> DVec3 {
        self.inverse.transform_point3(ecef)
    }

    pub fn local_to_cartographic(&self, local: DVec3) -> Cartographic {
        ecef_to_cartographic(self.local_to_ecef(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LON: f64 = 116.397477;
    const LAT: f64 = 39.908692;
    const H: f64 = 43.5;

    #[test]
    fn test_translation_matches_closed_form() {
        let m = enu_to_ecef(LON, LAT, H);
        let lat = LAT.to_radians();
        let lon = LON.to_radians();
        let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin().powi(2)).sqrt();
        let x0 = (n + H) * lat.cos() * lon.cos();
        let y0 = (n + H) * lat.cos() * lon.sin();
        let z0 = (n * (1.0 - WGS84_E2) + H) * lat.sin();
        assert!((m[12] - x0).abs() < 1e-6);
        assert!((m[13] - y0).abs() < 1e-6);
        assert!((m[14] - z0).abs() < 1e-6);
        assert_eq!(m[15], 1.0);
        assert_eq!([m[3], m[7], m[11]], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let m = enu_to_ecef_matrix(LON, LAT, H);
        let e = m.x_axis.truncate();
        let n = m.y_axis.truncate();
        let u = m.z_axis.truncate();
        assert!((e.length() - 1.0).abs() < 1e-12);
        assert!((n.length() - 1.0).abs() < 1e-12);
        assert!(e.dot(n).abs() < 1e-12);
        assert!((e.cross(n) - u).length() < 1e-12);
    }

    #[test]
    fn test_ecef_round_trip() {
        let p = cartographic_to_ecef(LON, LAT, H);
        let c = ecef_to_cartographic(p);
        assert!((c.lon_deg - LON).abs() < 1e-9);
        assert!((c.lat_deg - LAT).abs() < 1e-9);
        assert!((c.height - H).abs() < 1e-6);
    }

    #[test]
    fn test_local_up_raises_height() {
        let geo = GeoTransform::new(GeoOrigin::new(LON, LAT, H).unwrap());
        let c = geo.local_to_cartographic(DVec3::new(0.0, 0.0, 100.0));
        assert!((c.height - (H + 100.0)).abs() < 1e-6);
        let back = geo.ecef_to_local(geo.local_to_ecef(DVec3::new(12.0, -7.0, 3.0)));
        assert!((back - DVec3::new(12.0, -7.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn test_invalid_origin_rejected() {
        assert!(GeoOrigin::new(10.0, 95.0, 0.0).is_err());
        assert!(GeoOrigin::new(f64::NAN, 0.0, 0.0).is_err());
    }
}
