//! Bounding volume types for 3D Tiles

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::geo::{cartographic_to_ecef, GeoTransform};
use crate::geometry::BoundingBox3D;

/// Smallest full extent written for any box axis
pub const MIN_BOX_EXTENT: f64 = 0.01;

/// Bounding volume for a 3D Tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundingVolume {
    /// Box in the tile's local frame
    Box(BoundingBox),
    /// Geographic region (WGS84)
    Region(BoundingRegion),
}

/// Oriented bounding box defined by center and half-axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// center (3) + x half-axis (3) + y half-axis (3) + z half-axis (3)
    #[serde(rename = "box")]
    pub data: [f64; 12],
}

/// Geographic bounding region in WGS84
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    /// [west, south, east, north, min_height, max_height]
    /// Longitude/latitude in radians, heights in meters
    pub region: [f64; 6],
}

impl BoundingVolume {
    /// Axis-aligned `box` volume, each full extent clamped to `MIN_BOX_EXTENT`
    pub fn from_aabb(bounds: &BoundingBox3D) -> Self {
        let c = bounds.center();
        let h = bounds.size().max(DVec3::splat(MIN_BOX_EXTENT)) * 0.5;
        Self::Box(BoundingBox {
            data: [c.x, c.y, c.z, h.x, 0.0, 0.0, 0.0, h.y, 0.0, 0.0, 0.0, h.z],
        })
    }

    /// `region` volume covering the eight corners of a local box placed by `geo`
    pub fn region_from_aabb(bounds: &BoundingBox3D, geo: &GeoTransform) -> Self {
        let mut region = [
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for corner in bounds.corners() {
            let carto = geo.local_to_cartographic(corner);
            region[0] = region[0].min(carto.lon_rad());
            region[1] = region[1].min(carto.lat_rad());
            region[2] = region[2].max(carto.lon_rad());
            region[3] = region[3].max(carto.lat_rad());
            region[4] = region[4].min(carto.height);
            region[5] = region[5].max(carto.height);
        }
        Self::Region(BoundingRegion { region })
    }

    /// Center in the volume's own frame (local for boxes, ECEF for regions)
    pub fn center(&self) -> DVec3 {
        match self {
            Self::Box(b) => DVec3::new(b.data[0], b.data[1], b.data[2]),
            Self::Region(r) => {
                let lon = (r.region[0] + r.region[2]) / 2.0;
                let lat = (r.region[1] + r.region[3]) / 2.0;
                let height = (r.region[4] + r.region[5]) / 2.0;
                cartographic_to_ecef(lon.to_degrees(), lat.to_degrees(), height)
            }
        }
    }

    /// Axis-aligned box this volume was built from, for `box` volumes
    pub fn as_aabb(&self) -> Option<BoundingBox3D> {
        match self {
            Self::Box(b) => {
                let c = DVec3::new(b.data[0], b.data[1], b.data[2]);
                let h = DVec3::new(b.data[3], b.data[7], b.data[11]);
                Some(BoundingBox3D::new(c - h, c + h))
            }
            Self::Region(_) => None,
        }
    }
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::from_aabb(&BoundingBox3D::new(DVec3::ZERO, DVec3::ZERO))
    }
}
