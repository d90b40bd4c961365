// src/geo/reproject.rs
// CRS reprojection of dataset origins using the PROJ library (feature-gated)
// RELEVANT FILES: src/geo/mod.rs, src/geo/enu.rs

use thiserror::Error;

/// Error type for geographic operations
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("Invalid geodetic origin: {0}")]
    InvalidOrigin(String),

    #[error("PROJ feature not enabled")]
    ProjNotAvailable,
}

/// Reproject a single coordinate pair.
///
/// `from_crs` / `to_crs` accept "EPSG:n", a bare EPSG number, or a PROJ string.
#[cfg(feature = "proj")]
pub fn reproject_point(x: f64, y: f64, from_crs: &str, to_crs: &str) -> Result<(f64, f64), GeoError> {
    use proj::Proj;

    let from = normalize_crs(from_crs)?;
    let to = normalize_crs(to_crs)?;
    let transformer = Proj::new_known_crs(&from, &to, None)
        .map_err(|e| GeoError::Projection(format!("Failed to create transform: {}", e)))?;

    transformer
        .convert((x, y))
        .map_err(|e| GeoError::Projection(format!("Transform failed at ({}, {}): {}", x, y, e)))
}

/// Stub for when proj feature is disabled
#[cfg(not(feature = "proj"))]
pub fn reproject_point(_x: f64, _y: f64, from_crs: &str, to_crs: &str) -> Result<(f64, f64), GeoError> {
    normalize_crs(from_crs)?;
    normalize_crs(to_crs)?;
    Err(GeoError::ProjNotAvailable)
}

/// Get the EPSG code from a CRS string if it's in EPSG format.
pub fn parse_epsg_code(crs: &str) -> Option<u32> {
    let crs_upper = crs.trim().to_uppercase();
    if let Some(code) = crs_upper.strip_prefix("EPSG:") {
        code.parse::<u32>().ok()
    } else {
        crs_upper.parse::<u32>().ok()
    }
}

/// Canonical "EPSG:n" form for EPSG inputs; PROJ strings pass through
fn normalize_crs(crs: &str) -> Result<String, GeoError> {
    let trimmed = crs.trim();
    if trimmed.is_empty() {
        return Err(GeoError::InvalidCrs("empty CRS string".into()));
    }
    if let Some(code) = parse_epsg_code(trimmed) {
        return Ok(format!("EPSG:{code}"));
    }
    if trimmed.to_uppercase().starts_with("EPSG:") {
        return Err(GeoError::InvalidCrs(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg_code() {
        assert_eq!(parse_epsg_code("EPSG:4326"), Some(4326));
        assert_eq!(parse_epsg_code("epsg:32654"), Some(32654));
        assert_eq!(parse_epsg_code("4547"), Some(4547));
        assert_eq!(parse_epsg_code("WGS84"), None);
        assert_eq!(parse_epsg_code("EPSG:invalid"), None);
    }

    #[test]
    fn test_normalize_crs() {
        assert_eq!(normalize_crs("4326").unwrap(), "EPSG:4326");
        assert_eq!(normalize_crs("+proj=longlat").unwrap(), "+proj=longlat");
        assert!(matches!(normalize_crs("EPSG:abc"), Err(GeoError::InvalidCrs(_))));
        assert!(normalize_crs("  ").is_err());
    }

    #[cfg(not(feature = "proj"))]
    #[test]
    fn test_stub_reports_missing_feature() {
        let err = reproject_point(500000.0, 4000000.0, "EPSG:32650", "EPSG:4326").unwrap_err();
        assert!(matches!(err, GeoError::ProjNotAvailable));
    }

    #[cfg(feature = "proj")]
    #[test]
    fn test_reproject_utm_to_wgs84() {
        // UTM zone 54N near Mt. Fuji
        let (lon, lat) = reproject_point(304_000.0, 3_915_000.0, "EPSG:32654", "EPSG:4326").unwrap();
        assert!(lon > 138.0 && lon < 139.5);
        assert!(lat > 35.0 && lat < 35.6);
    }
}
