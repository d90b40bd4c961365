//! Slicing configuration
//!
//! `SlicingConfig` governs termination of both decimation and splitting as
//! well as how tiles are encoded. It is read from a JSON document; every
//! field has a default so partial documents are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading or validating a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid<T: ToString>(field: &'static str, message: T) -> Self {
        ConfigError::Invalid {
            field,
            message: message.to_string(),
        }
    }
}

/// How textures referenced by a cell end up in its tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextureStrategy {
    /// Embed the source image bytes untouched
    #[default]
    KeepOriginal,
    /// Re-encode every source texture as JPEG
    Compress,
    /// Pack the referenced regions into one atlas per cell (PNG)
    Repack,
    /// Pack into an atlas and encode it as JPEG
    RepackCompressed,
}

impl TextureStrategy {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "keep" | "keep-original" | "original" => Some(Self::KeepOriginal),
            "compress" => Some(Self::Compress),
            "repack" => Some(Self::Repack),
            "repack-compressed" | "repack_compressed" => Some(Self::RepackCompressed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepOriginal => "keep-original",
            Self::Compress => "compress",
            Self::Repack => "repack",
            Self::RepackCompressed => "repack-compressed",
        }
    }

    /// True when the strategy builds a per-cell atlas
    pub fn repacks(self) -> bool {
        matches!(self, Self::Repack | Self::RepackCompressed)
    }

    /// True when images are re-encoded lossy
    pub fn compresses(self) -> bool {
        matches!(self, Self::Compress | Self::RepackCompressed)
    }
}

/// Tile payload container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    B3dm,
    Glb,
}

impl OutputFormat {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "b3dm" => Some(Self::B3dm),
            "glb" => Some(Self::Glb),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::B3dm => "b3dm",
            Self::Glb => "glb",
        }
    }
}

/// Spatial partitioning scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    /// X then Y per level, four children
    #[default]
    Quadtree,
    /// X, Y then Z per level, eight children
    Octree,
    /// One alternating axis per level, driven by tile size
    KdTree,
}

impl SplitStrategy {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "quadtree" | "quad" => Some(Self::Quadtree),
            "octree" | "oct" => Some(Self::Octree),
            "kdtree" | "kd" => Some(Self::KdTree),
            _ => None,
        }
    }
}

/// Where the fixed trees place their cut planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitPointStrategy {
    /// Halve the cell box
    #[default]
    BoundsCenter,
    /// Centre of the piece's actual mesh bounds
    AbsoluteCenter,
    /// Mean of the piece's vertex positions
    VertexBarycenter,
}

/// Bounding volume written into the tileset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundingVolumeKind {
    #[default]
    Box,
    Region,
}

/// Quadric decimation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationConfig {
    pub enabled: bool,
    pub preserve_borders: bool,
    /// Hard vertex cap, 0 = unlimited
    pub max_vertex_count: usize,
    pub aggressiveness: f64,
    pub max_iterations: usize,
    /// Quadric error budget, 0 = disabled
    pub target_error: f64,
    /// Position tolerance used to weld seams before decimating, 0 = no weld
    pub weld_epsilon: f64,
}

impl Default for DecimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preserve_borders: true,
            max_vertex_count: 0,
            aggressiveness: 7.0,
            max_iterations: 100,
            target_error: 0.0,
            weld_epsilon: 1e-6,
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicingConfig {
    /// Target cell edge length in model units (KD-tree termination)
    pub tile_size: f64,
    /// Split depth used for the finest LOD of the fixed trees
    pub division_depth: u32,
    /// Number of LOD levels including the full-detail level
    pub lod_levels: u32,
    /// Triangle ratio between consecutive LODs
    pub lod_reduction_ratio: f64,
    /// Explicit per-level ratios, overrides `lod_reduction_ratio`
    pub lod_ratios: Option<Vec<f64>>,
    pub output_format: OutputFormat,
    pub texture_strategy: TextureStrategy,
    pub split_strategy: SplitStrategy,
    pub split_point: SplitPointStrategy,
    /// Hard recursion cap for every split variant
    pub max_split_depth: u32,
    /// A cell at or below this triangle count is not split further
    pub min_triangles_per_cell: usize,
    pub decimation: DecimationConfig,
    pub jpeg_quality: u8,
    pub max_atlas_size: u32,
    pub atlas_padding: u32,
    pub bounding_volume: BoundingVolumeKind,
    /// Overrides the tileset-level geometric error
    pub root_geometric_error: Option<f64>,
    /// Worker pool size, 0 = one per core
    pub worker_threads: usize,
    /// Recursion forks onto the pool above this triangle count
    pub parallel_split_threshold: usize,
    /// Index and keep tiles already written when a task is cancelled
    pub keep_partial_output: bool,
}

impl Default for SlicingConfig {
    fn default() -> Self {
        Self {
            tile_size: 100.0,
            division_depth: 3,
            lod_levels: 3,
            lod_reduction_ratio: 0.5,
            lod_ratios: None,
            output_format: OutputFormat::B3dm,
            texture_strategy: TextureStrategy::KeepOriginal,
            split_strategy: SplitStrategy::Quadtree,
            split_point: SplitPointStrategy::BoundsCenter,
            max_split_depth: 8,
            min_triangles_per_cell: 256,
            decimation: DecimationConfig::default(),
            jpeg_quality: 85,
            max_atlas_size: 4096,
            atlas_padding: 2,
            bounding_volume: BoundingVolumeKind::Box,
            root_geometric_error: None,
            worker_threads: 0,
            parallel_split_threshold: 4096,
            keep_partial_output: false,
        }
    }
}

impl SlicingConfig {
    /// Read and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SlicingConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tile_size.is_finite() || self.tile_size <= 0.0 {
            return Err(ConfigError::invalid("tile_size", format!("{} must be > 0", self.tile_size)));
        }
        if self.lod_levels == 0 {
            return Err(ConfigError::invalid("lod_levels", "at least one level is required"));
        }
        if !(self.lod_reduction_ratio > 0.0 && self.lod_reduction_ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "lod_reduction_ratio",
                format!("{} is outside (0, 1]", self.lod_reduction_ratio),
            ));
        }
        if let Some(ratios) = &self.lod_ratios {
            if ratios.len() != self.lod_levels as usize {
                return Err(ConfigError::invalid(
                    "lod_ratios",
                    format!("expected {} entries, got {}", self.lod_levels, ratios.len()),
                ));
            }
            if let Some(bad) = ratios.iter().find(|r| !(**r > 0.0 && **r <= 1.0)) {
                return Err(ConfigError::invalid("lod_ratios", format!("{bad} is outside (0, 1]")));
            }
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigError::invalid("jpeg_quality", format!("{} is outside 1..=100", self.jpeg_quality)));
        }
        if !self.max_atlas_size.is_power_of_two() || self.max_atlas_size < 64 {
            return Err(ConfigError::invalid(
                "max_atlas_size",
                format!("{} must be a power of two >= 64", self.max_atlas_size),
            ));
        }
        if !(self.decimation.aggressiveness > 0.0) {
            return Err(ConfigError::invalid("decimation.aggressiveness", "must be > 0"));
        }
        Ok(())
    }

    /// Triangle ratio of LOD `level` relative to the source mesh
    pub fn lod_ratio(&self, level: u32) -> f64 {
        match &self.lod_ratios {
            Some(ratios) => ratios.get(level as usize).copied().unwrap_or(1.0),
            None => self.lod_reduction_ratio.powi(level as i32),
        }
    }

    /// Fixed-tree split depth for LOD `level`; coarser levels get fewer cells
    pub fn split_depth_for_lod(&self, level: u32) -> u32 {
        self.division_depth.min(self.max_split_depth).saturating_sub(level)
    }

    /// KD-tree tile size for LOD `level`
    pub fn tile_size_for_lod(&self, level: u32) -> f64 {
        self.tile_size * 2f64.powi(level as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SlicingConfig::from_json(r#"{ "division_depth": 2, "texture_strategy": "repack-compressed" }"#).unwrap();
        assert_eq!(config.division_depth, 2);
        assert_eq!(config.texture_strategy, TextureStrategy::RepackCompressed);
        assert_eq!(config.lod_levels, 3);
        assert!(config.decimation.preserve_borders);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let err = SlicingConfig::from_json(r#"{ "lod_reduction_ratio": 1.5 }"#).unwrap_err();
        assert!(err.to_string().contains("lod_reduction_ratio"));
    }

    #[test]
    fn test_rejects_mismatched_ratio_list() {
        let err = SlicingConfig::from_json(r#"{ "lod_levels": 2, "lod_ratios": [1.0] }"#).unwrap_err();
        assert!(err.to_string().contains("lod_ratios"));
    }

    #[test]
    fn test_lod_helpers() {
        let config = SlicingConfig {
            division_depth: 3,
            max_split_depth: 2,
            ..Default::default()
        };
        assert_eq!(config.split_depth_for_lod(0), 2);
        assert_eq!(config.split_depth_for_lod(5), 0);
        assert!((config.lod_ratio(2) - 0.25).abs() < 1e-12);
        assert!((config.tile_size_for_lod(1) - 200.0).abs() < 1e-12);

        let explicit = SlicingConfig {
            lod_levels: 3,
            lod_ratios: Some(vec![1.0, 0.7, 0.3]),
            ..Default::default()
        };
        assert!((explicit.lod_ratio(1) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(TextureStrategy::from_str("keep"), Some(TextureStrategy::KeepOriginal));
        assert!(TextureStrategy::RepackCompressed.repacks());
        assert!(TextureStrategy::RepackCompressed.compresses());
        assert!(!TextureStrategy::Repack.compresses());
        assert_eq!(SplitStrategy::from_str("kd"), Some(SplitStrategy::KdTree));
        assert_eq!(OutputFormat::from_str("GLB").map(OutputFormat::extension), Some("glb"));
    }
}
