//! Tile structure for 3D Tiles

use glam::DMat4;
use serde::{Deserialize, Serialize};

use super::bounds::BoundingVolume;

/// Refinement strategy for child tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TileRefine {
    /// Replace parent tile with children
    #[default]
    Replace,
    /// Add children to parent tile
    Add,
}

/// Content description for a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileContent {
    /// URI of the tile payload, relative to the tileset
    pub uri: String,
    #[serde(rename = "boundingVolume", default, skip_serializing_if = "Option::is_none")]
    pub bounding_volume: Option<BoundingVolume>,
}

/// A single tile in the 3D Tiles hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    #[serde(rename = "boundingVolume")]
    pub bounding_volume: BoundingVolume,
    /// Geometric error in meters (controls LOD selection)
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine: Option<TileRefine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TileContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Tile>,
    /// 4x4 column-major transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
}

impl Tile {
    pub fn get_transform(&self) -> DMat4 {
        self.transform
            .map(|t| DMat4::from_cols_array(&t))
            .unwrap_or(DMat4::IDENTITY)
    }

    /// Get effective refinement strategy (inherits from parent if not specified)
    pub fn effective_refine(&self, parent_refine: TileRefine) -> TileRefine {
        self.refine.unwrap_or(parent_refine)
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    pub fn content_uri(&self) -> Option<&str> {
        self.content.as_ref().map(|c| c.uri.as_str())
    }

    /// Count total tiles in this subtree
    pub fn count_tiles(&self) -> usize {
        1 + self.children.iter().map(|c| c.count_tiles()).sum::<usize>()
    }

    /// Get maximum depth of this subtree
    pub fn max_depth(&self) -> usize {
        if self.children.is_empty() {
            1
        } else {
            1 + self.children.iter().map(|c| c.max_depth()).max().unwrap_or(0)
        }
    }

    /// Depth-first visit of this tile and every descendant
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Tile)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Every content uri in this subtree, depth-first
    pub fn content_uris(&self) -> Vec<&str> {
        let mut uris = Vec::new();
        self.walk(&mut |tile| uris.extend(tile.content_uri()));
        uris
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            bounding_volume: BoundingVolume::default(),
            geometric_error: 0.0,
            refine: None,
            content: None,
            children: Vec::new(),
            transform: None,
        }
    }
}
