//! Tileset index: building `tileset.json` from encoded tiles, and reading it back

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::bounds::{BoundingVolume, MIN_BOX_EXTENT};
use super::error::{Tiles3dError, Tiles3dResult};
use super::glb::GENERATOR;
use super::tile::{Tile, TileContent, TileRefine};
use crate::config::{BoundingVolumeKind, OutputFormat, SlicingConfig};
use crate::geo::GeoTransform;
use crate::geometry::BoundingBox3D;
use crate::split::CellKey;

/// Asset metadata for the tileset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilesetAsset {
    /// 3D Tiles version
    pub version: String,
    #[serde(rename = "tilesetVersion", default, skip_serializing_if = "Option::is_none")]
    pub tileset_version: Option<String>,
    #[serde(rename = "gltfUpAxis", default, skip_serializing_if = "Option::is_none")]
    pub gltf_up_axis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
}

/// Root tileset.json structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilesetJson {
    pub asset: TilesetAsset,
    #[serde(rename = "geometricError")]
    pub geometric_error: f64,
    pub root: Tile,
    #[serde(rename = "extensionsUsed", default, skip_serializing_if = "Option::is_none")]
    pub extensions_used: Option<Vec<String>>,
}

impl TilesetJson {
    pub fn to_vec_pretty(&self) -> Tiles3dResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// A loaded 3D Tiles tileset
#[derive(Debug)]
pub struct Tileset {
    /// Base path for resolving relative URIs
    pub base_path: PathBuf,
    pub json: TilesetJson,
}

impl Tileset {
    pub fn load<P: AsRef<Path>>(path: P) -> Tiles3dResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let base_path = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        Self::from_json(&content, base_path)
    }

    pub fn from_json(json_str: &str, base_path: PathBuf) -> Tiles3dResult<Self> {
        let json: TilesetJson = serde_json::from_str(json_str)?;
        Ok(Self { base_path, json })
    }

    pub fn root(&self) -> &Tile {
        &self.json.root
    }

    pub fn version(&self) -> &str {
        &self.json.asset.version
    }

    pub fn geometric_error(&self) -> f64 {
        self.json.geometric_error
    }

    /// Resolve a content URI against the tileset directory
    pub fn resolve_uri(&self, uri: &str) -> PathBuf {
        self.base_path.join(uri.trim_start_matches("./"))
    }

    pub fn tile_count(&self) -> usize {
        self.json.root.count_tiles()
    }

    pub fn max_depth(&self) -> usize {
        self.json.root.max_depth()
    }
}

/// Storage path of a tile, relative to the tileset
pub fn tile_path(level: u32, key: CellKey, format: OutputFormat) -> String {
    format!("lod{}/{}.{}", level, key, format.extension())
}

/// Content uri of a tile as written into the tileset
pub fn tile_uri(level: u32, key: CellKey, format: OutputFormat) -> String {
    format!("./{}", tile_path(level, key, format))
}

/// One successfully encoded tile
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub level: u32,
    pub key: CellKey,
    pub uri: String,
    /// Cell box the tile was cut from
    pub cell_bounds: BoundingBox3D,
    /// Tight bounds of the tile's geometry
    pub content_bounds: BoundingBox3D,
}

fn contains_with_tolerance(cell: &BoundingBox3D, p: DVec3) -> bool {
    let eps = 1e-9 * cell.max_extent().max(1.0);
    let grown = BoundingBox3D::new(cell.min - DVec3::splat(eps), cell.max + DVec3::splat(eps));
    grown.contains_point(p)
}

/// Assembles the tile hierarchy across LOD levels
#[derive(Debug, Clone)]
pub struct TilesetBuilder {
    volume_kind: BoundingVolumeKind,
    root_geometric_error: Option<f64>,
    geo: GeoTransform,
}

impl TilesetBuilder {
    pub fn new(config: &SlicingConfig, geo: GeoTransform) -> Self {
        Self {
            volume_kind: config.bounding_volume,
            root_geometric_error: config.root_geometric_error,
            geo,
        }
    }

    fn volume(&self, bounds: &BoundingBox3D) -> BoundingVolume {
        match self.volume_kind {
            BoundingVolumeKind::Box => BoundingVolume::from_aabb(bounds),
            BoundingVolumeKind::Region => BoundingVolume::region_from_aabb(bounds, &self.geo),
        }
    }

    /// Parent error: `max(extent / 20, 2 * max child error)`; leaves get 0
    fn parent_error(bounds: &BoundingBox3D, children: &[Tile]) -> f64 {
        let max_child = children.iter().map(|c| c.geometric_error).fold(0.0, f64::max);
        (bounds.max_extent().max(MIN_BOX_EXTENT) / 20.0).max(2.0 * max_child)
    }

    /// Link `tiles` (any LOD order) into a tileset rooted at `model_bounds`.
    ///
    /// Each tile hangs under the nearest coarser-LOD tile whose cell box
    /// contains its cell centre; tiles without one go to the root.
    pub fn build(&self, tiles: &[TileRecord], model_bounds: &BoundingBox3D) -> Tiles3dResult<TilesetJson> {
        if tiles.is_empty() {
            return Err(Tiles3dError::InvalidTileset("no tiles to index".into()));
        }

        let mut order: Vec<usize> = (0..tiles.len()).collect();
        order.sort_by_key(|&i| (std::cmp::Reverse(tiles[i].level), tiles[i].key));
        let levels: BTreeSet<u32> = tiles.iter().map(|t| t.level).collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); tiles.len()];
        let mut top = Vec::new();
        for &i in &order {
            let tile = &tiles[i];
            let centre = tile.cell_bounds.center();
            let parent = levels
                .range(tile.level + 1..)
                .find_map(|&level| {
                    order
                        .iter()
                        .copied()
                        .find(|&j| tiles[j].level == level && contains_with_tolerance(&tiles[j].cell_bounds, centre))
                });
            match parent {
                Some(j) => children[j].push(i),
                None => top.push(i),
            }
        }

        let mut root = if let [single] = top.as_slice() {
            self.make_tile(tiles, &children, *single).0
        } else {
            let mut bounds = *model_bounds;
            let kids: Vec<Tile> = top
                .iter()
                .map(|&i| {
                    let (tile, child_bounds) = self.make_tile(tiles, &children, i);
                    bounds = bounds.union(&child_bounds);
                    tile
                })
                .collect();
            Tile {
                bounding_volume: self.volume(&bounds),
                geometric_error: Self::parent_error(&bounds, &kids),
                refine: Some(TileRefine::Replace),
                content: None,
                children: kids,
                transform: None,
            }
        };
        root.transform = Some(self.geo.to_cols_array());

        let geometric_error = self.root_geometric_error.unwrap_or(2.0 * root.geometric_error);
        log::debug!(
            "Indexed {} tiles across {} LOD levels (root error {:.3})",
            tiles.len(),
            levels.len(),
            root.geometric_error
        );

        Ok(TilesetJson {
            asset: TilesetAsset {
                version: "1.0".to_string(),
                tileset_version: None,
                gltf_up_axis: Some("Z".to_string()),
                generator: Some(GENERATOR.to_string()),
            },
            geometric_error,
            root,
            extensions_used: None,
        })
    }

    /// Tile `i` with its subtree, and the box enclosing both
    fn make_tile(&self, tiles: &[TileRecord], children: &[Vec<usize>], i: usize) -> (Tile, BoundingBox3D) {
        let record = &tiles[i];
        let mut bounds = record.content_bounds;
        let kids: Vec<Tile> = children[i]
            .iter()
            .map(|&c| {
                let (tile, child_bounds) = self.make_tile(tiles, children, c);
                bounds = bounds.union(&child_bounds);
                tile
            })
            .collect();
        let geometric_error = if kids.is_empty() {
            0.0
        } else {
            Self::parent_error(&bounds, &kids)
        };
        let tile = Tile {
            bounding_volume: self.volume(&bounds),
            geometric_error,
            refine: Some(TileRefine::Replace),
            content: Some(TileContent {
                uri: record.uri.clone(),
                bounding_volume: None,
            }),
            children: kids,
            transform: None,
        };
        (tile, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoOrigin;

    fn aabb(min: [f64; 3], max: [f64; 3]) -> BoundingBox3D {
        BoundingBox3D::new(DVec3::from_array(min), DVec3::from_array(max))
    }

    fn record(level: u32, key: CellKey, cell: BoundingBox3D) -> TileRecord {
        TileRecord {
            level,
            key,
            uri: tile_uri(level, key, OutputFormat::B3dm),
            cell_bounds: cell,
            content_bounds: cell,
        }
    }

    /// lod1: one root cell; lod0: its four quadrants
    fn two_level_records() -> Vec<TileRecord> {
        let root = aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0]);
        let mut records = vec![record(1, CellKey::root(), root)];
        for octant in 0..4u8 {
            let cell = root.child_bounds(octant);
            let cell = BoundingBox3D::new(cell.min.truncate().extend(0.0), cell.max.truncate().extend(1.0));
            records.push(record(0, CellKey::root().child(octant), cell));
        }
        records
    }

    fn builder() -> TilesetBuilder {
        TilesetBuilder::new(&SlicingConfig::default(), GeoTransform::new(GeoOrigin::default()))
    }

    fn assert_errors_decrease(tile: &Tile) {
        for child in &tile.children {
            assert!(child.geometric_error < tile.geometric_error);
            assert_errors_decrease(child);
        }
    }

    #[test]
    fn test_two_levels_nest_under_single_root() {
        let records = two_level_records();
        let model = aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0]);
        let tileset = builder().build(&records, &model).unwrap();

        let root = &tileset.root;
        assert_eq!(root.content_uri(), Some("./lod1/0-0-0-0.b3dm"));
        assert_eq!(root.children.len(), 4);
        assert!(root.transform.is_some());
        assert!(root.children.iter().all(|c| c.geometric_error == 0.0));
        assert!((root.geometric_error - 0.5).abs() < 1e-12);
        assert!((tileset.geometric_error - 1.0).abs() < 1e-12);
        assert_eq!(tileset.asset.gltf_up_axis.as_deref(), Some("Z"));
        assert_errors_decrease(root);
        root.walk(&mut |t| assert_eq!(t.refine, Some(TileRefine::Replace)));
    }

    #[test]
    fn test_multiple_coarse_tiles_get_synthetic_root() {
        let left = aabb([0.0, 0.0, 0.0], [5.0, 10.0, 1.0]);
        let right = aabb([5.0, 0.0, 0.0], [10.0, 10.0, 1.0]);
        let records = vec![
            record(1, CellKey::new(1, 0, 0, 0), left),
            record(1, CellKey::new(1, 1, 0, 0), right),
            record(0, CellKey::new(2, 3, 0, 0), aabb([7.5, 0.0, 0.0], [10.0, 5.0, 1.0])),
        ];
        let tileset = builder().build(&records, &aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0])).unwrap();
        let root = &tileset.root;
        assert!(root.content.is_none());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].children.len(), 1);
        assert_eq!(root.count_tiles(), 4);
        assert_errors_decrease(root);
    }

    #[test]
    fn test_orphan_reattaches_to_root() {
        let mut records = two_level_records();
        // the coarse cell failed; its children move up
        records.remove(0);
        let tileset = builder().build(&records, &aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0])).unwrap();
        assert!(tileset.root.content.is_none());
        assert_eq!(tileset.root.children.len(), 4);
        assert!(tileset.root.geometric_error > 0.0);
    }

    #[test]
    fn test_root_error_override_and_region() {
        let config = SlicingConfig {
            root_geometric_error: Some(42.0),
            bounding_volume: BoundingVolumeKind::Region,
            ..Default::default()
        };
        let geo = GeoTransform::new(GeoOrigin::new(10.0, 45.0, 0.0).unwrap());
        let tileset = TilesetBuilder::new(&config, geo)
            .build(&two_level_records(), &aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0]))
            .unwrap();
        assert_eq!(tileset.geometric_error, 42.0);
        assert!(matches!(tileset.root.bounding_volume, BoundingVolume::Region(_)));
    }

    #[test]
    fn test_serialized_tileset_parses_back() {
        let tileset = builder()
            .build(&two_level_records(), &aabb([0.0, 0.0, 0.0], [10.0, 10.0, 1.0]))
            .unwrap();
        let bytes = tileset.to_vec_pretty().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"geometricError\""));
        assert!(text.contains("\"boundingVolume\""));
        assert!(text.contains("\"REPLACE\""));

        let parsed = Tileset::from_json(&text, PathBuf::from("/data")).unwrap();
        assert_eq!(parsed.version(), "1.0");
        assert_eq!(parsed.tile_count(), 5);
        assert_eq!(parsed.max_depth(), 2);
        assert_eq!(parsed.json, tileset);
        assert_eq!(
            parsed.resolve_uri("./lod0/1-0-0-0.b3dm"),
            PathBuf::from("/data/lod0/1-0-0-0.b3dm")
        );
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = builder().build(&[], &aabb([0.0; 3], [1.0; 3])).unwrap_err();
        assert!(matches!(err, Tiles3dError::InvalidTileset(_)));
    }
}
