// src/atlas/repack.rs
// Per-cell texture handling: keep, compress or repack into one atlas
// RELEVANT FILES: src/atlas/maxrects.rs, src/atlas/texture.rs, src/tiles3d/glb.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::DVec2;
use image::RgbaImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::maxrects::{FreeRectChoiceHeuristic, MaxRectsBinPack};
use super::texture::{encode_jpeg, encode_png, read_texture_bytes, EncodedImage, TextureCache, MIME_JPEG, MIME_PNG};
use super::{PackingError, PackingResult};
use crate::config::{SlicingConfig, TextureStrategy};
use crate::geometry::{Face, Material, Mesh, TextureRef, TextureSource};

/// Texture id of the per-cell atlas inside a tile
pub const ATLAS_TEXTURE_ID: &str = "atlas";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasSettings {
    pub strategy: TextureStrategy,
    pub jpeg_quality: u8,
    pub max_atlas_size: u32,
    pub padding: u32,
}

impl AtlasSettings {
    pub fn from_config(config: &SlicingConfig) -> Self {
        Self {
            strategy: config.texture_strategy,
            jpeg_quality: config.jpeg_quality,
            max_atlas_size: config.max_atlas_size,
            padding: config.atlas_padding,
        }
    }
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self::from_config(&SlicingConfig::default())
    }
}

/// Sub-rectangle of the atlas in UV space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvRegion {
    pub min: DVec2,
    pub max: DVec2,
}

/// Packed atlas for one cell
#[derive(Debug, Clone)]
pub struct TextureAtlasResult {
    pub width: u32,
    pub height: u32,
    /// Source texture id -> where its region landed
    pub regions: BTreeMap<String, UvRegion>,
    pub image: EncodedImage,
    pub occupancy: f64,
}

/// Cell mesh with its materials pointing at the images to embed
#[derive(Debug, Clone)]
pub struct CellTextures {
    pub mesh: Mesh,
    /// Texture id -> encoded image
    pub images: BTreeMap<String, EncodedImage>,
    pub atlas: Option<TextureAtlasResult>,
}

/// Region of one source texture referenced by the cell, in source pixels
struct SourceRegion {
    id: String,
    image: Arc<RgbaImage>,
    x0: i64,
    y0: i64,
    width: u32,
    height: u32,
}

/// Apply the configured texture strategy to a cell.
///
/// Repacking failures fall back to keep-original; unreadable textures are
/// left out of `images`, so their faces are encoded untextured.
pub fn prepare_cell_textures(mesh: &Mesh, cache: &TextureCache, settings: &AtlasSettings) -> CellTextures {
    if settings.strategy.repacks() {
        match repack_cell(mesh, cache, settings) {
            Ok(Some((mesh, atlas))) => {
                let mut images = BTreeMap::new();
                images.insert(ATLAS_TEXTURE_ID.to_string(), atlas.image.clone());
                return CellTextures {
                    mesh,
                    images,
                    atlas: Some(atlas),
                };
            }
            Ok(None) => {}
            Err(e) => warn!("Atlas repack failed, keeping original textures: {}", e),
        }
        return keep_original(mesh);
    }

    match settings.strategy {
        TextureStrategy::Compress => compress(mesh, cache, settings.jpeg_quality),
        _ => keep_original(mesh),
    }
}

fn used_textures(mesh: &Mesh) -> BTreeMap<String, TextureRef> {
    let mut textures = BTreeMap::new();
    for face in mesh.faces() {
        if let Some(texture) = &mesh.materials()[face.material as usize].texture {
            textures.entry(texture.id.clone()).or_insert_with(|| texture.clone());
        }
    }
    textures
}

fn keep_original(mesh: &Mesh) -> CellTextures {
    let mut images = BTreeMap::new();
    for (id, texture) in used_textures(mesh) {
        match read_texture_bytes(&texture) {
            Ok(image) => {
                images.insert(id, image);
            }
            Err(e) => warn!("Dropping texture, using material color: {}", e),
        }
    }
    CellTextures {
        mesh: mesh.clone(),
        images,
        atlas: None,
    }
}

fn compress(mesh: &Mesh, cache: &TextureCache, quality: u8) -> CellTextures {
    let mut images = BTreeMap::new();
    for (id, texture) in used_textures(mesh) {
        let encoded = cache.get(&texture).and_then(|image| encode_jpeg(&image, quality));
        match encoded {
            Ok(bytes) => {
                images.insert(id, EncodedImage::new(bytes, MIME_JPEG));
            }
            Err(e) => warn!("Dropping texture, using material color: {}", e),
        }
    }
    CellTextures {
        mesh: mesh.clone(),
        images,
        atlas: None,
    }
}

/// Pack the texture regions referenced by `mesh` into one atlas and remap
/// its UVs. `Ok(None)` when no face samples a texture.
pub fn repack_cell(
    mesh: &Mesh,
    cache: &TextureCache,
    settings: &AtlasSettings,
) -> PackingResult<Option<(Mesh, TextureAtlasResult)>> {
    let regions = collect_regions(mesh, cache, settings)?;
    if regions.is_empty() {
        return Ok(None);
    }

    let pad = settings.padding;
    let sizes: Vec<(u32, u32)> = regions.iter().map(|r| (r.width + 2 * pad, r.height + 2 * pad)).collect();
    let (side, rects, occupancy) = pack(&sizes, settings.max_atlas_size)?;

    let mut atlas = RgbaImage::new(side, side);
    let atlas_side = side as f64;
    let mut transforms: HashMap<String, (DVec2, DVec2)> = HashMap::new();
    let mut uv_regions = BTreeMap::new();

    for (region, rect) in regions.iter().zip(&rects) {
        let (src_w, src_h) = region.image.dimensions();
        for dy in 0..rect.height {
            for dx in 0..rect.width {
                let sx = (region.x0 - pad as i64 + dx as i64).rem_euclid(src_w as i64) as u32;
                let sy = (region.y0 - pad as i64 + dy as i64).rem_euclid(src_h as i64) as u32;
                atlas.put_pixel(rect.x + dx, rect.y + dy, *region.image.get_pixel(sx, sy));
            }
        }

        // inner placement, excluding padding
        let ax = (rect.x + pad) as f64;
        let ay = (rect.y + pad) as f64;
        let w = src_w as f64;
        let h = src_h as f64;
        let scale = DVec2::new(w / atlas_side, h / atlas_side);
        let offset = DVec2::new(
            (ax - region.x0 as f64) / atlas_side,
            1.0 - (ay + h - region.y0 as f64) / atlas_side,
        );
        transforms.insert(region.id.clone(), (scale, offset));
        uv_regions.insert(
            region.id.clone(),
            UvRegion {
                min: DVec2::new(ax / atlas_side, 1.0 - (ay + region.height as f64) / atlas_side),
                max: DVec2::new((ax + region.width as f64) / atlas_side, 1.0 - ay / atlas_side),
            },
        );
    }

    let image = if settings.strategy.compresses() {
        EncodedImage::new(encode_jpeg(&atlas, settings.jpeg_quality)?, MIME_JPEG)
    } else {
        EncodedImage::new(encode_png(&atlas)?, MIME_PNG)
    };

    let remapped = remap_uvs(mesh, &transforms, &image)?;
    debug!(
        "Packed {} texture regions into {}x{} atlas ({:.1}% used)",
        regions.len(),
        side,
        side,
        occupancy * 100.0
    );

    Ok(Some((
        remapped,
        TextureAtlasResult {
            width: side,
            height: side,
            regions: uv_regions,
            image,
            occupancy,
        },
    )))
}

/// Largest texture coordinate magnitude accepted for repacking
const MAX_UV_REPEAT: f64 = 1.0e6;

/// UV bounds per texture, converted to source pixel rectangles
fn collect_regions(mesh: &Mesh, cache: &TextureCache, settings: &AtlasSettings) -> PackingResult<Vec<SourceRegion>> {
    let mut bounds: BTreeMap<String, (TextureRef, DVec2, DVec2)> = BTreeMap::new();
    for face in mesh.faces() {
        let (Some(uvs), Some(texture)) = (face.uvs, &mesh.materials()[face.material as usize].texture) else {
            continue;
        };
        let entry = bounds
            .entry(texture.id.clone())
            .or_insert_with(|| (texture.clone(), DVec2::splat(f64::INFINITY), DVec2::splat(f64::NEG_INFINITY)));
        for t in uvs {
            let uv = mesh.uvs()[t as usize];
            entry.1 = entry.1.min(uv);
            entry.2 = entry.2.max(uv);
        }
    }

    let limit = settings.max_atlas_size as i64 - 2 * settings.padding as i64;
    let mut regions = Vec::with_capacity(bounds.len());
    for (id, (texture, min, max)) in bounds {
        if !min.is_finite() || !max.is_finite() {
            return Err(PackingError::texture(&id, "non-finite texture coordinates"));
        }
        if min.min_element() < -MAX_UV_REPEAT || max.max_element() > MAX_UV_REPEAT {
            return Err(PackingError::texture(&id, "texture coordinates out of range"));
        }
        let image = cache.get(&texture)?;
        let (w, h) = (image.width() as f64, image.height() as f64);

        // image rows run top-down, v runs bottom-up
        let x0 = (min.x * w).floor() as i64;
        let x1 = (max.x * w).ceil() as i64;
        let y0 = ((1.0 - max.y) * h).floor() as i64;
        let y1 = ((1.0 - min.y) * h).ceil() as i64;
        let width = x1.saturating_sub(x0).max(1);
        let height = y1.saturating_sub(y0).max(1);
        if width > limit || height > limit {
            return Err(PackingError::RegionTooLarge {
                id,
                width: width.max(0) as u64,
                height: height.max(0) as u64,
                max: settings.max_atlas_size,
            });
        }
        regions.push(SourceRegion {
            id,
            image,
            x0,
            y0,
            width: width as u32,
            height: height as u32,
        });
    }
    Ok(regions)
}

/// Smallest power-of-two square that holds every rectangle
fn pack(sizes: &[(u32, u32)], max_size: u32) -> PackingResult<(u32, Vec<super::Rect>, f64)> {
    let area: u64 = sizes.iter().map(|&(w, h)| w as u64 * h as u64).sum();
    let longest = sizes.iter().map(|&(w, h)| w.max(h)).max().unwrap_or(1);
    let mut side = ((area as f64).sqrt().ceil() as u32).max(longest).max(1).next_power_of_two();

    while side <= max_size {
        let mut bin = MaxRectsBinPack::new(side, side, false);
        if let Some(rects) = bin.insert_all(sizes, FreeRectChoiceHeuristic::BestShortSideFit) {
            return Ok((side, rects, bin.occupancy()));
        }
        side *= 2;
    }
    Err(PackingError::AtlasOverflow {
        regions: sizes.len(),
        max: max_size,
    })
}

fn remap_uvs(mesh: &Mesh, transforms: &HashMap<String, (DVec2, DVec2)>, image: &EncodedImage) -> PackingResult<Mesh> {
    let atlas_ref = TextureRef {
        id: ATLAS_TEXTURE_ID.to_string(),
        source: TextureSource::Encoded {
            bytes: Arc::clone(&image.bytes),
            mime_type: image.mime_type.clone(),
        },
    };

    let face_transform: Vec<Option<(DVec2, DVec2)>> = mesh
        .materials()
        .iter()
        .map(|m| m.texture.as_ref().and_then(|t| transforms.get(&t.id).copied()))
        .collect();
    let materials: Vec<Material> = mesh
        .materials()
        .iter()
        .zip(&face_transform)
        .map(|(m, transform)| {
            let mut m = m.clone();
            if transform.is_some() {
                m.texture = Some(atlas_ref.clone());
            }
            m
        })
        .collect();

    // a UV index may be shared by faces sampling different textures
    let mut uvs = Vec::with_capacity(mesh.uvs().len());
    let mut uv_map: HashMap<(u32, u32), u32> = HashMap::new();
    let mut faces = Vec::with_capacity(mesh.face_count());
    for face in mesh.faces() {
        let transform = face_transform[face.material as usize];
        let new_uvs = face.uvs.map(|corner| {
            corner.map(|t| {
                let key = (t, if transform.is_some() { face.material } else { u32::MAX });
                *uv_map.entry(key).or_insert_with(|| {
                    let uv = mesh.uvs()[t as usize];
                    uvs.push(match transform {
                        Some((scale, offset)) => uv * scale + offset,
                        None => uv,
                    });
                    (uvs.len() - 1) as u32
                })
            })
        });
        faces.push(Face::new(face.vertices, new_uvs, face.material));
    }

    Ok(Mesh::new(mesh.vertices().to_vec(), uvs, faces, Arc::from(materials))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshBuilder;
    use glam::DVec3;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn png_texture(id: &str, image: &RgbaImage) -> TextureRef {
        TextureRef::encoded(id, encode_png(image).unwrap(), MIME_PNG)
    }

    fn textured_material(name: &str, texture: TextureRef) -> Material {
        Material {
            texture: Some(texture),
            ..Material::named(name)
        }
    }

    /// One triangle per material, each with its own UVs
    fn triangles(materials: Vec<Material>, uvs: &[[DVec2; 3]]) -> Mesh {
        let mut builder = MeshBuilder::new(Arc::from(materials));
        for (i, tri) in uvs.iter().enumerate() {
            let base = DVec3::new(i as f64 * 2.0, 0.0, 0.0);
            let v = [
                builder.push_vertex(base),
                builder.push_vertex(base + DVec3::X),
                builder.push_vertex(base + DVec3::Y),
            ];
            let t = tri.map(|uv| builder.push_uv(uv));
            builder.push_face(Face::new(v, Some(t), i as u32));
        }
        builder.build().unwrap()
    }

    fn centroid_uv(mesh: &Mesh, face: usize) -> DVec2 {
        let t = mesh.faces()[face].uvs.unwrap();
        t.iter().map(|&i| mesh.uvs()[i as usize]).sum::<DVec2>() / 3.0
    }

    fn sample(atlas: &RgbaImage, uv: DVec2) -> Rgba<u8> {
        let x = (uv.x * atlas.width() as f64).floor() as u32;
        let y = ((1.0 - uv.y) * atlas.height() as f64).floor() as u32;
        *atlas.get_pixel(x, y)
    }

    fn repack_settings() -> AtlasSettings {
        AtlasSettings {
            strategy: TextureStrategy::Repack,
            ..Default::default()
        }
    }

    #[test]
    fn test_repack_preserves_sampled_colors() {
        let red = png_texture("red", &RgbaImage::from_pixel(8, 8, RED));
        let green = png_texture("green", &RgbaImage::from_pixel(4, 4, GREEN));
        let full = [DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0), DVec2::new(0.0, 1.0)];
        let mesh = triangles(vec![textured_material("a", red), textured_material("b", green)], &[full, full]);

        let cache = TextureCache::new();
        let (remapped, atlas) = repack_cell(&mesh, &cache, &repack_settings()).unwrap().unwrap();
        assert!(atlas.width.is_power_of_two() && atlas.width <= 4096);
        assert!(atlas.occupancy > 0.0 && atlas.occupancy <= 1.0);
        assert_eq!(atlas.regions.len(), 2);
        for m in remapped.materials() {
            assert_eq!(m.texture.as_ref().map(|t| t.id.as_str()), Some(ATLAS_TEXTURE_ID));
        }

        let pixels = image::load_from_memory(&atlas.image.bytes).unwrap().to_rgba8();
        assert_eq!(sample(&pixels, centroid_uv(&remapped, 0)), RED);
        assert_eq!(sample(&pixels, centroid_uv(&remapped, 1)), GREEN);

        for region in atlas.regions.values() {
            assert!(region.min.x >= 0.0 && region.max.x <= 1.0);
            assert!(region.min.y >= 0.0 && region.max.y <= 1.0);
        }
    }

    #[test]
    fn test_repack_wraps_out_of_range_uvs() {
        let split = RgbaImage::from_fn(8, 8, |x, _| if x < 4 { RED } else { BLUE });
        let uvs = [DVec2::new(1.0, 0.0), DVec2::new(1.5, 0.0), DVec2::new(1.0, 1.0)];
        let mesh = triangles(vec![textured_material("a", png_texture("split", &split))], &[uvs]);

        let (remapped, atlas) = repack_cell(&mesh, &TextureCache::new(), &repack_settings()).unwrap().unwrap();
        let pixels = image::load_from_memory(&atlas.image.bytes).unwrap().to_rgba8();
        assert_eq!(sample(&pixels, centroid_uv(&remapped, 0)), RED);
    }

    #[test]
    fn test_untextured_cell_has_no_atlas() {
        let full = [DVec2::ZERO, DVec2::X, DVec2::Y];
        let mesh = triangles(vec![Material::named("plain")], &[full]);
        assert!(repack_cell(&mesh, &TextureCache::new(), &repack_settings()).unwrap().is_none());
        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &repack_settings());
        assert!(cell.images.is_empty());
        assert!(cell.atlas.is_none());
    }

    #[test]
    fn test_oversized_region_falls_back_to_original() {
        let tiled = [DVec2::ZERO, DVec2::new(100.0, 0.0), DVec2::new(0.0, 100.0)];
        let mesh = triangles(
            vec![textured_material("a", png_texture("tiled", &RgbaImage::from_pixel(8, 8, RED)))],
            &[tiled],
        );
        let settings = AtlasSettings {
            max_atlas_size: 64,
            ..repack_settings()
        };
        let err = repack_cell(&mesh, &TextureCache::new(), &settings).unwrap_err();
        assert!(matches!(err, PackingError::RegionTooLarge { .. }));

        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &settings);
        assert!(cell.atlas.is_none());
        assert_eq!(cell.images.get("tiled").map(|i| i.mime_type.as_str()), Some(MIME_PNG));
        assert_eq!(cell.mesh.uvs(), mesh.uvs());
    }

    #[test]
    fn test_huge_uvs_fall_back_to_original() {
        let far = [DVec2::splat(-1.0e300), DVec2::new(1.0e300, 0.0), DVec2::new(0.0, 1.0e300)];
        let mesh = triangles(
            vec![textured_material("a", png_texture("far", &RgbaImage::from_pixel(8, 8, RED)))],
            &[far],
        );
        let err = repack_cell(&mesh, &TextureCache::new(), &repack_settings()).unwrap_err();
        assert!(matches!(err, PackingError::Texture { .. }));

        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &repack_settings());
        assert!(cell.atlas.is_none());
        assert_eq!(cell.mesh.uvs(), mesh.uvs());
    }

    #[test]
    fn test_compress_reencodes_as_jpeg() {
        let full = [DVec2::ZERO, DVec2::X, DVec2::Y];
        let mesh = triangles(
            vec![textured_material("a", png_texture("red", &RgbaImage::from_pixel(8, 8, RED)))],
            &[full],
        );
        let settings = AtlasSettings {
            strategy: TextureStrategy::Compress,
            ..Default::default()
        };
        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &settings);
        assert_eq!(cell.images["red"].mime_type, MIME_JPEG);
    }

    #[test]
    fn test_repack_compressed_atlas_is_jpeg() {
        let full = [DVec2::ZERO, DVec2::X, DVec2::Y];
        let mesh = triangles(
            vec![textured_material("a", png_texture("red", &RgbaImage::from_pixel(8, 8, RED)))],
            &[full],
        );
        let settings = AtlasSettings {
            strategy: TextureStrategy::RepackCompressed,
            ..Default::default()
        };
        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &settings);
        assert_eq!(cell.images[ATLAS_TEXTURE_ID].mime_type, MIME_JPEG);
    }

    #[test]
    fn test_missing_texture_is_dropped() {
        let full = [DVec2::ZERO, DVec2::X, DVec2::Y];
        let mesh = triangles(
            vec![textured_material("a", TextureRef::from_file("/nonexistent/missing.png"))],
            &[full],
        );
        let cell = prepare_cell_textures(&mesh, &TextureCache::new(), &AtlasSettings::default());
        assert!(cell.images.is_empty());
    }
}
