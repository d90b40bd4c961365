//! Texture decoding, caching and re-encoding.
//!
//! Decoded images are shared across cells through [`TextureCache`]; the
//! encoder only ever sees [`EncodedImage`]s.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, DynamicImage, ImageEncoder, RgbaImage};
use parking_lot::RwLock;

use super::{PackingError, PackingResult};
use crate::geometry::{TextureRef, TextureSource};

pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

/// Encoded image ready to embed in a tile
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl EncodedImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Mime type for a file extension glTF can embed directly
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some(MIME_PNG),
        "jpg" | "jpeg" => Some(MIME_JPEG),
        _ => None,
    }
}

/// Read-mostly cache of decoded textures keyed by texture id
#[derive(Debug, Default)]
pub struct TextureCache {
    images: RwLock<HashMap<String, Arc<RgbaImage>>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded pixels of `texture`, decoding on first use
    pub fn get(&self, texture: &TextureRef) -> PackingResult<Arc<RgbaImage>> {
        if let Some(image) = self.images.read().get(&texture.id) {
            return Ok(Arc::clone(image));
        }

        let decoded = Arc::new(decode_texture(texture)?);
        let mut images = self.images.write();
        // another worker may have decoded it meanwhile; keep the first
        let entry = images.entry(texture.id.clone()).or_insert(decoded);
        Ok(Arc::clone(entry))
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}

/// Source bytes of `texture` and their mime type, without decoding
pub fn read_texture_bytes(texture: &TextureRef) -> PackingResult<EncodedImage> {
    match &texture.source {
        TextureSource::Encoded { bytes, mime_type } => Ok(EncodedImage::new(Arc::clone(bytes), mime_type.clone())),
        TextureSource::File(path) => {
            let bytes = std::fs::read(path).map_err(|e| PackingError::texture(&texture.id, e))?;
            match mime_for_path(path) {
                Some(mime) => Ok(EncodedImage::new(bytes, mime)),
                // glTF only embeds PNG/JPEG
                None => {
                    let image = image::load_from_memory(&bytes).map_err(|e| PackingError::texture(&texture.id, e))?;
                    Ok(EncodedImage::new(encode_png(&image.to_rgba8())?, MIME_PNG))
                }
            }
        }
    }
}

pub fn decode_texture(texture: &TextureRef) -> PackingResult<RgbaImage> {
    let image = match &texture.source {
        TextureSource::File(path) => image::open(path).map_err(|e| PackingError::texture(&texture.id, e))?,
        TextureSource::Encoded { bytes, .. } => {
            image::load_from_memory(bytes).map_err(|e| PackingError::texture(&texture.id, e))?
        }
    };
    Ok(image.to_rgba8())
}

pub fn encode_png(image: &RgbaImage) -> PackingResult<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new_with_quality(&mut bytes, CompressionType::Default, FilterType::Adaptive)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(PackingError::Encode)?;
    Ok(bytes)
}

/// JPEG has no alpha; the channel is dropped
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> PackingResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(PackingError::Encode)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn test_cache_decodes_once() {
        let png = encode_png(&checker(4)).unwrap();
        let texture = TextureRef::encoded("checker", png, MIME_PNG);
        let cache = TextureCache::new();
        let a = cache.get(&texture).unwrap();
        let b = cache.get(&texture).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert_eq!(a.get_pixel(1, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_missing_file_is_texture_error() {
        let cache = TextureCache::new();
        let err = cache.get(&TextureRef::from_file("/nonexistent/tex.png")).unwrap_err();
        assert!(matches!(err, PackingError::Texture { .. }));
    }

    #[test]
    fn test_jpeg_round_trip_dimensions() {
        let jpeg = encode_jpeg(&checker(16), 80).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_read_bytes_keeps_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, encode_png(&checker(2)).unwrap()).unwrap();
        let encoded = read_texture_bytes(&TextureRef::from_file(&path)).unwrap();
        assert_eq!(encoded.mime_type, MIME_PNG);
        assert_eq!(&encoded.bytes[1..4], b"PNG");
    }
}
