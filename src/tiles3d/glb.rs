// src/tiles3d/glb.rs
// Binary glTF writer and reader for tile payloads
// RELEVANT FILES: src/tiles3d/b3dm.rs, src/atlas/repack.rs, src/io/loader.rs

//! GLB encoding of a cell mesh.
//!
//! Each used material becomes one primitive with its own POSITION, NORMAL,
//! optional TEXCOORD_0, `_BATCHID` and index buffer views; images are
//! embedded in the binary chunk. Materials are unlit. Texture coordinates
//! are stored with V flipped to glTF's top-left origin and flipped back on
//! decode.

use std::collections::{BTreeMap, HashMap};

use glam::{DVec2, DVec3};
use serde_json::{json, Value};

use super::b3dm::{decode_b3dm, encode_b3dm_with_names};
use super::error::{Tiles3dError, Tiles3dResult};
use crate::atlas::EncodedImage;
use crate::config::OutputFormat;
use crate::geometry::{BoundingBox3D, Face, GeometryResult, Material, Mesh, MeshBuilder, TextureRef, TextureSource};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;

const BYTE: u64 = 5120;
const UNSIGNED_BYTE: u64 = 5121;
const SHORT: u64 = 5122;
const UNSIGNED_SHORT: u64 = 5123;
const UNSIGNED_INT: u64 = 5125;
const FLOAT: u64 = 5126;

const LINEAR: u32 = 9729;
const LINEAR_MIPMAP_LINEAR: u32 = 9987;
const REPEAT: u32 = 10497;

pub const UNLIT_EXTENSION: &str = "KHR_materials_unlit";
pub const GENERATOR: &str = concat!("tileforge ", env!("CARGO_PKG_VERSION"));

/// Encode a cell mesh as a tile payload in `format`.
///
/// `images` maps texture ids referenced by the mesh's materials to the bytes
/// to embed; materials whose texture is missing from it are written untextured.
pub fn encode_tile(mesh: &Mesh, images: &BTreeMap<String, EncodedImage>, format: OutputFormat) -> Tiles3dResult<Vec<u8>> {
    let glb = build_glb(mesh, images)?;
    match format {
        OutputFormat::Glb => Ok(glb.bytes),
        OutputFormat::B3dm => encode_b3dm_with_names(&glb.bytes, &glb.batch_names),
    }
}

/// Encoded GLB plus the feature names its `_BATCHID`s refer to
#[derive(Debug, Clone)]
pub struct GlbPayload {
    pub bytes: Vec<u8>,
    /// One entry per batch id (= per primitive)
    pub batch_names: Vec<String>,
}

struct Primitive {
    material: u32,
    textured: bool,
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

/// Binary chunk under construction; every view starts 4-byte aligned
#[derive(Default)]
struct BufferWriter {
    data: Vec<u8>,
    views: Vec<Value>,
}

impl BufferWriter {
    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.data.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.data.extend_from_slice(bytes);
        self.views.push(view);
        self.views.len() - 1
    }
}

/// Area-weighted vertex normals; isolated or degenerate vertices get +Z
fn vertex_normals(mesh: &Mesh) -> Vec<DVec3> {
    let mut normals = vec![DVec3::ZERO; mesh.vertex_count()];
    for face in mesh.faces() {
        let [a, b, c] = face.vertices.map(|v| mesh.vertices()[v as usize]);
        let weighted = (b - a).cross(c - a);
        for v in face.vertices {
            normals[v as usize] += weighted;
        }
    }
    normals
        .into_iter()
        .map(|n| {
            let len = n.length();
            if len > 0.0 && len.is_finite() {
                n / len
            } else {
                DVec3::Z
            }
        })
        .collect()
}

fn to_f32(p: DVec3) -> Tiles3dResult<[f32; 3]> {
    let out = [p.x as f32, p.y as f32, p.z as f32];
    if out.iter().all(|c| c.is_finite()) {
        Ok(out)
    } else {
        Err(Tiles3dError::Encoding(format!("position {p} is not representable as f32")))
    }
}

fn assemble_primitives(mesh: &Mesh, images: &BTreeMap<String, EncodedImage>) -> Tiles3dResult<Vec<Primitive>> {
    let normals = vertex_normals(mesh);
    let mut by_material: BTreeMap<u32, Vec<&Face>> = BTreeMap::new();
    for face in mesh.faces() {
        by_material.entry(face.material).or_default().push(face);
    }

    let mut primitives = Vec::with_capacity(by_material.len());
    for (material, faces) in by_material {
        let textured = mesh.materials()[material as usize]
            .texture
            .as_ref()
            .is_some_and(|t| images.contains_key(&t.id))
            && faces.iter().any(|f| f.uvs.is_some());

        let mut primitive = Primitive {
            material,
            textured,
            positions: Vec::new(),
            normals: Vec::new(),
            uvs: Vec::new(),
            indices: Vec::with_capacity(faces.len() * 3),
        };
        // one glTF vertex per distinct (position, uv) corner
        let mut corners: HashMap<(u32, u32), u32> = HashMap::new();
        for face in faces {
            for k in 0..3 {
                let v = face.vertices[k];
                let t = match (textured, face.uvs) {
                    (true, Some(uvs)) => uvs[k],
                    _ => u32::MAX,
                };
                let index = match corners.get(&(v, t)) {
                    Some(&index) => index,
                    None => {
                        let index = primitive.positions.len() as u32;
                        primitive.positions.push(to_f32(mesh.vertices()[v as usize])?);
                        let n = normals[v as usize];
                        primitive.normals.push([n.x as f32, n.y as f32, n.z as f32]);
                        if textured {
                            let uv = mesh.uvs().get(t as usize).copied().unwrap_or(DVec2::ZERO);
                            primitive.uvs.push([uv.x as f32, (1.0 - uv.y) as f32]);
                        }
                        corners.insert((v, t), index);
                        index
                    }
                };
                primitive.indices.push(index);
            }
        }
        primitives.push(primitive);
    }
    Ok(primitives)
}

/// Smallest index component type for `vertex_count` vertices, and the packed bytes
fn pack_indices(indices: &[u32], vertex_count: usize) -> (u64, Vec<u8>) {
    if vertex_count <= u8::MAX as usize + 1 {
        (UNSIGNED_BYTE, indices.iter().map(|&i| i as u8).collect())
    } else if vertex_count <= u16::MAX as usize + 1 {
        let short: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
        (UNSIGNED_SHORT, bytemuck::cast_slice(&short).to_vec())
    } else {
        (UNSIGNED_INT, bytemuck::cast_slice(indices).to_vec())
    }
}

fn material_json(material: &Material, texture: Option<usize>) -> Value {
    let mut pbr = json!({
        "baseColorFactor": material.diffuse_color,
        "metallicFactor": 0.0,
        "roughnessFactor": 1.0,
    });
    if let Some(index) = texture {
        pbr["baseColorTexture"] = json!({ "index": index });
    }
    let mut out = json!({
        "name": material.name,
        "pbrMetallicRoughness": pbr,
        "doubleSided": true,
        "extensions": { UNLIT_EXTENSION: {} },
    });
    if material.diffuse_color[3] < 1.0 {
        out["alphaMode"] = json!("BLEND");
    }
    out
}

/// Build a GLB for `mesh`, one primitive per used material
pub fn build_glb(mesh: &Mesh, images: &BTreeMap<String, EncodedImage>) -> Tiles3dResult<GlbPayload> {
    if mesh.is_empty() {
        return Err(Tiles3dError::Encoding("mesh has no faces".into()));
    }

    let primitives = assemble_primitives(mesh, images)?;
    let mut buffer = BufferWriter::default();
    let mut accessors = Vec::new();
    let mut gltf_primitives = Vec::new();
    let mut materials = Vec::new();
    let mut textures = Vec::new();
    let mut gltf_images = Vec::new();
    let mut texture_slots: HashMap<String, usize> = HashMap::new();
    let mut batch_names = Vec::with_capacity(primitives.len());

    for (batch_id, primitive) in primitives.iter().enumerate() {
        let material = &mesh.materials()[primitive.material as usize];
        let count = primitive.positions.len();

        let bounds = BoundingBox3D::from_points(
            primitive.positions.iter().map(|p| DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64)),
        );
        let view = buffer.push_view(bytemuck::cast_slice(&primitive.positions), Some(ARRAY_BUFFER));
        accessors.push(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": count,
            "type": "VEC3",
            "min": [bounds.min.x as f32, bounds.min.y as f32, bounds.min.z as f32],
            "max": [bounds.max.x as f32, bounds.max.y as f32, bounds.max.z as f32],
        }));
        let position = accessors.len() - 1;

        let view = buffer.push_view(bytemuck::cast_slice(&primitive.normals), Some(ARRAY_BUFFER));
        accessors.push(json!({ "bufferView": view, "componentType": FLOAT, "count": count, "type": "VEC3" }));
        let normal = accessors.len() - 1;

        let batch_ids = vec![batch_id as f32; count];
        let view = buffer.push_view(bytemuck::cast_slice(&batch_ids), Some(ARRAY_BUFFER));
        accessors.push(json!({ "bufferView": view, "componentType": FLOAT, "count": count, "type": "SCALAR" }));
        let batch = accessors.len() - 1;

        let mut attributes = json!({ "POSITION": position, "NORMAL": normal, "_BATCHID": batch });

        let mut texture_index = None;
        if primitive.textured {
            let view = buffer.push_view(bytemuck::cast_slice(&primitive.uvs), Some(ARRAY_BUFFER));
            accessors.push(json!({ "bufferView": view, "componentType": FLOAT, "count": count, "type": "VEC2" }));
            attributes["TEXCOORD_0"] = json!(accessors.len() - 1);

            let id = material.texture.as_ref().map(|t| t.id.clone()).unwrap_or_default();
            if let Some(image) = images.get(&id) {
                let slot = match texture_slots.get(&id) {
                    Some(&slot) => slot,
                    None => {
                        let view = buffer.push_view(&image.bytes, None);
                        gltf_images.push(json!({ "bufferView": view, "mimeType": image.mime_type }));
                        textures.push(json!({ "sampler": 0, "source": gltf_images.len() - 1 }));
                        texture_slots.insert(id, textures.len() - 1);
                        textures.len() - 1
                    }
                };
                texture_index = Some(slot);
            }
        }

        let (component_type, index_bytes) = pack_indices(&primitive.indices, count);
        let view = buffer.push_view(&index_bytes, Some(ELEMENT_ARRAY_BUFFER));
        accessors.push(json!({
            "bufferView": view,
            "componentType": component_type,
            "count": primitive.indices.len(),
            "type": "SCALAR",
        }));
        let indices = accessors.len() - 1;

        materials.push(material_json(material, texture_index));
        gltf_primitives.push(json!({
            "attributes": attributes,
            "indices": indices,
            "material": materials.len() - 1,
            "mode": 4,
        }));
        batch_names.push(material.name.clone());
    }

    while buffer.data.len() % 4 != 0 {
        buffer.data.push(0);
    }

    let mut gltf = json!({
        "asset": { "version": "2.0", "generator": GENERATOR },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": gltf_primitives }],
        "accessors": accessors,
        "bufferViews": buffer.views,
        "buffers": [{ "byteLength": buffer.data.len() }],
        "materials": materials,
        "extensionsUsed": [UNLIT_EXTENSION],
    });
    if !textures.is_empty() {
        gltf["textures"] = json!(textures);
        gltf["images"] = json!(gltf_images);
        gltf["samplers"] = json!([{
            "magFilter": LINEAR,
            "minFilter": LINEAR_MIPMAP_LINEAR,
            "wrapS": REPEAT,
            "wrapT": REPEAT,
        }]);
    }

    Ok(GlbPayload {
        bytes: write_glb(&gltf, &buffer.data)?,
        batch_names,
    })
}

fn write_glb(gltf: &Value, bin: &[u8]) -> Tiles3dResult<Vec<u8>> {
    let mut json_bytes = serde_json::to_vec(gltf)?;
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }

    let total = 12 + 8 + json_bytes.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };
    let total = u32::try_from(total).map_err(|_| Tiles3dError::Encoding(format!("GLB of {total} bytes exceeds 4 GiB")))?;

    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    if !bin.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(bin);
    }
    Ok(out)
}

/// Geometry of one decoded primitive, UVs back in bottom-left origin
#[derive(Debug, Clone, Default)]
pub struct DecodedPrimitive {
    pub positions: Vec<DVec3>,
    pub normals: Option<Vec<DVec3>>,
    pub uvs: Option<Vec<DVec2>>,
    pub indices: Vec<u32>,
    pub batch_ids: Option<Vec<u32>>,
    pub material: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DecodedMaterial {
    pub name: String,
    pub base_color: [f32; 4],
    pub image: Option<EncodedImage>,
}

/// A decoded GLB or b3dm payload
#[derive(Debug, Clone, Default)]
pub struct DecodedTile {
    pub primitives: Vec<DecodedPrimitive>,
    pub materials: Vec<DecodedMaterial>,
    pub generator: Option<String>,
    /// `BATCH_LENGTH` of the b3dm feature table, if the payload was a b3dm
    pub batch_length: Option<u32>,
}

impl DecodedTile {
    pub fn triangle_count(&self) -> usize {
        self.primitives.iter().map(|p| p.indices.len() / 3).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.positions.len()).sum()
    }

    pub fn bounds(&self) -> BoundingBox3D {
        BoundingBox3D::from_points(self.primitives.iter().flat_map(|p| p.positions.iter().copied()))
    }

    /// Rebuild a mesh; embedded images become textures with ids under `prefix`
    pub fn to_mesh(&self, prefix: &str) -> GeometryResult<Mesh> {
        let mut materials: Vec<Material> = self
            .materials
            .iter()
            .enumerate()
            .map(|(i, m)| Material {
                name: m.name.clone(),
                diffuse_color: m.base_color,
                texture: m.image.as_ref().map(|image| TextureRef {
                    id: format!("{prefix}#image{i}"),
                    source: TextureSource::Encoded {
                        bytes: image.bytes.clone(),
                        mime_type: image.mime_type.clone(),
                    },
                }),
            })
            .collect();
        let fallback = materials.len() as u32;
        if self.primitives.iter().any(|p| p.material.map_or(true, |m| m >= self.materials.len())) {
            materials.push(Material::default());
        }

        let mut builder = MeshBuilder::with_capacity(materials.into(), self.vertex_count(), self.triangle_count());
        for primitive in &self.primitives {
            let base = builder.vertex_count() as u32;
            let uv_base = builder.uv_count() as u32;
            for &p in &primitive.positions {
                builder.push_vertex(p);
            }
            if let Some(uvs) = &primitive.uvs {
                for &uv in uvs {
                    builder.push_uv(uv);
                }
            }
            let material = primitive
                .material
                .filter(|&m| m < self.materials.len())
                .map_or(fallback, |m| m as u32);
            for tri in primitive.indices.chunks_exact(3) {
                let vertices = [tri[0] + base, tri[1] + base, tri[2] + base];
                let uvs = primitive.uvs.as_ref().map(|_| [tri[0] + uv_base, tri[1] + uv_base, tri[2] + uv_base]);
                builder.push_face(Face::new(vertices, uvs, material));
            }
        }
        builder.build()
    }
}

/// Decode either container, detected by its magic
pub fn decode_tile(data: &[u8]) -> Tiles3dResult<DecodedTile> {
    match data.get(0..4) {
        Some(b"b3dm") => {
            let payload = decode_b3dm(data)?;
            let mut tile = decode_glb(&payload.glb)?;
            tile.batch_length = Some(payload.batch_length());
            Ok(tile)
        }
        Some(magic) if magic == GLB_MAGIC => decode_glb(data),
        _ => Err(Tiles3dError::Unsupported("payload is neither b3dm nor GLB".into())),
    }
}

/// Split a GLB into its JSON document and binary chunk
pub fn read_glb_chunks(data: &[u8]) -> Tiles3dResult<(Value, &[u8])> {
    if data.len() < 12 || &data[0..4] != GLB_MAGIC {
        return Err(Tiles3dError::InvalidGltf("missing GLB header".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != GLB_VERSION {
        return Err(Tiles3dError::InvalidGltf(format!("Unsupported glTF version: {}", version)));
    }
    let length = (u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize).min(data.len());

    let mut offset = 12usize;
    let mut json_chunk: Option<Value> = None;
    let mut bin_chunk: &[u8] = &[];
    while offset + 8 <= length {
        let chunk_length =
            u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]) as usize;
        let chunk_type = u32::from_le_bytes([data[offset + 4], data[offset + 5], data[offset + 6], data[offset + 7]]);
        offset += 8;
        if offset + chunk_length > length {
            return Err(Tiles3dError::InvalidGltf("chunk runs past the end of the GLB".into()));
        }
        let chunk = &data[offset..offset + chunk_length];
        match chunk_type {
            CHUNK_JSON => json_chunk = Some(serde_json::from_slice(chunk)?),
            CHUNK_BIN => bin_chunk = chunk,
            _ => {}
        }
        offset += chunk_length;
    }

    let json = json_chunk.ok_or_else(|| Tiles3dError::InvalidGltf("No JSON chunk".into()))?;
    Ok((json, bin_chunk))
}

fn gltf_err(message: impl Into<String>) -> Tiles3dError {
    Tiles3dError::InvalidGltf(message.into())
}

fn usize_field(value: &Value, key: &str) -> Option<usize> {
    value.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

/// Read accessor `index` as flat f64 values plus its component count
fn read_accessor(gltf: &Value, bin: &[u8], index: usize) -> Tiles3dResult<(Vec<f64>, usize)> {
    let accessor = gltf["accessors"]
        .get(index)
        .ok_or_else(|| gltf_err(format!("accessor {index} out of range")))?;
    let view_index = usize_field(accessor, "bufferView").ok_or_else(|| gltf_err("accessor without bufferView"))?;
    let count = usize_field(accessor, "count").unwrap_or(0);
    let components = match accessor.get("type").and_then(Value::as_str).unwrap_or("SCALAR") {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" => 4,
        other => return Err(gltf_err(format!("unsupported accessor type {other}"))),
    };
    let component_type = accessor.get("componentType").and_then(Value::as_u64).unwrap_or(FLOAT);
    let size = match component_type {
        BYTE | UNSIGNED_BYTE => 1,
        SHORT | UNSIGNED_SHORT => 2,
        UNSIGNED_INT | FLOAT => 4,
        other => return Err(gltf_err(format!("Unsupported component type: {other}"))),
    };

    let view = gltf["bufferViews"]
        .get(view_index)
        .ok_or_else(|| gltf_err(format!("bufferView {view_index} out of range")))?;
    let view_start = usize_field(view, "byteOffset").unwrap_or(0);
    let view_end = view_start + usize_field(view, "byteLength").unwrap_or(0);
    let start = view_start + usize_field(accessor, "byteOffset").unwrap_or(0);
    let stride = usize_field(view, "byteStride").unwrap_or(components * size);
    if count > 0 {
        let end = start + stride * (count - 1) + components * size;
        if end > view_end || end > bin.len() {
            return Err(gltf_err("Buffer overrun"));
        }
    }

    let mut values = Vec::with_capacity(count * components);
    for i in 0..count {
        for c in 0..components {
            let at = start + i * stride + c * size;
            let b = &bin[at..at + size];
            values.push(match component_type {
                BYTE => b[0] as i8 as f64,
                UNSIGNED_BYTE => b[0] as f64,
                SHORT => i16::from_le_bytes([b[0], b[1]]) as f64,
                UNSIGNED_SHORT => u16::from_le_bytes([b[0], b[1]]) as f64,
                UNSIGNED_INT => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
                _ => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            });
        }
    }
    Ok((values, components))
}

fn read_vec3(gltf: &Value, bin: &[u8], index: usize) -> Tiles3dResult<Vec<DVec3>> {
    let (values, components) = read_accessor(gltf, bin, index)?;
    if components != 3 {
        return Err(gltf_err(format!("accessor {index} is not VEC3")));
    }
    Ok(values.chunks_exact(3).map(|c| DVec3::new(c[0], c[1], c[2])).collect())
}

fn read_image(gltf: &Value, bin: &[u8], texture: usize) -> Option<EncodedImage> {
    let source = usize_field(gltf["textures"].get(texture)?, "source")?;
    let image = gltf["images"].get(source)?;
    let view = gltf["bufferViews"].get(usize_field(image, "bufferView")?)?;
    let start = usize_field(view, "byteOffset").unwrap_or(0);
    let bytes = bin.get(start..start + usize_field(view, "byteLength")?)?;
    let mime = image.get("mimeType").and_then(Value::as_str).unwrap_or("image/png");
    Some(EncodedImage::new(bytes.to_vec(), mime))
}

fn decode_materials(gltf: &Value, bin: &[u8]) -> Vec<DecodedMaterial> {
    let Some(materials) = gltf.get("materials").and_then(Value::as_array) else {
        return Vec::new();
    };
    materials
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let pbr = &m["pbrMetallicRoughness"];
            let mut base_color = [1.0f32; 4];
            if let Some(factor) = pbr.get("baseColorFactor").and_then(Value::as_array) {
                for (dst, src) in base_color.iter_mut().zip(factor) {
                    *dst = src.as_f64().unwrap_or(1.0) as f32;
                }
            }
            let image = pbr
                .get("baseColorTexture")
                .and_then(|t| usize_field(t, "index"))
                .and_then(|t| read_image(gltf, bin, t));
            DecodedMaterial {
                name: m.get("name").and_then(Value::as_str).map_or_else(|| format!("material{i}"), str::to_string),
                base_color,
                image,
            }
        })
        .collect()
}

/// Parse a GLB back into per-primitive geometry
pub fn decode_glb(data: &[u8]) -> Tiles3dResult<DecodedTile> {
    let (gltf, bin) = read_glb_chunks(data)?;
    let meshes = gltf
        .get("meshes")
        .and_then(Value::as_array)
        .ok_or_else(|| gltf_err("No meshes"))?;

    let mut primitives = Vec::new();
    for mesh in meshes {
        let list = mesh
            .get("primitives")
            .and_then(Value::as_array)
            .ok_or_else(|| gltf_err("No primitives"))?;
        for prim in list {
            let mode = prim.get("mode").and_then(Value::as_u64).unwrap_or(4);
            if mode != 4 {
                return Err(Tiles3dError::Unsupported(format!("primitive mode {mode}")));
            }
            let attributes = &prim["attributes"];
            let position = usize_field(attributes, "POSITION").ok_or_else(|| gltf_err("primitive without POSITION"))?;
            let positions = read_vec3(&gltf, bin, position)?;

            let normals = match usize_field(attributes, "NORMAL") {
                Some(i) => Some(read_vec3(&gltf, bin, i)?),
                None => None,
            };
            let uvs = match usize_field(attributes, "TEXCOORD_0") {
                Some(i) => {
                    let (values, _) = read_accessor(&gltf, bin, i)?;
                    Some(values.chunks_exact(2).map(|c| DVec2::new(c[0], 1.0 - c[1])).collect())
                }
                None => None,
            };
            let batch_ids = match usize_field(attributes, "_BATCHID") {
                Some(i) => Some(read_accessor(&gltf, bin, i)?.0.into_iter().map(|v| v as u32).collect()),
                None => None,
            };
            let indices: Vec<u32> = match usize_field(prim, "indices") {
                Some(i) => read_accessor(&gltf, bin, i)?.0.into_iter().map(|v| v as u32).collect(),
                None => (0..positions.len() as u32).collect(),
            };
            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= positions.len()) {
                return Err(gltf_err(format!("index {bad} out of range ({} vertices)", positions.len())));
            }

            primitives.push(DecodedPrimitive {
                positions,
                normals,
                uvs,
                indices,
                batch_ids,
                material: usize_field(prim, "material"),
            });
        }
    }

    Ok(DecodedTile {
        primitives,
        materials: decode_materials(&gltf, bin),
        generator: gltf["asset"]["generator"].as_str().map(str::to_string),
        batch_length: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::MIME_PNG;
    use std::sync::Arc;

    fn two_material_mesh() -> Mesh {
        let red = Material {
            diffuse_color: [1.0, 0.0, 0.0, 1.0],
            texture: Some(TextureRef::encoded("tex", vec![1, 2, 3], MIME_PNG)),
            ..Material::named("red")
        };
        let blue = Material {
            diffuse_color: [0.0, 0.0, 1.0, 0.5],
            ..Material::named("blue")
        };
        let vertices = vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
        ];
        let uvs = vec![DVec2::new(0.0, 0.0), DVec2::new(1.0, 0.0), DVec2::new(1.0, 0.25)];
        let faces = vec![
            Face::new([0, 1, 2], Some([0, 1, 2]), 0),
            Face::new([0, 2, 3], None, 1),
            Face::new([0, 3, 4], None, 1),
        ];
        Mesh::new(vertices, uvs, faces, Arc::from(vec![red, blue])).unwrap()
    }

    fn images() -> BTreeMap<String, EncodedImage> {
        let mut images = BTreeMap::new();
        images.insert("tex".to_string(), EncodedImage::new(vec![9u8, 8, 7, 6, 5], MIME_PNG));
        images
    }

    #[test]
    fn test_glb_layout_is_aligned() {
        let glb = build_glb(&two_material_mesh(), &images()).unwrap();
        let bytes = &glb.bytes;
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);

        let (gltf, bin) = read_glb_chunks(bytes).unwrap();
        for view in gltf["bufferViews"].as_array().unwrap() {
            assert_eq!(view["byteOffset"].as_u64().unwrap() % 4, 0);
        }
        assert_eq!(bin.len() % 4, 0);
        assert_eq!(gltf["asset"]["generator"], GENERATOR);
        assert_eq!(gltf["extensionsUsed"][0], UNLIT_EXTENSION);
        assert_eq!(gltf["samplers"][0]["minFilter"], LINEAR_MIPMAP_LINEAR);
        assert_eq!(glb.batch_names, vec!["red", "blue"]);
    }

    #[test]
    fn test_small_primitives_use_byte_indices() {
        let (gltf, _) = read_glb_chunks(&build_glb(&two_material_mesh(), &images()).unwrap().bytes).unwrap();
        let prim = &gltf["meshes"][0]["primitives"][0];
        let indices = prim["indices"].as_u64().unwrap() as usize;
        assert_eq!(gltf["accessors"][indices]["componentType"], UNSIGNED_BYTE);
        assert_eq!(gltf["materials"][1]["alphaMode"], "BLEND");
        assert_eq!(gltf["materials"][0]["pbrMetallicRoughness"]["roughnessFactor"], 1.0);
    }

    #[test]
    fn test_index_type_thresholds() {
        assert_eq!(pack_indices(&[0, 1, 2], 256).0, UNSIGNED_BYTE);
        assert_eq!(pack_indices(&[0, 1, 256], 257).0, UNSIGNED_SHORT);
        let (kind, bytes) = pack_indices(&[0, 1, 70000], 70001);
        assert_eq!(kind, UNSIGNED_INT);
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_decode_recovers_geometry_and_uvs() {
        let mesh = two_material_mesh();
        let glb = build_glb(&mesh, &images()).unwrap();
        let decoded = decode_glb(&glb.bytes).unwrap();
        assert_eq!(decoded.triangle_count(), 3);
        assert_eq!(decoded.bounds(), mesh.bounds());

        let textured = &decoded.primitives[0];
        let uvs = textured.uvs.as_ref().unwrap();
        assert!(uvs.iter().any(|uv| (uv.y - 0.25).abs() < 1e-6));
        assert!(decoded.primitives[1].uvs.is_none());
        assert_eq!(decoded.materials[0].image.as_ref().map(|i| i.bytes.len()), Some(5));

        let rebuilt = decoded.to_mesh("tile").unwrap();
        assert_eq!(rebuilt.face_count(), 3);
        assert!((rebuilt.surface_area() - mesh.surface_area()).abs() < 1e-6);
        assert_eq!(rebuilt.materials()[0].texture.as_ref().map(|t| t.id.as_str()), Some("tile#image0"));
    }

    #[test]
    fn test_missing_image_writes_untextured() {
        let glb = build_glb(&two_material_mesh(), &BTreeMap::new()).unwrap();
        let (gltf, _) = read_glb_chunks(&glb.bytes).unwrap();
        assert!(gltf.get("textures").is_none());
        assert!(gltf["meshes"][0]["primitives"][0]["attributes"].get("TEXCOORD_0").is_none());
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let empty = Mesh::empty(Arc::from(Vec::new()));
        assert!(matches!(build_glb(&empty, &BTreeMap::new()), Err(Tiles3dError::Encoding(_))));
    }

    #[test]
    fn test_decode_tile_rejects_unknown_magic() {
        assert!(matches!(decode_tile(b"nope-not-a-tile"), Err(Tiles3dError::Unsupported(_))));
    }
}
