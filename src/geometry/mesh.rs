//! Immutable indexed mesh and the builders that produce it
//!
//! Positions and UVs are indexed separately per face corner (the OBJ
//! convention), so a UV seam does not duplicate positions. A `Mesh` is never
//! mutated after `Mesh::new`; stages that change geometry build a new one.

use std::path::PathBuf;
use std::sync::Arc;

use glam::{DVec2, DVec3};

use super::{BoundingBox3D, GeometryError, GeometryResult, Triangle};

/// Where the pixels of a texture come from
#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    /// Image file on disk
    File(PathBuf),
    /// Already encoded image bytes (PNG/JPEG) with their mime type
    Encoded { bytes: Arc<[u8]>, mime_type: String },
}

/// Texture referenced by a material; `id` is unique within a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef {
    pub id: String,
    pub source: TextureSource,
}

impl TextureRef {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().into_owned(),
            source: TextureSource::File(path),
        }
    }

    pub fn encoded(id: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: TextureSource::Encoded {
                bytes: bytes.into(),
                mime_type: mime_type.into(),
            },
        }
    }
}

/// Surface description shared by the faces that reference it
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    /// Linear RGBA
    pub diffuse_color: [f32; 4],
    pub texture: Option<TextureRef>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            diffuse_color: [1.0, 1.0, 1.0, 1.0],
            texture: None,
        }
    }
}

impl Material {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One triangle: vertex indices, optional UV indices, material index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Face {
    pub vertices: [u32; 3],
    pub uvs: Option<[u32; 3]>,
    pub material: u32,
}

impl Face {
    pub fn new(vertices: [u32; 3], uvs: Option<[u32; 3]>, material: u32) -> Self {
        Self { vertices, uvs, material }
    }
}

/// Immutable indexed triangle mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<DVec3>,
    uvs: Vec<DVec2>,
    faces: Vec<Face>,
    materials: Arc<[Material]>,
    bounds: BoundingBox3D,
}

impl Mesh {
    /// Validate indices and build the mesh.
    ///
    /// An empty material table is replaced by a single default material.
    pub fn new(
        vertices: Vec<DVec3>,
        uvs: Vec<DVec2>,
        faces: Vec<Face>,
        materials: Arc<[Material]>,
    ) -> GeometryResult<Self> {
        let materials: Arc<[Material]> = if materials.is_empty() {
            Arc::from(vec![Material::default()])
        } else {
            materials
        };

        let vertex_count = vertices.len();
        let uv_count = uvs.len();
        let mut bounds = BoundingBox3D::empty();
        for (i, face) in faces.iter().enumerate() {
            for &v in &face.vertices {
                let p = vertices.get(v as usize).ok_or_else(|| {
                    GeometryError::new(format!(
                        "face {i}: vertex index {v} out of bounds (vertex count {vertex_count})"
                    ))
                })?;
                if !p.is_finite() {
                    return Err(GeometryError::new(format!("face {i}: vertex {v} is not finite")));
                }
                bounds.expand_point(*p);
            }
            if let Some(uv) = face.uvs {
                if let Some(&bad) = uv.iter().find(|&&t| t as usize >= uv_count) {
                    return Err(GeometryError::new(format!(
                        "face {i}: uv index {bad} out of bounds (uv count {uv_count})"
                    )));
                }
            }
            if face.material as usize >= materials.len() {
                return Err(GeometryError::new(format!(
                    "face {i}: material {} out of bounds (material count {})",
                    face.material,
                    materials.len()
                )));
            }
        }

        Ok(Self {
            vertices,
            uvs,
            faces,
            materials,
            bounds,
        })
    }

    /// Mesh with no faces sharing `materials`
    pub fn empty(materials: Arc<[Material]>) -> Self {
        let materials: Arc<[Material]> = if materials.is_empty() {
            Arc::from(vec![Material::default()])
        } else {
            materials
        };
        Self {
            vertices: Vec::new(),
            uvs: Vec::new(),
            faces: Vec::new(),
            materials,
            bounds: BoundingBox3D::empty(),
        }
    }

    pub fn vertices(&self) -> &[DVec3] {
        &self.vertices
    }

    pub fn uvs(&self) -> &[DVec2] {
        &self.uvs
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Shared handle to the material table
    pub fn materials_arc(&self) -> Arc<[Material]> {
        Arc::clone(&self.materials)
    }

    /// Bounds of the vertices referenced by faces
    pub fn bounds(&self) -> BoundingBox3D {
        self.bounds
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        self.faces.iter().any(|f| f.uvs.is_some())
    }

    /// Standalone copy of face `index`
    pub fn triangle(&self, index: usize) -> Triangle {
        let face = &self.faces[index];
        let [a, b, c] = face.vertices.map(|v| self.vertices[v as usize]);
        let uvs = face.uvs.map(|t| t.map(|i| self.uvs[i as usize]));
        Triangle {
            a,
            b,
            c,
            uvs,
            material: face.material,
        }
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        (0..self.faces.len()).map(move |i| self.triangle(i))
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Decompose into raw arrays
    pub fn into_parts(self) -> (Vec<DVec3>, Vec<DVec2>, Vec<Face>, Arc<[Material]>) {
        (self.vertices, self.uvs, self.faces, self.materials)
    }
}

/// Accumulates raw arrays and validates them into a `Mesh`
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    vertices: Vec<DVec3>,
    uvs: Vec<DVec2>,
    faces: Vec<Face>,
    materials: Arc<[Material]>,
}

impl MeshBuilder {
    pub fn new(materials: Arc<[Material]>) -> Self {
        Self {
            vertices: Vec::new(),
            uvs: Vec::new(),
            faces: Vec::new(),
            materials,
        }
    }

    pub fn with_capacity(materials: Arc<[Material]>, vertices: usize, faces: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            uvs: Vec::new(),
            faces: Vec::with_capacity(faces),
            materials,
        }
    }

    pub fn push_vertex(&mut self, p: DVec3) -> u32 {
        self.vertices.push(p);
        (self.vertices.len() - 1) as u32
    }

    pub fn push_uv(&mut self, uv: DVec2) -> u32 {
        self.uvs.push(uv);
        (self.uvs.len() - 1) as u32
    }

    pub fn push_face(&mut self, face: Face) {
        self.faces.push(face);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn uv_count(&self) -> usize {
        self.uvs.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn build(self) -> GeometryResult<Mesh> {
        Mesh::new(self.vertices, self.uvs, self.faces, self.materials)
    }
}

const UNMAPPED: u32 = u32::MAX;

/// Builds a mesh from a subset of another mesh's faces, copying only the
/// vertices and UVs those faces reference.
#[derive(Debug)]
pub struct SubMeshBuilder<'a> {
    source: &'a Mesh,
    vertex_map: Vec<u32>,
    uv_map: Vec<u32>,
    builder: MeshBuilder,
}

impl<'a> SubMeshBuilder<'a> {
    pub fn new(source: &'a Mesh) -> Self {
        Self {
            source,
            vertex_map: vec![UNMAPPED; source.vertex_count()],
            uv_map: vec![UNMAPPED; source.uvs().len()],
            builder: MeshBuilder::new(source.materials_arc()),
        }
    }

    pub fn source(&self) -> &'a Mesh {
        self.source
    }

    /// Index of source vertex `v` in the new mesh, copying it on first use
    pub fn map_vertex(&mut self, v: u32) -> u32 {
        let slot = &mut self.vertex_map[v as usize];
        if *slot == UNMAPPED {
            *slot = self.builder.push_vertex(self.source.vertices()[v as usize]);
        }
        *slot
    }

    /// Index of source UV `t` in the new mesh, copying it on first use
    pub fn map_uv(&mut self, t: u32) -> u32 {
        let slot = &mut self.uv_map[t as usize];
        if *slot == UNMAPPED {
            *slot = self.builder.push_uv(self.source.uvs()[t as usize]);
        }
        *slot
    }

    /// Copy a source face unchanged
    pub fn copy_face(&mut self, face: &Face) {
        let vertices = face.vertices.map(|v| self.map_vertex(v));
        let uvs = face.uvs.map(|t| t.map(|i| self.map_uv(i)));
        self.builder.push_face(Face::new(vertices, uvs, face.material));
    }

    /// Add a vertex that does not exist in the source
    pub fn push_vertex(&mut self, p: DVec3) -> u32 {
        self.builder.push_vertex(p)
    }

    pub fn push_uv(&mut self, uv: DVec2) -> u32 {
        self.builder.push_uv(uv)
    }

    pub fn push_face(&mut self, face: Face) {
        self.builder.push_face(face);
    }

    pub fn face_count(&self) -> usize {
        self.builder.face_count()
    }

    pub fn build(self) -> GeometryResult<Mesh> {
        self.builder.build()
    }
}
