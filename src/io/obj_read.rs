//! Wavefront OBJ reader.
//!
//! Streaming parser for the OBJ constructs photogrammetry exports use
//! (v, vt, f, usemtl, mtllib) plus the MTL subset that matters for tiling
//! (newmtl, Kd, d/Tr, map_Kd). Polygon faces are triangulated with a fan.
//! Positions and texture coordinates keep their own index spaces.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{DVec2, DVec3};

use crate::geometry::{Face, Material, Mesh, TextureRef};

use super::loader::{LoadError, LoadResult, LoadedModel, ModelLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CornerRef {
    vi: i64,
    vti: i64,
}

fn parse_corner(tok: &str) -> Option<CornerRef> {
    let mut parts = tok.split('/');
    let vi = parts.next()?.parse::<i64>().ok()?;
    let vti = match parts.next() {
        Some("") | None => 0,
        Some(t) => t.parse::<i64>().ok()?,
    };
    Some(CornerRef { vi, vti })
}

/// Resolve a 1-based or negative (relative) OBJ index against `len` entries
fn index_fix(idx: i64, len: usize) -> Option<u32> {
    let resolved = if idx > 0 { idx - 1 } else { len as i64 + idx };
    if idx == 0 || resolved < 0 || resolved >= len as i64 {
        None
    } else {
        Some(resolved as u32)
    }
}

fn parse_floats<const N: usize>(it: &mut std::str::SplitWhitespace<'_>) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    for slot in out.iter_mut() {
        *slot = it.next()?.parse::<f64>().ok()?;
        if !slot.is_finite() {
            return None;
        }
    }
    Some(out)
}

#[derive(Debug, Default)]
struct MaterialTable {
    materials: Vec<Material>,
    by_name: HashMap<String, u32>,
}

impl MaterialTable {
    /// Index of material `name`, created with defaults if never declared
    fn index_of(&mut self, name: &str) -> u32 {
        if let Some(&i) = self.by_name.get(name) {
            return i;
        }
        let i = self.materials.len() as u32;
        self.materials.push(Material::named(name));
        self.by_name.insert(name.to_string(), i);
        i
    }

    fn define(&mut self, material: Material) {
        match self.by_name.get(&material.name) {
            Some(&i) => self.materials[i as usize] = material,
            None => {
                self.by_name
                    .insert(material.name.clone(), self.materials.len() as u32);
                self.materials.push(material);
            }
        }
    }
}

fn parse_mtl_file(path: &Path, table: &mut MaterialTable) -> LoadResult<()> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("material library {} unavailable ({}); using default materials", path.display(), e);
            return Ok(());
        }
    };
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let reader = BufReader::new(file);

    let mut current: Option<Material> = None;
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let mut it = s.split_whitespace();
        let tag = it.next().unwrap_or("");
        let bad = |message: &str| LoadError::Parse {
            path: path.to_path_buf(),
            line: line_idx + 1,
            message: message.to_string(),
        };
        match tag {
            "newmtl" => {
                if let Some(prev) = current.take() {
                    table.define(prev);
                }
                let name = it.next().ok_or_else(|| bad("newmtl without a name"))?;
                current = Some(Material::named(name));
            }
            "Kd" => {
                if let Some(m) = current.as_mut() {
                    let [r, g, b] = parse_floats::<3>(&mut it).ok_or_else(|| bad("invalid Kd color"))?;
                    m.diffuse_color = [r as f32, g as f32, b as f32, m.diffuse_color[3]];
                }
            }
            "d" => {
                if let Some(m) = current.as_mut() {
                    let [d] = parse_floats::<1>(&mut it).ok_or_else(|| bad("invalid dissolve value"))?;
                    m.diffuse_color[3] = d.clamp(0.0, 1.0) as f32;
                }
            }
            "Tr" => {
                if let Some(m) = current.as_mut() {
                    let [tr] = parse_floats::<1>(&mut it).ok_or_else(|| bad("invalid transparency value"))?;
                    m.diffuse_color[3] = (1.0 - tr).clamp(0.0, 1.0) as f32;
                }
            }
            "map_Kd" => {
                if let Some(m) = current.as_mut() {
                    // options like "-s 1 1 1" precede the file name
                    let file_name = it.last().ok_or_else(|| bad("map_Kd without a file"))?;
                    m.texture = Some(TextureRef::from_file(base_dir.join(file_name)));
                }
            }
            _ => {}
        }
    }

    if let Some(prev) = current.take() {
        table.define(prev);
    }
    Ok(())
}

/// Parse OBJ text from `reader`.
///
/// `source` is used for error messages and to resolve `mtllib` paths.
pub fn parse_obj<R: BufRead>(reader: R, source: &Path) -> LoadResult<Mesh> {
    let base_dir: PathBuf = source.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut positions: Vec<DVec3> = Vec::new();
    let mut texcoords: Vec<DVec2> = Vec::new();
    let mut faces: Vec<Face> = Vec::new();
    let mut table = MaterialTable::default();
    let mut current_material: Option<u32> = None;

    for (line_idx, line) in reader.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = line?;
        let s = line.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let bad = |message: String| LoadError::Parse {
            path: source.to_path_buf(),
            line: line_no,
            message,
        };
        let mut it = s.split_whitespace();
        let tag = it.next().unwrap_or("");
        match tag {
            "v" => {
                let [x, y, z] = parse_floats::<3>(&mut it).ok_or_else(|| bad("invalid vertex position".into()))?;
                positions.push(DVec3::new(x, y, z));
            }
            "vt" => {
                let [u, v] = parse_floats::<2>(&mut it).ok_or_else(|| bad("invalid texture coordinate".into()))?;
                texcoords.push(DVec2::new(u, v));
            }
            "usemtl" => {
                let name = it.next().ok_or_else(|| bad("usemtl without a name".into()))?;
                current_material = Some(table.index_of(name));
            }
            "mtllib" => {
                for file_name in it {
                    parse_mtl_file(&base_dir.join(file_name), &mut table)?;
                }
            }
            "f" => {
                let corners = it
                    .map(|tok| parse_corner(tok).ok_or_else(|| bad(format!("malformed face vertex '{tok}'"))))
                    .collect::<LoadResult<Vec<_>>>()?;
                if corners.len() < 3 {
                    return Err(bad("face has fewer than 3 vertices".into()));
                }

                let mut vertex_ids = Vec::with_capacity(corners.len());
                let mut uv_ids = Vec::with_capacity(corners.len());
                for c in &corners {
                    let vi = index_fix(c.vi, positions.len()).ok_or_else(|| {
                        bad(format!("position index {} out of bounds (1..={})", c.vi, positions.len()))
                    })?;
                    vertex_ids.push(vi);
                    if c.vti != 0 {
                        let ti = index_fix(c.vti, texcoords.len()).ok_or_else(|| {
                            bad(format!("texcoord index {} out of bounds (1..={})", c.vti, texcoords.len()))
                        })?;
                        uv_ids.push(ti);
                    }
                }
                let textured = uv_ids.len() == vertex_ids.len();
                let material = match current_material {
                    Some(m) => m,
                    None => *current_material.insert(table.index_of("default")),
                };

                for t in 1..(vertex_ids.len() - 1) {
                    let vertices = [vertex_ids[0], vertex_ids[t], vertex_ids[t + 1]];
                    let uvs = textured.then(|| [uv_ids[0], uv_ids[t], uv_ids[t + 1]]);
                    faces.push(Face::new(vertices, uvs, material));
                }
            }
            // normals, groups, smoothing and free-form geometry are ignored
            _ => {}
        }
    }

    Mesh::new(positions, texcoords, faces, Arc::from(table.materials)).map_err(|e| LoadError::Corrupt {
        path: source.to_path_buf(),
        message: e.to_string(),
    })
}

/// [`ModelLoader`] for `.obj` files
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjLoader;

impl ModelLoader for ObjLoader {
    fn name(&self) -> &str {
        "obj"
    }

    fn extensions(&self) -> &[&str] {
        &["obj"]
    }

    fn load(&self, path: &Path) -> LoadResult<LoadedModel> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
            _ => LoadError::Io(e),
        })?;
        let mesh = parse_obj(BufReader::new(file), path)?;
        log::debug!(
            "parsed {}: {} vertices, {} faces, {} materials",
            path.display(),
            mesh.vertex_count(),
            mesh.face_count(),
            mesh.materials().len()
        );
        Ok(LoadedModel::new(mesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TextureSource;
    use std::io::{Cursor, Write};

    fn parse(text: &str) -> LoadResult<Mesh> {
        parse_obj(Cursor::new(text), Path::new("inline.obj"))
    }

    #[test]
    fn test_quad_is_fan_triangulated() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.faces()[1].vertices, [0, 2, 3]);
        assert_eq!(mesh.materials()[0].name, "default");
    }

    #[test]
    fn test_negative_indices_and_uvs() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nf -3/-3 -2/-2 -1/-1\n";
        let mesh = parse(text).unwrap();
        let face = mesh.faces()[0];
        assert_eq!(face.vertices, [0, 1, 2]);
        assert_eq!(face.uvs, Some([0, 1, 2]));
        assert!(mesh.has_uvs());
    }

    #[test]
    fn test_normals_only_face_has_no_uvs() {
        let mesh = parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1\n").unwrap();
        assert_eq!(mesh.faces()[0].uvs, None);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse("v 0 0 0\nv 1 0 0\nf 1 2 9\n").unwrap_err();
        match err {
            LoadError::Parse { line, message, .. } => {
                assert_eq!(line, 3);
                assert!(message.contains("out of bounds"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(parse("v 0 zero 0\n"), Err(LoadError::Parse { line: 1, .. })));
    }

    #[test]
    fn test_usemtl_without_library_creates_material() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl roof\nf 1 2 3\nusemtl wall\nf 1 3 2\n";
        let mesh = parse(text).unwrap();
        assert_eq!(mesh.materials().len(), 2);
        assert_eq!(mesh.faces()[1].material, 1);
        assert_eq!(mesh.materials()[1].name, "wall");
    }

    #[test]
    fn test_loader_reads_mtl_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mtl = File::create(dir.path().join("scene.mtl")).unwrap();
        writeln!(mtl, "newmtl facade\nKd 0.5 0.25 1.0\nd 0.5\nmap_Kd textures/facade.jpg").unwrap();
        let mut obj = File::create(dir.path().join("scene.obj")).unwrap();
        writeln!(obj, "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 0 1\nusemtl facade\nf 1/1 2/2 3/3").unwrap();

        let model = ObjLoader.load(&dir.path().join("scene.obj")).unwrap();
        assert_eq!(model.materials.len(), 1);
        let material = &model.materials[0];
        assert_eq!(material.diffuse_color, [0.5, 0.25, 1.0, 0.5]);
        let texture = material.texture.as_ref().unwrap();
        assert_eq!(
            texture.source,
            TextureSource::File(dir.path().join("textures/facade.jpg"))
        );
        assert_eq!(model.bounds.max, DVec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_missing_mtl_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lonely.obj");
        std::fs::write(&path, "mtllib gone.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl x\nf 1 2 3\n").unwrap();
        let model = ObjLoader.load(&path).unwrap();
        assert_eq!(model.mesh.face_count(), 1);
        assert_eq!(model.materials[0].name, "x");
    }
}
