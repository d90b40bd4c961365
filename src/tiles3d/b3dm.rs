//! B3DM (Batched 3D Model) container writer and parser

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::error::{Tiles3dError, Tiles3dResult};

pub const B3DM_MAGIC: &[u8; 4] = b"b3dm";
pub const B3DM_VERSION: u32 = 1;
pub const B3DM_HEADER_LEN: usize = 28;

/// B3DM file header (28 bytes, little-endian)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct B3dmHeader {
    /// Magic bytes "b3dm"
    pub magic: [u8; 4],
    pub version: u32,
    /// Total byte length of the file
    pub byte_length: u32,
    pub feature_table_json_byte_length: u32,
    pub feature_table_binary_byte_length: u32,
    pub batch_table_json_byte_length: u32,
    pub batch_table_binary_byte_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FeatureTable {
    #[serde(rename = "BATCH_LENGTH")]
    batch_length: u32,
}

/// Per-feature properties, indexed by `_BATCHID`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTable {
    #[serde(rename = "batchId")]
    pub batch_id: Vec<u32>,
    pub name: Vec<String>,
}

/// Decoded B3DM payload
#[derive(Debug, Clone)]
pub struct B3dmPayload {
    pub header: B3dmHeader,
    pub feature_table: serde_json::Value,
    pub batch_table: Option<serde_json::Value>,
    /// Embedded binary glTF
    pub glb: Vec<u8>,
}

impl B3dmPayload {
    pub fn batch_length(&self) -> u32 {
        self.feature_table
            .get("BATCH_LENGTH")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }
}

/// Serialize `value` and pad with spaces until `base + len` is a multiple of 8
fn padded_json<T: Serialize>(value: &T, base: usize) -> Tiles3dResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    while (base + bytes.len()) % 8 != 0 {
        bytes.push(b' ');
    }
    Ok(bytes)
}

/// Wrap a GLB with `batch_length` anonymous features
pub fn encode_b3dm(glb: &[u8], batch_length: u32) -> Tiles3dResult<Vec<u8>> {
    let names: Vec<String> = (0..batch_length).map(|i| format!("feature{i}")).collect();
    encode_b3dm_with_names(glb, &names)
}

/// Wrap a GLB; one feature per entry of `names`, in `_BATCHID` order
pub fn encode_b3dm_with_names(glb: &[u8], names: &[String]) -> Tiles3dResult<Vec<u8>> {
    let batch_length = names.len() as u32;
    let feature_table = padded_json(&FeatureTable { batch_length }, B3DM_HEADER_LEN)?;
    let batch_table = if names.is_empty() {
        Vec::new()
    } else {
        let table = BatchTable {
            batch_id: (0..batch_length).collect(),
            name: names.to_vec(),
        };
        padded_json(&table, B3DM_HEADER_LEN + feature_table.len())?
    };

    // the GLB must also end on an 8-byte boundary
    let body = B3DM_HEADER_LEN + feature_table.len() + batch_table.len() + glb.len();
    let total = body.next_multiple_of(8);
    let byte_length = u32::try_from(total)
        .map_err(|_| Tiles3dError::Encoding(format!("b3dm of {total} bytes exceeds 4 GiB")))?;

    let header = B3dmHeader {
        magic: *B3DM_MAGIC,
        version: B3DM_VERSION,
        byte_length,
        feature_table_json_byte_length: feature_table.len() as u32,
        feature_table_binary_byte_length: 0,
        batch_table_json_byte_length: batch_table.len() as u32,
        batch_table_binary_byte_length: 0,
    };

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(&feature_table);
    out.extend_from_slice(&batch_table);
    out.extend_from_slice(glb);
    out.resize(total, 0);
    Ok(out)
}

fn section(data: &[u8], offset: usize, len: u32, what: &str) -> Tiles3dResult<std::ops::Range<usize>> {
    let end = offset + len as usize;
    if end > data.len() {
        return Err(Tiles3dError::InvalidB3dm(format!("{what} runs past the end of the file")));
    }
    Ok(offset..end)
}

fn parse_json(bytes: &[u8], what: &str) -> Tiles3dResult<serde_json::Value> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Tiles3dError::InvalidB3dm(format!("Invalid UTF-8 in {}: {}", what, e)))?;
    Ok(serde_json::from_str(text.trim_end())?)
}

/// Decode a B3DM file from bytes
pub fn decode_b3dm(data: &[u8]) -> Tiles3dResult<B3dmPayload> {
    if data.len() < B3DM_HEADER_LEN {
        return Err(Tiles3dError::InvalidB3dm("File too small for header".into()));
    }

    let header: B3dmHeader = bytemuck::pod_read_unaligned(&data[..B3DM_HEADER_LEN]);

    if &header.magic != B3DM_MAGIC {
        return Err(Tiles3dError::InvalidB3dm(format!("Invalid magic: {:?}", header.magic)));
    }
    if header.version != B3DM_VERSION {
        return Err(Tiles3dError::InvalidB3dm(format!("Unsupported version: {}", header.version)));
    }
    if header.byte_length as usize > data.len() {
        return Err(Tiles3dError::InvalidB3dm(format!(
            "header declares {} bytes, file has {}",
            header.byte_length,
            data.len()
        )));
    }
    let data = &data[..header.byte_length as usize];

    let ft = section(data, B3DM_HEADER_LEN, header.feature_table_json_byte_length, "feature table")?;
    let feature_table = if ft.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        parse_json(&data[ft.clone()], "feature table")?
    };
    let offset = ft.end + header.feature_table_binary_byte_length as usize;

    let bt = section(data, offset, header.batch_table_json_byte_length, "batch table")?;
    let batch_table = if bt.is_empty() {
        None
    } else {
        Some(parse_json(&data[bt.clone()], "batch table")?)
    };
    let offset = bt.end + header.batch_table_binary_byte_length as usize;
    if offset > data.len() {
        return Err(Tiles3dError::InvalidB3dm("batch table binary runs past the end of the file".into()));
    }

    Ok(B3dmPayload {
        header,
        feature_table,
        batch_table,
        glb: data[offset..].to_vec(),
    })
}

/// Load and decode a B3DM file from path
pub fn load_b3dm<P: AsRef<Path>>(path: P) -> Tiles3dResult<B3dmPayload> {
    let data = std::fs::read(path)?;
    decode_b3dm(&data)
}
