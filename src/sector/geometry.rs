//! Decoded sector geometry payloads
//!
//! These are the structured results of parsing sector blobs, modeled as
//! tagged variants with explicit presence/absence of optional arrays.

use std::sync::Arc;

use crate::error::ParseError;

/// Parsed simple-sector payload: a flat buffer of screen-facing quads
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorQuads {
    pub quad_size: f32,
    /// Interleaved quad attributes, layout owned by the parser
    pub buffer: Vec<f32>,
}

/// One instance group within an instanced-mesh file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstancedMesh {
    pub triangle_count: u32,
    pub triangle_offset: u32,
    pub colors: Vec<u8>,
    /// Row-major 4x4 transform per instance
    pub instance_matrices: Vec<f32>,
    pub tree_indices: Vec<f32>,
}

/// Shared vertex data plus the instance groups drawn from it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstancedMeshFile {
    pub file_id: u64,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub normals: Option<Vec<f32>>,
    pub instances: Vec<InstancedMesh>,
}

/// A plain triangle mesh with per-vertex attributes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleMesh {
    pub file_id: u64,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub tree_indices: Vec<f32>,
    pub colors: Vec<u8>,
    pub normals: Option<Vec<f32>>,
}

/// Parsed detailed-sector payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorGeometry {
    pub instance_meshes: Vec<InstancedMeshFile>,
    pub triangle_meshes: Vec<TriangleMesh>,
}

/// Peripheral compressed-mesh payloads merged into one combined buffer,
/// ordered by the numeric id embedded in each file name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeripheralInput {
    pub file_ids: Vec<u64>,
    pub lengths: Vec<usize>,
    pub buffer: Vec<u8>,
}

impl PeripheralInput {
    /// Merge fetched peripheral files into a single combined buffer
    ///
    /// Files arrive in completion order; the merge orders them by the
    /// numeric id in the file name (e.g. `mesh_17.ctm` has id 17).
    pub fn merge(mut files: Vec<(String, Arc<Vec<u8>>)>) -> Result<Self, ParseError> {
        let mut keyed = Vec::with_capacity(files.len());
        for (file_name, data) in files.drain(..) {
            let id = peripheral_file_id(&file_name)?;
            keyed.push((id, data));
        }
        keyed.sort_by_key(|(id, _)| *id);

        let mut merged = PeripheralInput::default();
        for (id, data) in keyed {
            merged.file_ids.push(id);
            merged.lengths.push(data.len());
            merged.buffer.extend_from_slice(&data);
        }
        Ok(merged)
    }
}

/// Extract the numeric id embedded in a peripheral file name
///
/// Names follow `mesh_<id>.<ext>`; anything between the prefix and the
/// extension that is not a plain number is rejected.
fn peripheral_file_id(file_name: &str) -> Result<u64, ParseError> {
    let stem = file_name.split_once('.').map_or(file_name, |(stem, _)| stem);
    stem.strip_prefix("mesh_")
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| ParseError::InvalidPeripheralFileName(file_name.to_string()))
}
