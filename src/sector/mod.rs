//! Sector data model: spatial hierarchy, scheduling requests and results

pub mod geometry;
pub mod parser;
pub mod repository;
pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use crate::math::Aabb;
use crate::sector::transform::SectorGroup;

/// Fidelity tier of a sector's geometry
///
/// Total order of fidelity (Discarded < Simple < Detailed), but not of
/// cost: the cost of Detailed varies per sector and is supplied by a cost
/// function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LevelOfDetail {
    Discarded,
    Simple,
    Detailed,
}

impl std::fmt::Display for LevelOfDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelOfDetail::Discarded => write!(f, "discarded"),
            LevelOfDetail::Simple => write!(f, "simple"),
            LevelOfDetail::Detailed => write!(f, "detailed"),
        }
    }
}

/// File descriptor for a sector's simple (quads) representation
#[derive(Clone, Debug, Default)]
pub struct FacesFile {
    /// Absent when the sector has no simple representation
    pub file_name: Option<String>,
    pub download_size: u64,
}

/// File descriptor for a sector's detailed representation
#[derive(Clone, Debug, Default)]
pub struct IndexFile {
    pub file_name: String,
    /// Compressed-mesh files referenced by the index file
    pub peripheral_files: Vec<String>,
    pub download_size: u64,
}

/// One node of the static spatial hierarchy, immutable after metadata load
#[derive(Clone, Debug)]
pub struct SectorMetadata {
    /// Stable id, unique within a scene
    pub id: u64,
    /// Root sector has no parent
    pub parent_id: Option<u64>,
    pub depth: u32,
    pub path: String,
    pub bounds: Aabb,
    pub faces_file: FacesFile,
    pub index_file: IndexFile,
    pub estimated_draw_call_count: u64,
}

/// The sector hierarchy of one model
///
/// Parent/child relations are non-owning id lookups; all nodes are shared
/// behind `Arc` so wanted/consumed sectors can reference them cheaply.
pub struct SectorScene {
    sectors: HashMap<u64, Arc<SectorMetadata>>,
    children: HashMap<u64, Vec<u64>>,
    root_id: u64,
    pub max_tree_index: u64,
    pub unit: String,
}

impl SectorScene {
    pub fn new(root_id: u64, max_tree_index: u64, unit: String, sectors: Vec<SectorMetadata>) -> Self {
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for sector in &sectors {
            if let Some(parent) = sector.parent_id {
                children.entry(parent).or_default().push(sector.id);
            }
        }
        let sectors = sectors
            .into_iter()
            .map(|s| (s.id, Arc::new(s)))
            .collect();
        Self {
            sectors,
            children,
            root_id,
            max_tree_index,
            unit,
        }
    }

    pub fn root(&self) -> Option<&Arc<SectorMetadata>> {
        self.sectors.get(&self.root_id)
    }

    pub fn sector(&self, id: u64) -> Option<&Arc<SectorMetadata>> {
        self.sectors.get(&id)
    }

    pub fn children_of(&self, id: u64) -> &[u64] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterate all sectors in the scene, in no particular order
    pub fn all_sectors(&self) -> impl Iterator<Item = &Arc<SectorMetadata>> {
        self.sectors.values()
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Bounds of the whole scene (root bounds)
    pub fn bounds(&self) -> Aabb {
        self.root().map(|r| r.bounds).unwrap_or_default()
    }
}

/// Clip volume applied to a model while scheduling
#[derive(Clone, Debug, PartialEq)]
pub struct ClipVolume {
    /// Clipping planes as (normal, distance) in world space
    pub planes: Vec<Vec4>,
    /// Clip against the intersection of planes rather than the union
    pub clip_intersection: bool,
}

/// Camera state consumed by the visibility oracle
#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    pub position: Vec3,
    pub view_projection: Mat4,
}

/// Hints that influence scheduling passes
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoadingHints {
    /// Pause scheduling without dropping already delivered sectors
    pub suspend_loading: bool,
}

/// A scheduling decision: load (or drop) one sector at a given LOD
///
/// Ephemeral, created fresh each scheduling pass. Uniquely identified for
/// caching purposes by `(model_base_url, sector id, level of detail)`.
#[derive(Clone)]
pub struct WantedSector {
    pub model_base_url: String,
    pub model_transform: Mat4,
    pub scene: Arc<SectorScene>,
    pub metadata: Arc<SectorMetadata>,
    pub level_of_detail: LevelOfDetail,
    pub clip_volume: Option<Arc<ClipVolume>>,
}

impl WantedSector {
    /// Cache identity of this request
    pub fn cache_key(&self) -> String {
        format!(
            "{}.{}.{}",
            self.model_base_url, self.metadata.id, self.level_of_detail
        )
    }

    /// Identity of the sector across passes, independent of LOD
    pub fn state_key(&self) -> (String, u64) {
        (self.model_base_url.clone(), self.metadata.id)
    }
}

impl std::fmt::Debug for WantedSector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WantedSector")
            .field("model_base_url", &self.model_base_url)
            .field("sector_id", &self.metadata.id)
            .field("level_of_detail", &self.level_of_detail)
            .finish()
    }
}

/// The resolved result of a wanted sector
///
/// Carries a renderer-consumable group for Simple/Detailed loads, or no
/// payload for Discarded results, which signal "drop what was previously
/// shown for this id". Shared by reference; consumers must not mutate it.
#[derive(Clone)]
pub struct ConsumedSector {
    pub model_base_url: String,
    pub model_transform: Mat4,
    pub metadata: Arc<SectorMetadata>,
    pub level_of_detail: LevelOfDetail,
    pub group: Option<Arc<SectorGroup>>,
}

impl ConsumedSector {
    /// Empty-payload result telling the renderer to unload this sector
    pub fn discarded(wanted: &WantedSector) -> Self {
        Self {
            model_base_url: wanted.model_base_url.clone(),
            model_transform: wanted.model_transform,
            metadata: wanted.metadata.clone(),
            level_of_detail: LevelOfDetail::Discarded,
            group: None,
        }
    }
}

impl std::fmt::Debug for ConsumedSector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumedSector")
            .field("model_base_url", &self.model_base_url)
            .field("sector_id", &self.metadata.id)
            .field("level_of_detail", &self.level_of_detail)
            .field("has_group", &self.group.is_some())
            .finish()
    }
}
