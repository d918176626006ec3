//! Transformation of parsed geometry into renderer-consumable groups

use glam::Mat4;

use crate::sector::WantedSector;
use crate::sector::geometry::{SectorGeometry, SectorQuads};

/// Parsed payload of a loaded sector, one variant per LOD path
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedSector {
    Simple(SectorQuads),
    Detailed(SectorGeometry),
}

/// Renderer-consumable result of one sector load
///
/// The renderer maps sector id to displayed groups and must not mutate
/// the group; it is shared with the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorGroup {
    /// Human-readable debug name
    pub name: String,
    pub transform: Mat4,
    pub payload: ParsedSector,
}

/// Turns parsed sector payloads into renderer-consumable groups
pub trait SectorTransformer: Send + Sync {
    fn transform(&self, wanted: &WantedSector, parsed: ParsedSector) -> SectorGroup;
}

/// Transformer that bakes the model transform into the group and passes
/// the parsed payload through unchanged
pub struct ModelTransformApplier;

impl SectorTransformer for ModelTransformApplier {
    fn transform(&self, wanted: &WantedSector, parsed: ParsedSector) -> SectorGroup {
        SectorGroup {
            name: String::new(),
            transform: wanted.model_transform,
            payload: parsed,
        }
    }
}
