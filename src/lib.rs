//! Cadstream - sector streaming and caching for massive CAD scenes

pub mod cache;
pub mod counter;
pub mod culling;
pub mod error;
pub mod math;
pub mod metadata;
pub mod network;
pub mod sector;
pub mod update_handler;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::MemoryRequestCache;
pub use counter::LoadingCounter;
pub use culling::{ByVisibilityCuller, CoverageOracle, DetermineSectorsInput, SectorCuller};
pub use error::{HttpError, LoadError, ModelError, ParseError};
pub use metadata::{CadModelMetadata, CadModelMetadataRepository, ModelIdentifier};
pub use sector::repository::{CachedSectorRepository, RepositoryConfig};
pub use sector::{ConsumedSector, LevelOfDetail, WantedSector};
pub use update_handler::CadModelUpdateHandler;
