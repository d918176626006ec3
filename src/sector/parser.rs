//! Consumed parser interface for sector blobs
//!
//! The wire formats are owned by format-specific codec crates; the
//! streaming core only needs `bytes -> structured geometry`. Parsing runs
//! on the loading tasks; offloading it to a worker pool is a deployment
//! concern, not a correctness one.

use crate::error::ParseError;
use crate::sector::geometry::{PeripheralInput, SectorGeometry, SectorQuads};

/// Decodes sector blobs into structured geometry
pub trait SectorParser: Send + Sync {
    /// Decode a simple-sector quads blob
    fn parse_simple(&self, bytes: &[u8]) -> Result<SectorQuads, ParseError>;

    /// Decode a detailed-sector index blob together with its merged
    /// peripheral compressed-mesh payloads
    fn parse_detailed(
        &self,
        index_bytes: &[u8],
        peripherals: &PeripheralInput,
    ) -> Result<SectorGeometry, ParseError>;
}
