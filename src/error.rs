//! Error types for the streaming engine
//!
//! Errors that flow through shared load futures are `Clone` so that every
//! caller holding the same deduplicated future observes the same failure.

use thiserror::Error;

/// HTTP-level failure reported by a data provider (non-2xx or transport error)
#[derive(Debug, Clone, Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpError {
    /// Status code, or 0 for transport failures with no response
    pub status: u16,
    /// Response headers, if a response was received
    pub headers: Vec<(String, String)>,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            message: message.into(),
        }
    }

    /// Transport-level failure (no HTTP response)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }
}

/// Malformed binary payload
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("malformed sector payload: {0}")]
    MalformedSector(String),

    #[error("peripheral file name {0:?} has no numeric id")]
    InvalidPeripheralFileName(String),
}

/// Failure surfaced on a single sector's load pipeline
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(#[from] HttpError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("sector {0} has no simple representation")]
    NoSimpleRepresentation(u64),

    #[error("repository disposed")]
    Disposed,
}

/// Failure while loading model metadata
///
/// These abort the model load entirely and are not retried.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has no supported output, got [{available}] but only [{supported}] are supported")]
    UnsupportedModelOutput { available: String, supported: String },

    #[error("unknown model unit {0:?}")]
    UnknownUnit(String),

    #[error("scene metadata decode failed: {0}")]
    InvalidSceneMetadata(#[from] serde_json::Error),

    #[error("scene has no root sector")]
    MissingRootSector,

    #[error("metadata request failed: {0}")]
    Http(#[from] HttpError),
}

/// Programmer error: `get` on a cache key that was never inserted or was evicted
#[derive(Debug, Clone, Error)]
#[error("cache miss for key {key:?}")]
pub struct CacheMiss {
    pub key: String,
}
