use thiserror::Error;

use crate::pipeline::ProgressEvent;

/// Errors raised by the durable mosaic store.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem error while reading or writing the store
    #[error("Storage I/O error at {path}: {message}")]
    Io { path: String, message: String },

    /// Metadata exists but cannot be read or parsed
    #[error("Corrupted metadata for mosaic {hash}: {reason}")]
    Corrupted { hash: String, reason: String },

    /// Hash is not a safe path component
    #[error("Invalid mosaic hash: {0:?}")]
    InvalidHash(String),

    /// Metadata could not be serialized
    #[error("Failed to serialize metadata: {0}")]
    Serialize(String),
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors from the imagery catalog search.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Connection-level failure
    #[error("Catalog request failed: {0}")]
    Http(String),

    /// The request did not complete within the configured timeout
    #[error("Catalog request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The catalog answered with a non-success status
    #[error("Catalog returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not a valid feature collection
    #[error("Invalid catalog response: {0}")]
    Decode(String),

    /// The search URL could not be built
    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(String),
}

/// Errors fetching a single scene asset.
///
/// These are absorbed by the pipeline: the scene is dropped and processing
/// continues with the remaining scenes.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection-level failure
    #[error("Asset request failed: {0}")]
    Http(String),

    /// The download did not complete within the configured timeout
    #[error("Asset request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The asset server answered with a non-success status
    #[error("Asset server returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// The downloaded bytes are not a decodable image
    #[error("Failed to decode asset: {0}")]
    Decode(String),
}

/// Errors rendering or encoding a single tile.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Failed to encode tile: {0}")]
    Encode(String),

    #[error("Tile format {0} cannot be encoded by this renderer")]
    UnsupportedFormat(String),

    /// The blocking render task panicked or was cancelled
    #[error("Render task failed: {0}")]
    Task(String),
}

/// Errors that terminate a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The catalog returned zero usable scenes
    #[error("No scenes found for {year} in the requested area")]
    NoData {
        year: i32,
        last_progress: Box<ProgressEvent>,
    },

    /// The catalog search itself failed after retries
    #[error("Catalog search failed: {0}")]
    Catalog(#[from] CatalogError),

    /// The final metadata record could not be persisted
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The caller abandoned the run
    #[error("Pipeline cancelled")]
    Cancelled,
}

/// Errors on the tile read path.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Malformed coordinates or hash (400)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Extension outside the allow-list (400)
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    /// No complete mosaic exists for this hash (404)
    #[error("Mosaic not found: {hash}")]
    MosaicNotFound { hash: String },

    /// Mosaic exists but this tile was never written (404)
    #[error("Tile not found: {hash}/{zoom}/{x}/{y}.{format}")]
    TileNotFound {
        hash: String,
        zoom: u8,
        x: u32,
        y: u32,
        format: String,
    },

    /// Storage failure while reading (500)
    #[error("Storage error: {0}")]
    Cache(#[from] CacheError),
}
