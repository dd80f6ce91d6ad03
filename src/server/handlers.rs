//! HTTP request handlers for the mosaic tile API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{hash}/{zoom}/{x}/{y}.{ext}` - Serve a cached tile
//! - `GET /mosaics` - List cached mosaics with their tile URL templates
//! - `GET /stats` - Storage and hot-cache statistics
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::cache::{MosaicRecord, StorageStats};
use crate::error::{CacheError, TileError};
use crate::tile::{TileFormat, TileRequest, TileServer};

/// Default Cache-Control max-age for tiles (one year). Tiles under a hash
/// never change, so clients may cache them indefinitely.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 31_536_000;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tile_server: Arc<TileServer>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(tile_server: impl Into<Arc<TileServer>>) -> Self {
        Self::with_cache_max_age(tile_server, DEFAULT_CACHE_MAX_AGE)
    }

    /// Accepts an owned or shared tile server, so a cleanup daemon can share
    /// the same hot cache.
    pub fn with_cache_max_age(tile_server: impl Into<Arc<TileServer>>, cache_max_age: u32) -> Self {
        Self {
            tile_server: tile_server.into(),
            cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from `/tiles/{hash}/{zoom}/{x}/{filename}` where filename is
/// `{y}.{ext}`. Kept as strings so malformed numbers produce the same JSON
/// error body as every other validation failure.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub hash: String,
    pub zoom: String,
    pub x: String,
    pub filename: String,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One cached mosaic as listed by `GET /mosaics`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicSummary {
    #[serde(flatten)]
    pub record: MosaicRecord,

    /// Tile URL template with `{z}/{x}/{y}` placeholders
    pub tile_url: String,
}

#[derive(Debug, Serialize)]
pub struct MosaicsResponse {
    pub mosaics: Vec<MosaicSummary>,
}

/// In-memory hot tile cache occupancy.
#[derive(Debug, Serialize)]
pub struct HotCacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub storage: StorageStats,
    pub hot_cache: HotCacheStats,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Build a JSON error response, logging by severity.
///
/// 5xx at ERROR, 404 at DEBUG (common and expected), other 4xx at WARN.
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            TileError::UnsupportedFormat { .. } => {
                (StatusCode::BAD_REQUEST, "unsupported_format")
            }
            TileError::MosaicNotFound { .. } => (StatusCode::NOT_FOUND, "mosaic_not_found"),
            TileError::TileNotFound { .. } => (StatusCode::NOT_FOUND, "tile_not_found"),
            TileError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        error_response(status, error_type, self.to_string())
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            self.to_string(),
        )
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{hash}/{zoom}/{x}/{y}.{ext}` with `ext` one of `png`, `jpg`,
/// `webp`.
///
/// # Response
///
/// - `200 OK`: tile bytes with the format's content type
/// - `400 Bad Request`: malformed coordinates or unsupported format
/// - `404 Not Found`: unknown mosaic, or a mosaic without this tile
/// - `500 Internal Server Error`: storage failure
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}, immutable`
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler(
    State(state): State<AppState>,
    Path(params): Path<TilePathParams>,
) -> Result<Response, TileError> {
    let request = TileRequest::parse(&params.hash, &params.zoom, &params.x, &params.filename)?;
    let tile = state.tile_server.get_tile(&request).await?;

    let response = (
        [
            (header::CONTENT_TYPE, tile.format.content_type().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}, immutable", state.cache_max_age),
            ),
        ],
        [("X-Tile-Cache-Hit", tile.cache_hit.to_string())],
        Body::from(tile.data),
    )
        .into_response();

    Ok(response)
}

/// Handle health check requests.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List every complete mosaic, newest first.
///
/// The tile URL template uses whichever format the mosaic's root tile was
/// written in.
pub async fn mosaics_handler(
    State(state): State<AppState>,
) -> Result<Json<MosaicsResponse>, CacheError> {
    let cache = state.tile_server.cache();
    let records = cache.list_all().await?;

    let mut mosaics = Vec::with_capacity(records.len());
    for record in records {
        let mut format = TileFormat::Png;
        for candidate in TileFormat::ALL {
            if cache.tile_exists(&record.hash, 0, 0, 0, candidate).await {
                format = candidate;
                break;
            }
        }
        mosaics.push(MosaicSummary {
            tile_url: record.hash.tile_template(format),
            record,
        });
    }

    Ok(Json(MosaicsResponse { mosaics }))
}

/// Aggregate storage and hot-cache statistics.
pub async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, CacheError> {
    let storage = state.tile_server.cache().stats().await?;
    let hot = state.tile_server.hot_cache();

    Ok(Json(StatsResponse {
        storage,
        hot_cache: HotCacheStats {
            entries: hot.len().await,
            size_bytes: hot.size().await,
            capacity_bytes: hot.capacity(),
        },
    }))
}

// =============================================================================
// Tests
// =============================================================================
