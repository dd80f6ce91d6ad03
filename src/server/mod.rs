//! HTTP server layer.
//!
//! Read-only API over the mosaic store: tiles, mosaic listing and storage
//! statistics. Mosaics are produced by the pipeline, never by the server.

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, mosaics_handler, stats_handler, tile_handler, AppState, ErrorResponse,
    HealthResponse, HotCacheStats, MosaicSummary, MosaicsResponse, StatsResponse, TilePathParams,
    DEFAULT_CACHE_MAX_AGE,
};
pub use routes::{create_router, RouterConfig};
