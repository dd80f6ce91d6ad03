//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                  - Health check
//! /tiles/{hash}/{zoom}/{x}/{y}.{ext}       - Tile endpoint
//! /mosaics                                 - Cached mosaic listing
//! /stats                                   - Storage statistics
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mosaic_cache::cache::MosaicCache;
//! use mosaic_cache::server::{create_router, RouterConfig};
//! use mosaic_cache::tile::TileServer;
//!
//! let tile_server = TileServer::new(MosaicCache::new("./data"));
//! let router = create_router(tile_server, RouterConfig::default());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, mosaics_handler, stats_handler, tile_handler, AppState, DEFAULT_CACHE_MAX_AGE,
};
use crate::tile::TileServer;

// =============================================================================
// Router Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    pub enable_tracing: bool,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router over an owned or shared tile server.
pub fn create_router(tile_server: impl Into<Arc<TileServer>>, config: RouterConfig) -> Router {
    let app_state = AppState::with_cache_max_age(tile_server, config.cache_max_age);
    let cors = build_cors_layer(&config);

    // {filename} captures "{y}.{ext}"
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tiles/{hash}/{zoom}/{x}/{filename}", get(tile_handler))
        .route("/mosaics", get(mosaics_handler))
        .route("/stats", get(stats_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
