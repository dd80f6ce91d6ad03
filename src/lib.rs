//! # mosaic-cache
//!
//! A content-addressed cache and tile server for satellite imagery mosaics.
//!
//! A mosaic is requested by `(year, bbox)`. The key is rounded and hashed so
//! that near-identical requests share one cache entry. On a miss the pipeline
//! searches a scene catalog, keeps the least cloudy scenes, renders a tile
//! pyramid and persists it. Cached tiles are then served over HTTP with
//! immutable caching headers.
//!
//! ## Features
//!
//! - **Deterministic keys**: rounded bbox plus SHA-256, one derivation everywhere
//! - **Durable store**: atomic writes, metadata written last as the commit marker
//! - **Bounded pipeline**: per-call timeouts, bounded retries, bounded tile workers
//! - **Single-flight**: concurrent requests for one key share one run
//! - **Hot tile cache**: byte-bounded LRU in front of disk reads
//!
//! ## Architecture
//!
//! - [`cache`] - Key derivation, metadata records and the disk store
//! - [`catalog`] - Scene search and ranking
//! - [`io`] - Retry policy and asset downloads
//! - [`pipeline`] - Scene processing, tile synthesis and orchestration
//! - [`tile`] - Tile formats, hot cache and the read path
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mosaic_cache::{create_router, MosaicCache, RouterConfig, TileServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tile_server = TileServer::new(MosaicCache::new("./data"));
//!     let router = create_router(tile_server, RouterConfig::default());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use cache::{BBox, MosaicCache, MosaicHash, MosaicKey, MosaicRecord, StorageStats};
pub use catalog::{CatalogConfig, Scene, SceneCatalog, SceneSelector, SearchQuery, StacCatalogClient};
pub use config::{Cli, Command, DownloadConfig, ServeConfig};
pub use error::{CacheError, CatalogError, FetchError, PipelineError, RenderError, TileError};
pub use io::{AssetFetcher, HttpAssetFetcher, RetryPolicy};
pub use pipeline::{
    CropTileRenderer, PipelineConfig, PipelineOrchestrator, PipelineRun, ProcessedScene,
    ProgressEvent, ProgressReporter, SceneProcessor, Stage, TileRenderer,
};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use tile::{TileFormat, TileRequest, TileResponse, TileServer};
