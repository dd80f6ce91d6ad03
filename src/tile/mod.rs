//! Tile read path.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileServer                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ HotTileCache │  │  TileRequest    │  │
//! │  │ (LRU, bytes) │  │  (validation)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              MosaicCache                │
//! └─────────────────────────────────────────┘
//! ```

mod cache;
mod format;
mod service;

pub use cache::{HotTileCache, HotTileKey, DEFAULT_HOT_TILE_CAPACITY};
pub use format::TileFormat;
pub use service::{TileRequest, TileResponse, TileServer, MAX_ZOOM};
