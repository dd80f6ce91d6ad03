//! Content-addressed mosaic cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  (year, bbox) ──round──▶ canonical ──SHA-256──▶ hash │
//! └──────────────────────────┬───────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                     MosaicCache                      │
//! │   tiles/{hash}/metadata.json                         │
//! │   tiles/{hash}/{z}/{x}/{y}.{format}                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`MosaicKey`] / [`MosaicHash`]: deterministic key derivation
//! - [`MosaicRecord`]: persisted per-mosaic metadata
//! - [`MosaicCache`]: durable storage, listing, deletion and eviction
//! - [`run_cleanup_daemon`]: periodic age-based eviction

mod daemon;
mod key;
mod record;
mod store;

pub use daemon::run_cleanup_daemon;
pub use key::{BBox, MosaicHash, MosaicKey, KEY_PRECISION};
pub use record::MosaicRecord;
pub use store::{CleanupReport, MosaicCache, StorageStats, METADATA_FILE};
