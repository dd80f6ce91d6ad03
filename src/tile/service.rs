//! Tile read path.
//!
//! Resolves `(hash, zoom, x, y, format)` to tile bytes. Tiles are only ever
//! read here; they are written exclusively by the pipeline.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      TileServer                         │
//! │  1. Validate request (400)                              │
//! │  2. Hot-tile cache ──hit──▶ return                      │
//! │  3. Mosaic metadata present?          no ──▶ 404 mosaic │
//! │  4. Disk store      ──miss──▶ 404 tile                  │
//! │  5. Populate hot cache, return                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::{CleanupReport, MosaicCache, MosaicHash};
use crate::error::{CacheError, TileError};

use super::cache::{HotTileCache, HotTileKey};
use super::format::TileFormat;

/// Deepest zoom level accepted on the read path.
pub const MAX_ZOOM: u8 = 24;

// =============================================================================
// Tile Request
// =============================================================================

/// A validated tile request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub hash: MosaicHash,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub format: TileFormat,
}

impl TileRequest {
    /// Build a request, checking that `(x, y)` lies inside the zoom grid.
    pub fn new(
        hash: MosaicHash,
        zoom: u8,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> Result<Self, TileError> {
        if zoom > MAX_ZOOM {
            return Err(invalid(format!(
                "zoom {} out of range (0-{})",
                zoom, MAX_ZOOM
            )));
        }
        let size = 1u32 << zoom;
        if x >= size || y >= size {
            return Err(invalid(format!(
                "tile ({}, {}) out of range at zoom {} (max: {})",
                x,
                y,
                zoom,
                size - 1
            )));
        }
        Ok(Self {
            hash,
            zoom,
            x,
            y,
            format,
        })
    }

    /// Parse raw path segments: `{hash}/{zoom}/{x}/{y}.{format}`.
    pub fn parse(hash: &str, zoom: &str, x: &str, filename: &str) -> Result<Self, TileError> {
        let (y, ext) = filename
            .rsplit_once('.')
            .ok_or_else(|| invalid(format!("missing tile format in {:?}", filename)))?;
        let format: TileFormat = ext.parse().map_err(|_| TileError::UnsupportedFormat {
            format: ext.to_string(),
        })?;

        let hash = MosaicHash::parse(hash).map_err(invalid)?;
        let zoom: u8 = zoom
            .parse()
            .map_err(|_| invalid(format!("zoom must be a non-negative integer, got {:?}", zoom)))?;
        let x: u32 = x
            .parse()
            .map_err(|_| invalid(format!("x must be a non-negative integer, got {:?}", x)))?;
        let y: u32 = y
            .parse()
            .map_err(|_| invalid(format!("y must be a non-negative integer, got {:?}", y)))?;

        Self::new(hash, zoom, x, y, format)
    }
}

fn invalid(message: impl Into<String>) -> TileError {
    TileError::InvalidRequest {
        message: message.into(),
    }
}

// =============================================================================
// Tile Response
// =============================================================================

#[derive(Debug, Clone)]
pub struct TileResponse {
    pub data: Bytes,
    pub format: TileFormat,

    /// Whether the tile came from the in-memory hot cache
    pub cache_hit: bool,
}

// =============================================================================
// Tile Server
// =============================================================================

/// Read-side service over a [`MosaicCache`].
pub struct TileServer {
    cache: MosaicCache,
    hot: HotTileCache,
}

impl TileServer {
    pub fn new(cache: MosaicCache) -> Self {
        Self {
            cache,
            hot: HotTileCache::new(),
        }
    }

    /// Create a tile server with a custom hot-tile capacity in bytes.
    pub fn with_hot_capacity(cache: MosaicCache, capacity: usize) -> Self {
        Self {
            cache,
            hot: HotTileCache::with_capacity(capacity),
        }
    }

    pub fn cache(&self) -> &MosaicCache {
        &self.cache
    }

    pub fn hot_cache(&self) -> &HotTileCache {
        &self.hot
    }

    /// Serve one tile.
    ///
    /// The hot cache is consulted first: it only ever holds tiles read from
    /// complete mosaics, and every deletion made through this server drops
    /// the mosaic's hot tiles.
    ///
    /// # Errors
    ///
    /// - [`TileError::MosaicNotFound`] if no complete mosaic exists for the hash
    /// - [`TileError::TileNotFound`] if the mosaic exists but lacks this tile
    /// - [`TileError::Cache`] on storage failures
    pub async fn get_tile(&self, request: &TileRequest) -> Result<TileResponse, TileError> {
        let key = HotTileKey::new(
            request.hash.clone(),
            request.zoom,
            request.x,
            request.y,
            request.format,
        );
        if let Some(data) = self.hot.get(&key).await {
            return Ok(TileResponse {
                data,
                format: request.format,
                cache_hit: true,
            });
        }

        if !self.cache.has_mosaic(&request.hash).await {
            return Err(TileError::MosaicNotFound {
                hash: request.hash.to_string(),
            });
        }

        let data = self
            .cache
            .get_tile(
                &request.hash,
                request.zoom,
                request.x,
                request.y,
                request.format,
            )
            .await?
            .ok_or_else(|| TileError::TileNotFound {
                hash: request.hash.to_string(),
                zoom: request.zoom,
                x: request.x,
                y: request.y,
                format: request.format.to_string(),
            })?;

        debug!(
            hash = %request.hash,
            zoom = request.zoom,
            x = request.x,
            y = request.y,
            bytes = data.len(),
            "Loaded tile from disk"
        );
        self.hot.put(key, data.clone()).await;

        Ok(TileResponse {
            data,
            format: request.format,
            cache_hit: false,
        })
    }

    /// Delete a mosaic from disk and drop its hot tiles.
    pub async fn delete_mosaic(&self, hash: &MosaicHash) -> Result<bool, CacheError> {
        self.hot.invalidate_mosaic(hash).await;
        self.cache.delete(hash).await
    }

    /// Run one age-based eviction pass and drop the evicted mosaics' hot tiles.
    pub async fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport, CacheError> {
        self.cleanup_at(max_age_days, Utc::now()).await
    }

    pub async fn cleanup_at(
        &self,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, CacheError> {
        let report = self.cache.evict_at(max_age_days, now).await?;
        for hash in report.removed() {
            self.hot.invalidate_mosaic(hash).await;
        }
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================
