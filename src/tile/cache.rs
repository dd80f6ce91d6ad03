//! In-memory hot-tile cache.
//!
//! Sits in front of the disk store on the read path. Tiles are immutable for a
//! given `(hash, zoom, x, y, format)`, so an entry never goes stale while its
//! mosaic exists; the tile server checks mosaic existence before consulting
//! this cache, and deleted mosaics are dropped via [`HotTileCache::invalidate_mosaic`].
//!
//! Capacity is bounded in bytes; least-recently-used entries are evicted first.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::cache::MosaicHash;

use super::format::TileFormat;

/// Default hot-tile capacity: 64MB
pub const DEFAULT_HOT_TILE_CAPACITY: usize = 64 * 1024 * 1024;

/// Upper bound on entry count, independent of byte size
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Identity of one cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HotTileKey {
    pub hash: MosaicHash,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub format: TileFormat,
}

impl HotTileKey {
    pub fn new(hash: MosaicHash, zoom: u8, x: u32, y: u32, format: TileFormat) -> Self {
        Self {
            hash,
            zoom,
            x,
            y,
            format,
        }
    }
}

struct Inner {
    entries: LruCache<HotTileKey, Bytes>,
    size: usize,
}

/// Byte-bounded LRU of encoded tiles.
pub struct HotTileCache {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl HotTileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HOT_TILE_CAPACITY)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Look up a tile, marking it recently used.
    pub async fn get(&self, key: &HotTileKey) -> Option<Bytes> {
        self.inner.lock().await.entries.get(key).cloned()
    }

    /// Insert a tile and evict until within capacity.
    ///
    /// Tiles larger than the whole cache are not stored.
    pub async fn put(&self, key: HotTileKey, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }
        let mut inner = self.inner.lock().await;
        let added = data.len();

        if let Some((_, old)) = inner.entries.push(key, data) {
            // push returns either the replaced value or an entry evicted by count
            inner.size = inner.size.saturating_sub(old.len());
        }
        inner.size += added;

        while inner.size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.size = inner.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    /// Drop every cached tile belonging to `hash`.
    pub async fn invalidate_mosaic(&self, hash: &MosaicHash) -> usize {
        let mut inner = self.inner.lock().await;
        let stale: Vec<HotTileKey> = inner
            .entries
            .iter()
            .filter(|(k, _)| &k.hash == hash)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            if let Some(data) = inner.entries.pop(key) {
                inner.size = inner.size.saturating_sub(data.len());
            }
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Current total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for HotTileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
