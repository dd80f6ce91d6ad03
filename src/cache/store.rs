//! Durable, content-addressed mosaic store.
//!
//! # Layout
//!
//! ```text
//! {storage_root}/tiles/{hash}/metadata.json
//! {storage_root}/tiles/{hash}/{zoom}/{x}/{y}.{format}
//! ```
//!
//! A mosaic exists only once its `metadata.json` is readable. Tiles are
//! written first and metadata last, so a directory holding tiles but no
//! metadata (a crashed or abandoned run) is never reported as a mosaic.
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! readers observe either the previous content or the new content, never a
//! partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::tile::TileFormat;

use super::key::MosaicHash;
use super::record::MosaicRecord;

/// Name of the per-mosaic metadata file.
pub const METADATA_FILE: &str = "metadata.json";

/// Subdirectory of the storage root holding all mosaics.
const TILES_DIR: &str = "tiles";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// =============================================================================
// Storage Stats
// =============================================================================

/// Aggregate statistics over all complete mosaics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub mosaic_count: usize,
    pub tile_count: u64,
    pub total_size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Directories removed by one eviction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    /// Complete mosaics older than the cutoff
    pub expired: Vec<MosaicHash>,

    /// Directories without readable metadata older than the cutoff
    pub abandoned: Vec<MosaicHash>,
}

impl CleanupReport {
    /// Every removed hash, expired first.
    pub fn removed(&self) -> impl Iterator<Item = &MosaicHash> {
        self.expired.iter().chain(self.abandoned.iter())
    }
}

struct ScanEntry {
    hash: MosaicHash,
    modified: Option<DateTime<Utc>>,
    state: EntryState,
}

enum EntryState {
    Complete(Box<MosaicRecord>),
    Incomplete,
    Corrupted,
}

// =============================================================================
// Mosaic Cache
// =============================================================================

/// Filesystem-backed mosaic store.
///
/// Cheap to clone; holds only the storage root. Construct one per storage
/// root and pass it to the pipeline and the tile server.
#[derive(Debug, Clone)]
pub struct MosaicCache {
    root: PathBuf,
}

impl MosaicCache {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.root
    }

    fn tiles_root(&self) -> PathBuf {
        self.root.join(TILES_DIR)
    }

    fn mosaic_dir(&self, hash: &MosaicHash) -> Result<PathBuf, CacheError> {
        // Hashes deserialized from disk bypass MosaicHash::parse.
        MosaicHash::parse(hash.as_str()).map_err(|_| CacheError::InvalidHash(hash.to_string()))?;
        Ok(self.tiles_root().join(hash.as_str()))
    }

    fn metadata_path(&self, hash: &MosaicHash) -> Result<PathBuf, CacheError> {
        Ok(self.mosaic_dir(hash)?.join(METADATA_FILE))
    }

    fn tile_file(
        &self,
        hash: &MosaicHash,
        zoom: u8,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> Result<PathBuf, CacheError> {
        Ok(self
            .mosaic_dir(hash)?
            .join(zoom.to_string())
            .join(x.to_string())
            .join(format!("{}.{}", y, format.extension())))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// True iff a readable metadata record exists for `hash`.
    pub async fn has_mosaic(&self, hash: &MosaicHash) -> bool {
        self.get_info(hash).await.is_some()
    }

    /// Load the metadata record for `hash`.
    ///
    /// Missing and corrupted metadata both return `None`; corruption is
    /// logged.
    pub async fn get_info(&self, hash: &MosaicHash) -> Option<MosaicRecord> {
        match self.read_info(hash).await {
            Ok(record) => record,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Ignoring unreadable mosaic metadata");
                None
            }
        }
    }

    /// Load metadata, distinguishing "absent" (`Ok(None)`) from corruption.
    pub async fn read_info(&self, hash: &MosaicHash) -> Result<Option<MosaicRecord>, CacheError> {
        let path = self.metadata_path(hash)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Corrupted {
                    hash: hash.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| CacheError::Corrupted {
                hash: hash.to_string(),
                reason: e.to_string(),
            })
    }

    /// Persist the metadata record, replacing any existing one.
    ///
    /// Call only after every tile of the mosaic has been written.
    pub async fn save_info(&self, record: &MosaicRecord) -> Result<(), CacheError> {
        let dir = self.mosaic_dir(&record.hash)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| CacheError::Serialize(e.to_string()))?;
        write_atomic(&dir.join(METADATA_FILE), &json).await?;

        debug!(
            hash = %record.hash,
            tile_count = record.tile_count,
            total_size = record.total_size_bytes,
            "Saved mosaic metadata"
        );
        Ok(())
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Write one tile, overwriting any previous payload at that coordinate.
    ///
    /// Returns the number of bytes written.
    pub async fn save_tile(
        &self,
        hash: &MosaicHash,
        zoom: u8,
        x: u32,
        y: u32,
        data: &[u8],
        format: TileFormat,
    ) -> Result<u64, CacheError> {
        let path = self.tile_file(hash, zoom, x, y, format)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }
        write_atomic(&path, data).await?;
        Ok(data.len() as u64)
    }

    pub async fn tile_exists(
        &self,
        hash: &MosaicHash,
        zoom: u8,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> bool {
        match self.tile_file(hash, zoom, x, y, format) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Read one tile. `Ok(None)` means "not cached".
    pub async fn get_tile(
        &self,
        hash: &MosaicHash,
        zoom: u8,
        x: u32,
        y: u32,
        format: TileFormat,
    ) -> Result<Option<Bytes>, CacheError> {
        let path = self.tile_file(hash, zoom, x, y, format)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    // =========================================================================
    // Listing and Eviction
    // =========================================================================

    /// Every complete mosaic in the store.
    ///
    /// Directories without metadata are skipped silently; directories with
    /// unparseable metadata are skipped with a warning.
    pub async fn list_all(&self) -> Result<Vec<MosaicRecord>, CacheError> {
        let mut records: Vec<MosaicRecord> = self
            .scan()
            .await?
            .into_iter()
            .filter_map(|entry| match entry.state {
                EntryState::Complete(record) => Some(*record),
                EntryState::Incomplete | EntryState::Corrupted => None,
            })
            .collect();

        records.sort_by(|a, b| b.download_date.cmp(&a.download_date));
        Ok(records)
    }

    /// Walk every mosaic directory under the storage root.
    ///
    /// The directory name is authoritative: a record whose `hash` field
    /// disagrees with its directory is reported under the directory hash.
    async fn scan(&self) -> Result<Vec<ScanEntry>, CacheError> {
        let tiles_root = self.tiles_root();
        let mut entries = match tokio::fs::read_dir(&tiles_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&tiles_root, e)),
        };

        let mut scanned = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&tiles_root, e))?
        {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(hash) = name.to_str().and_then(|n| MosaicHash::parse(n).ok()) else {
                debug!(entry = ?name, "Skipping non-mosaic directory");
                continue;
            };
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);

            let state = match self.read_info(&hash).await {
                Ok(Some(mut record)) => {
                    if record.hash != hash {
                        warn!(
                            hash = %hash,
                            recorded = %record.hash,
                            "Metadata hash disagrees with its directory; using the directory"
                        );
                        record.hash = hash.clone();
                    }
                    EntryState::Complete(Box::new(record))
                }
                Ok(None) => {
                    debug!(hash = %hash, "Skipping incomplete mosaic (no metadata)");
                    EntryState::Incomplete
                }
                Err(e) => {
                    warn!(hash = %hash, error = %e, "Skipping corrupted mosaic");
                    EntryState::Corrupted
                }
            };
            scanned.push(ScanEntry {
                hash,
                modified,
                state,
            });
        }

        Ok(scanned)
    }

    /// Remove a mosaic's metadata and tiles.
    ///
    /// Metadata goes first so a partially deleted mosaic is never listed.
    /// Returns `false` if nothing existed.
    pub async fn delete(&self, hash: &MosaicHash) -> Result<bool, CacheError> {
        let dir = self.mosaic_dir(hash)?;
        let metadata = dir.join(METADATA_FILE);

        match tokio::fs::remove_file(&metadata).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&metadata, e)),
        }

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(hash = %hash, "Deleted mosaic");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&dir, e)),
        }
    }

    /// Delete every mosaic downloaded more than `max_age_days` ago.
    ///
    /// Returns the number of expired mosaics deleted.
    pub async fn cleanup(&self, max_age_days: u32) -> Result<usize, CacheError> {
        self.cleanup_at(max_age_days, Utc::now()).await
    }

    /// [`cleanup`](Self::cleanup) against an explicit clock.
    pub async fn cleanup_at(
        &self,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> Result<usize, CacheError> {
        Ok(self.evict_at(max_age_days, now).await?.expired.len())
    }

    /// Run one eviction pass and report which directories were removed.
    ///
    /// Besides expired mosaics, directories left without readable metadata
    /// (abandoned runs, corrupted records) are removed once their
    /// modification time is older than the cutoff.
    pub async fn evict_at(
        &self,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, CacheError> {
        let mut report = CleanupReport::default();

        // A cutoff before the earliest representable time expires nothing.
        let Some(cutoff) = now.checked_sub_signed(Duration::days(i64::from(max_age_days))) else {
            debug!(max_age_days, "Cleanup cutoff predates every record");
            return Ok(report);
        };

        for entry in self.scan().await? {
            let expired = match &entry.state {
                EntryState::Complete(record) => record.download_date < cutoff,
                EntryState::Incomplete | EntryState::Corrupted => {
                    entry.modified.is_some_and(|modified| modified < cutoff)
                }
            };
            if !expired {
                continue;
            }

            match self.delete(&entry.hash).await {
                Ok(true) => match entry.state {
                    EntryState::Complete(_) => report.expired.push(entry.hash),
                    EntryState::Incomplete | EntryState::Corrupted => {
                        report.abandoned.push(entry.hash)
                    }
                },
                Ok(false) => {}
                Err(e) => warn!(hash = %entry.hash, error = %e, "Failed to delete expired mosaic"),
            }
        }

        info!(
            max_age_days,
            deleted = report.expired.len(),
            abandoned = report.abandoned.len(),
            "Mosaic cleanup finished"
        );
        Ok(report)
    }

    /// Aggregate statistics over all complete mosaics.
    pub async fn stats(&self) -> Result<StorageStats, CacheError> {
        let records = self.list_all().await?;
        Ok(StorageStats {
            mosaic_count: records.len(),
            tile_count: records.iter().map(|r| r.tile_count).sum(),
            total_size_bytes: records.iter().map(|r| r.total_size_bytes).sum(),
            oldest: records.iter().map(|r| r.download_date).min(),
            newest: records.iter().map(|r| r.download_date).max(),
        })
    }
}

/// Write `data` to a unique temporary sibling, then rename over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = tokio::fs::write(&tmp, data).await {
        return Err(CacheError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CacheError::io(path, e));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
