//! Persisted mosaic metadata (`metadata.json`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::{BBox, MosaicHash, MosaicKey};

/// Metadata record for one completed mosaic.
///
/// Written once, after every tile of the mosaic has been persisted. Field
/// names follow the on-disk JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicRecord {
    pub year: i32,
    pub bbox: BBox,
    pub hash: MosaicHash,
    pub download_date: DateTime<Utc>,
    pub tile_count: u64,
    #[serde(rename = "totalSize")]
    pub total_size_bytes: u64,
    #[serde(rename = "scenes")]
    pub scene_ids: Vec<String>,
}

impl MosaicRecord {
    /// Build a record stamped with the current time.
    pub fn new(key: &MosaicKey, tile_count: u64, total_size_bytes: u64, scene_ids: Vec<String>) -> Self {
        Self {
            year: key.year,
            bbox: key.bbox,
            hash: key.hash(),
            download_date: Utc::now(),
            tile_count,
            total_size_bytes,
            scene_ids,
        }
    }

    pub fn key(&self) -> MosaicKey {
        MosaicKey::new(self.year, self.bbox)
    }

    /// Age of the record relative to `now`, in whole days.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.download_date).num_days()
    }
}
