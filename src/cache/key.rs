//! Deterministic mosaic keys.
//!
//! A mosaic is addressed by `(year, bbox)`. The bbox is rounded to
//! [`KEY_PRECISION`] decimal places before hashing so that requests differing
//! only by sub-meter noise collapse to the same cache entry. The rounding and
//! the digest live here and nowhere else: the pipeline, the CLI and the HTTP
//! layer all derive hashes through [`MosaicKey::hash`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tile::TileFormat;

/// Decimal places kept when canonicalizing bbox coordinates.
pub const KEY_PRECISION: u32 = 3;

/// Number of digest bytes kept in a [`MosaicHash`] (128 bits).
const HASH_BYTES: usize = 16;

/// Longest string accepted as a hash path component.
const MAX_HASH_LEN: usize = 128;

// =============================================================================
// Bounding Box
// =============================================================================

/// Geographic bounding box in WGS84 degrees: `[west, south, east, north]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", from = "[f64; 4]")]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    /// Create a validated bounding box.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, String> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.to_array().iter().all(|v| v.is_finite()) {
            return Err("bbox values must be finite".to_string());
        }
        if !(-180.0..=180.0).contains(&self.west) || !(-180.0..=180.0).contains(&self.east) {
            return Err("bbox longitudes must be within [-180, 180]".to_string());
        }
        if !(-90.0..=90.0).contains(&self.south) || !(-90.0..=90.0).contains(&self.north) {
            return Err("bbox latitudes must be within [-90, 90]".to_string());
        }
        if self.west >= self.east {
            return Err(format!("bbox west ({}) must be less than east ({})", self.west, self.east));
        }
        if self.south >= self.north {
            return Err(format!(
                "bbox south ({}) must be less than north ({})",
                self.south, self.north
            ));
        }
        Ok(())
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// Round every component to [`KEY_PRECISION`] decimal places.
    pub fn rounded(self) -> Self {
        Self {
            west: round_coord(self.west),
            south: round_coord(self.south),
            east: round_coord(self.east),
            north: round_coord(self.north),
        }
    }
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self {
            west: v[0],
            south: v[1],
            east: v[2],
            north: v[3],
        }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}

impl FromStr for BBox {
    type Err = String;

    /// Parse `"west,south,east,north"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected 4 comma-separated values, got {}", parts.len()));
        }
        let mut values = [0.0f64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("invalid bbox value: {:?}", part))?;
        }
        BBox::new(values[0], values[1], values[2], values[3])
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

/// Round half away from zero, normalizing `-0.0` to `0.0`.
fn round_coord(value: f64) -> f64 {
    let scale = 10f64.powi(KEY_PRECISION as i32);
    (value * scale).round() / scale + 0.0
}

// =============================================================================
// Mosaic Key
// =============================================================================

/// Logical identity of a mosaic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MosaicKey {
    pub year: i32,
    pub bbox: BBox,
}

impl MosaicKey {
    pub fn new(year: i32, bbox: BBox) -> Self {
        Self { year, bbox }
    }

    /// The canonical string that is hashed: year plus the rounded bbox at
    /// fixed precision.
    pub fn canonical(&self) -> String {
        let b = self.bbox.rounded();
        let p = KEY_PRECISION as usize;
        format!(
            "{}:{:.p$},{:.p$},{:.p$},{:.p$}",
            self.year,
            b.west,
            b.south,
            b.east,
            b.north,
            p = p
        )
    }

    /// Derive the content address of this key.
    pub fn hash(&self) -> MosaicHash {
        let digest = Sha256::digest(self.canonical().as_bytes());
        MosaicHash(hex::encode(&digest[..HASH_BYTES]))
    }
}

// =============================================================================
// Mosaic Hash
// =============================================================================

/// Content address of a mosaic, used for every storage path and tile URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MosaicHash(String);

impl MosaicHash {
    /// Wrap an externally supplied hash (e.g. from a URL path).
    ///
    /// Only `[A-Za-z0-9_-]` is accepted so the value is always a single safe
    /// path component. Unknown but well-formed hashes are accepted here and
    /// resolve to "not found" later.
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() || s.len() > MAX_HASH_LEN {
            return Err(format!("hash length must be 1-{} characters", MAX_HASH_LEN));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(format!("hash contains invalid characters: {:?}", s));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative URL of one tile, matching the `/tiles` route.
    pub fn tile_path(&self, zoom: u8, x: u32, y: u32, format: TileFormat) -> String {
        format!("/tiles/{}/{}/{}/{}.{}", self.0, zoom, x, y, format.extension())
    }

    /// URL template for map clients (`{z}/{x}/{y}` placeholders).
    pub fn tile_template(&self, format: TileFormat) -> String {
        format!("/tiles/{}/{{z}}/{{x}}/{{y}}.{}", self.0, format.extension())
    }
}

impl fmt::Display for MosaicHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
