//! Tile synthesis.
//!
//! A [`TileRenderer`] turns one processed scene into one encoded tile. The
//! pyramid is a quadtree: zoom `z` splits the scene into a `2^z x 2^z` grid
//! and tile `(x, y)` is the cell in column `x`, row `y`.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::processor::ProcessedScene;
use super::progress::TileCoord;
use crate::error::RenderError;
use crate::tile::TileFormat;

/// Default tile edge length, in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default JPEG quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Number of tiles in a pyramid covering zoom levels `0..=max_zoom`.
pub fn pyramid_tile_count(max_zoom: u8) -> u64 {
    (0..=u32::from(max_zoom)).map(|z| 1u64 << (2 * z)).sum()
}

/// Renders one tile from one scene.
///
/// Implementations are synchronous and CPU-bound; the pipeline calls them
/// from the blocking pool.
pub trait TileRenderer: Send + Sync {
    /// Render the tile at `coord`.
    ///
    /// `Ok(None)` means the scene has no coverage for this cell and the next
    /// ranked scene should be tried.
    fn render(
        &self,
        scene: &ProcessedScene,
        coord: TileCoord,
        format: TileFormat,
    ) -> Result<Option<Vec<u8>>, RenderError>;

    /// Whether this renderer can encode `format` at all.
    fn supports(&self, _format: TileFormat) -> bool {
        true
    }
}

/// Crops the grid cell out of the working image and scales it to the tile
/// size.
#[derive(Debug, Clone)]
pub struct CropTileRenderer {
    tile_size: u32,
    jpeg_quality: u8,
}

impl CropTileRenderer {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }
}

impl Default for CropTileRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl TileRenderer for CropTileRenderer {
    fn render(
        &self,
        scene: &ProcessedScene,
        coord: TileCoord,
        format: TileFormat,
    ) -> Result<Option<Vec<u8>>, RenderError> {
        let image = scene.image.as_ref();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let cells = 1u64 << coord.zoom;
        let (x0, cw) = cell_span(coord.x, cells, width);
        let (y0, ch) = cell_span(coord.y, cells, height);

        let tile = image
            .crop_imm(x0, y0, cw, ch)
            .resize_exact(self.tile_size, self.tile_size, FilterType::Triangle);

        encode(&tile, format, self.jpeg_quality).map(Some)
    }

    fn supports(&self, format: TileFormat) -> bool {
        is_encodable(format)
    }
}

/// Formats [`encode`] can produce.
pub fn is_encodable(format: TileFormat) -> bool {
    matches!(format, TileFormat::Png | TileFormat::Jpg)
}

/// Pixel offset and extent of grid cell `index` along an axis of `len` pixels.
///
/// Cells are at least one pixel wide so deep zoom levels on small images
/// still produce a tile.
fn cell_span(index: u32, cells: u64, len: u32) -> (u32, u32) {
    let len = u64::from(len);
    let start = (u64::from(index) * len / cells).min(len - 1);
    let end = (u64::from(index) + 1) * len / cells;
    let extent = end.saturating_sub(start).max(1).min(len - start);
    (start as u32, extent as u32)
}

/// Encode a rendered tile.
pub fn encode(image: &DynamicImage, format: TileFormat, quality: u8) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::new();
    match format {
        TileFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .map_err(|e| RenderError::Encode(e.to_string()))?;
        }
        TileFormat::Jpg => {
            // JPEG has no alpha channel
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&rgb)
                .map_err(|e| RenderError::Encode(e.to_string()))?;
        }
        TileFormat::Webp => return Err(RenderError::UnsupportedFormat(format.to_string())),
    }
    Ok(out)
}
