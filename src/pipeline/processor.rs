//! Scene acquisition and normalization.
//!
//! Fetches a scene's asset and decodes it into an RGBA working image no
//! larger than `working_size` pixels on its longest side. Decoding and
//! resizing run on the blocking pool.

use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::catalog::Scene;
use crate::error::FetchError;
use crate::io::AssetFetcher;

/// Default longest side of a working image, in pixels.
pub const DEFAULT_WORKING_SIZE: u32 = 1024;

/// A scene ready for tile rendering.
#[derive(Debug, Clone)]
pub struct ProcessedScene {
    pub scene_id: String,
    pub image: Arc<DynamicImage>,
}

/// Turns scene descriptors into in-memory working images.
pub struct SceneProcessor<F: AssetFetcher> {
    fetcher: Arc<F>,
    working_size: u32,
}

impl<F: AssetFetcher> SceneProcessor<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_working_size(fetcher, DEFAULT_WORKING_SIZE)
    }

    pub fn with_working_size(fetcher: F, working_size: u32) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            working_size: working_size.max(1),
        }
    }

    /// Fetch and normalize one scene.
    pub async fn process(&self, scene: &Scene) -> Result<ProcessedScene, FetchError> {
        let bytes = self.fetcher.fetch(scene).await?;
        let working_size = self.working_size;

        let image = tokio::task::spawn_blocking(move || normalize(&bytes, working_size))
            .await
            .map_err(|e| FetchError::Decode(format!("decode task failed: {}", e)))??;

        debug!(
            scene_id = %scene.id,
            width = image.width(),
            height = image.height(),
            "Normalized scene"
        );

        Ok(ProcessedScene {
            scene_id: scene.id.clone(),
            image: Arc::new(image),
        })
    }
}

/// Decode `bytes` and downscale so the longest side is at most `max_side`.
pub fn normalize(bytes: &[u8], max_side: u32) -> Result<DynamicImage, FetchError> {
    let image = image::load_from_memory(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FetchError::Decode("image has zero size".to_string()));
    }

    let image = if width.max(height) > max_side {
        image.resize(max_side, max_side, FilterType::Triangle)
    } else {
        image
    };
    Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
}
