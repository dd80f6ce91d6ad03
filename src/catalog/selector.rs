//! Scene ranking.

use std::cmp::Ordering;

use super::scene::Scene;

/// Default number of scenes kept per mosaic.
pub const DEFAULT_MAX_SCENES: usize = 5;

/// Ranks scenes by quality and keeps the best `max_scenes`.
///
/// Order: ascending cloud cover, then descending sun elevation, then id so the
/// result is deterministic for identical inputs.
#[derive(Debug, Clone, Copy)]
pub struct SceneSelector {
    max_scenes: usize,
}

impl SceneSelector {
    pub fn new(max_scenes: usize) -> Self {
        Self { max_scenes }
    }

    pub fn max_scenes(&self) -> usize {
        self.max_scenes
    }

    pub fn select(&self, mut scenes: Vec<Scene>) -> Vec<Scene> {
        scenes.sort_by(compare_scenes);
        scenes.truncate(self.max_scenes);
        scenes
    }
}

impl Default for SceneSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SCENES)
    }
}

fn compare_scenes(a: &Scene, b: &Scene) -> Ordering {
    a.cloud_cover_percent
        .total_cmp(&b.cloud_cover_percent)
        .then_with(|| b.sun_elevation_degrees.total_cmp(&a.sun_elevation_degrees))
        .then_with(|| a.id.cmp(&b.id))
}
