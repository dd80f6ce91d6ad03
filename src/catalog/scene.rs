//! Scene descriptors and catalog search parameters.

use serde::{Deserialize, Serialize};

use crate::cache::BBox;

/// One imagery product returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub cloud_cover_percent: f64,
    pub sun_elevation_degrees: f64,

    /// Location of the renderable asset (usually an HTTP URL)
    pub asset_ref: String,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        cloud_cover_percent: f64,
        sun_elevation_degrees: f64,
        asset_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            cloud_cover_percent,
            sun_elevation_degrees,
            asset_ref: asset_ref.into(),
        }
    }
}

/// Parameters of one catalog search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub bbox: BBox,
    pub year: i32,

    /// Scenes above this cloud cover percentage are excluded
    pub max_cloud_cover: f64,
}

impl SearchQuery {
    pub fn new(bbox: BBox, year: i32, max_cloud_cover: f64) -> Self {
        Self {
            bbox,
            year,
            max_cloud_cover,
        }
    }

    /// The full calendar year as an RFC 3339 interval.
    pub fn datetime_range(&self) -> String {
        format!(
            "{y}-01-01T00:00:00Z/{y}-12-31T23:59:59Z",
            y = self.year
        )
    }
}
