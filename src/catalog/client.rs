//! Imagery catalog search.
//!
//! The catalog is queried with
//!
//! ```text
//! GET {base_url}/search?bbox=w,s,e,n&datetime=start/end&collections=...
//!     &limit=N&filter={"cloudCover":{"lte":X}}
//! ```
//!
//! and answers with `{"features": [...]}`. Both STAC-style features
//! (`properties."eo:cloud_cover"`, `assets.{key}.href`) and flat features
//! (`cloudCover`, `sunElevation`, `assetRef`) are understood.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::error::CatalogError;
use crate::io::{is_retryable_status, with_retry, Attempt, RetryError, RetryPolicy};

use super::scene::{Scene, SearchQuery};

/// Default maximum number of features requested per search.
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

/// Default asset key used to pick the renderable asset of a STAC feature.
///
/// Earth Search publishes `thumbnail` as a JPEG preview; `visual` is the
/// full-resolution GeoTIFF and is far heavier to fetch and decode.
pub const DEFAULT_ASSET_KEY: &str = "thumbnail";

// =============================================================================
// SceneCatalog Trait
// =============================================================================

/// Source of candidate scenes.
#[async_trait]
pub trait SceneCatalog: Send + Sync {
    /// Find scenes intersecting the query bbox within the query year whose
    /// cloud cover does not exceed the query ceiling.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Scene>, CatalogError>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    id: String,
    #[serde(default)]
    cloud_cover: Option<f64>,
    #[serde(default)]
    sun_elevation: Option<f64>,
    #[serde(default)]
    asset_ref: Option<String>,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    assets: HashMap<String, Asset>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(default, rename = "eo:cloud_cover", alias = "cloudCover")]
    cloud_cover: Option<f64>,
    #[serde(default, rename = "view:sun_elevation", alias = "sunElevation")]
    sun_elevation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    href: String,
}

impl Feature {
    fn into_scene(self, asset_key: &str) -> Option<Scene> {
        let cloud_cover = self.cloud_cover.or(self.properties.cloud_cover)?;
        let sun_elevation = self
            .sun_elevation
            .or(self.properties.sun_elevation)
            .unwrap_or(0.0);
        let mut assets = self.assets;
        let asset_ref = self
            .asset_ref
            .or_else(|| assets.remove(asset_key).map(|a| a.href))?;

        Some(Scene {
            id: self.id,
            cloud_cover_percent: cloud_cover,
            sun_elevation_degrees: sun_elevation,
            asset_ref,
        })
    }
}

/// Parse a feature collection into usable scenes.
///
/// Features lacking cloud cover or a renderable asset are dropped, as are
/// features above the cloud-cover ceiling (catalogs may ignore the filter).
pub fn parse_features(
    body: &[u8],
    asset_key: &str,
    max_cloud_cover: f64,
) -> Result<Vec<Scene>, CatalogError> {
    let collection: FeatureCollection =
        serde_json::from_slice(body).map_err(|e| CatalogError::Decode(e.to_string()))?;

    let total = collection.features.len();
    let scenes: Vec<Scene> = collection
        .features
        .into_iter()
        .filter_map(|f| {
            let id = f.id.clone();
            let scene = f.into_scene(asset_key);
            if scene.is_none() {
                debug!(scene_id = %id, "Skipping feature without cloud cover or asset");
            }
            scene
        })
        .filter(|s| s.cloud_cover_percent <= max_cloud_cover)
        .collect();

    if scenes.len() < total {
        debug!(total, usable = scenes.len(), "Filtered catalog features");
    }
    Ok(scenes)
}

// =============================================================================
// HTTP Client
// =============================================================================

/// Settings for [`StacCatalogClient`].
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub collections: Vec<String>,
    pub limit: u32,
    pub asset_key: String,
    pub retry: RetryPolicy,
}

impl CatalogConfig {
    pub fn new(base_url: impl Into<String>, collections: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            collections,
            limit: DEFAULT_SEARCH_LIMIT,
            asset_key: DEFAULT_ASSET_KEY.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_asset_key(mut self, asset_key: impl Into<String>) -> Self {
        self.asset_key = asset_key.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// HTTP catalog client.
#[derive(Clone)]
pub struct StacCatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl StacCatalogClient {
    pub fn new(http: reqwest::Client, config: CatalogConfig) -> Self {
        Self { http, config }
    }

    /// Build the search URL for `query`.
    pub fn search_url(&self, query: &SearchQuery) -> Result<Url, CatalogError> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/search", base))
            .map_err(|e| CatalogError::InvalidUrl(e.to_string()))?;

        let filter = serde_json::json!({ "cloudCover": { "lte": query.max_cloud_cover } });
        url.query_pairs_mut()
            .append_pair("bbox", &query.bbox.to_string())
            .append_pair("datetime", &query.datetime_range())
            .append_pair("collections", &self.config.collections.join(","))
            .append_pair("limit", &self.config.limit.to_string())
            .append_pair("filter", &filter.to_string());
        Ok(url)
    }
}

#[async_trait]
impl SceneCatalog for StacCatalogClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Scene>, CatalogError> {
        let url = self.search_url(query)?;
        let url = &url;
        let http = &self.http;

        let body = with_retry(&self.config.retry, "catalog", || async move {
            let response = http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Attempt::Retryable(CatalogError::Http(e.to_string())))?;

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let message = response.text().await.unwrap_or_default();
                let error = CatalogError::Status { status, message };
                return Err(if is_retryable_status(status) {
                    Attempt::Retryable(error)
                } else {
                    Attempt::Permanent(error)
                });
            }

            response
                .bytes()
                .await
                .map_err(|e| Attempt::Retryable(CatalogError::Http(e.to_string())))
        })
        .await
        .map_err(|e| match e {
            RetryError::Timeout(timeout) => CatalogError::Timeout(timeout),
            RetryError::Failed { error, .. } => error,
        })?;

        let scenes = parse_features(&body, &self.config.asset_key, query.max_cloud_cover)?;
        info!(
            year = query.year,
            bbox = %query.bbox,
            scenes = scenes.len(),
            "Catalog search complete"
        );
        Ok(scenes)
    }
}

// =============================================================================
// Tests
// =============================================================================
