//! Test utilities for integration tests.
//!
//! Mock catalog and fetcher implementations with call tracking, plus helpers
//! for seeding a store and driving the router.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tower::ServiceExt;

use mosaic_cache::cache::{BBox, MosaicCache, MosaicKey, MosaicRecord};
use mosaic_cache::catalog::{Scene, SceneCatalog, SearchQuery};
use mosaic_cache::error::{CatalogError, FetchError};
use mosaic_cache::io::AssetFetcher;
use mosaic_cache::server::{create_router, RouterConfig};
use mosaic_cache::tile::{TileFormat, TileServer};

// =============================================================================
// Images
// =============================================================================

/// A PNG with a simple gradient so resized crops are not uniform.
pub fn test_png(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 96])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

pub fn is_valid_png(data: &[u8]) -> bool {
    data.len() > 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]
}

// =============================================================================
// Mock Catalog
// =============================================================================

/// In-memory catalog that counts searches.
#[derive(Clone)]
pub struct MockCatalog {
    scenes: Vec<Scene>,
    delay: Duration,
    failure: Option<CatalogError>,
    calls: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<SearchQuery>>>,
}

impl MockCatalog {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes,
            delay: Duration::ZERO,
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
            queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(error: CatalogError) -> Self {
        let mut catalog = Self::new(vec![]);
        catalog.failure = Some(error);
        catalog
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SceneCatalog for MockCatalog {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Scene>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self
                .scenes
                .iter()
                .filter(|s| s.cloud_cover_percent <= query.max_cloud_cover)
                .cloned()
                .collect()),
        }
    }
}

// =============================================================================
// Mock Fetcher
// =============================================================================

/// Serves a generated PNG for every scene except those marked as failing.
#[derive(Clone)]
pub struct MockFetcher {
    failing: HashSet<String>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_failing(mut self, scene_id: &str) -> Self {
        self.failing.insert(scene_id.to_string());
        self
    }

    /// Scene ids requested so far, in request order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, scene: &Scene) -> Result<Bytes, FetchError> {
        self.fetched.lock().unwrap().push(scene.id.clone());
        if self.failing.contains(&scene.id) {
            return Err(FetchError::Timeout(Duration::from_secs(30)));
        }
        Ok(test_png(128, 96))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn nyc_bbox() -> BBox {
    BBox::new(-74.2, 40.5, -73.8, 40.9).unwrap()
}

pub fn nyc_key(year: i32) -> MosaicKey {
    MosaicKey::new(year, nyc_bbox())
}

/// Eight scenes with mixed cloud cover, all under the default ceiling except
/// the 25% and 30% ones.
pub fn eight_scenes() -> Vec<Scene> {
    [5.0, 12.0, 30.0, 8.0, 3.0, 19.0, 25.0, 11.0]
        .iter()
        .enumerate()
        .map(|(i, cloud)| {
            Scene::new(
                format!("scene-{}", i),
                *cloud,
                40.0,
                format!("https://assets.example.com/scene-{}.png", i),
            )
        })
        .collect()
}

/// Write `tiles` and then the metadata record for `key`.
pub async fn seed_mosaic(
    cache: &MosaicCache,
    key: &MosaicKey,
    tiles: &[(u8, u32, u32)],
    format: TileFormat,
) -> MosaicRecord {
    let hash = key.hash();
    let data = test_png(16, 16);
    let mut total = 0;
    for &(z, x, y) in tiles {
        total += cache.save_tile(&hash, z, x, y, &data, format).await.unwrap();
    }
    let record = MosaicRecord::new(key, tiles.len() as u64, total, vec!["scene-0".into()]);
    cache.save_info(&record).await.unwrap();
    record
}

// =============================================================================
// HTTP
// =============================================================================

pub fn test_router(cache: MosaicCache) -> Router {
    create_router(
        TileServer::new(cache),
        RouterConfig::new().with_tracing(false),
    )
}

/// Issue a GET and collect status, headers and body.
pub async fn get(router: &Router, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = get(router, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}
