//! HTTP client tests.
//!
//! Tests verify, against an in-process axum stub:
//! - Catalog search retries 5xx/429 and gives up on 4xx
//! - Asset downloads retry transient statuses and keep 404 permanent
//! - A timed-out attempt is not retried
//! - A full pipeline run over the real HTTP clients

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mosaic_cache::cache::MosaicCache;
use mosaic_cache::catalog::{CatalogConfig, Scene, SceneCatalog, SearchQuery, StacCatalogClient};
use mosaic_cache::error::{CatalogError, FetchError};
use mosaic_cache::io::{AssetFetcher, HttpAssetFetcher, RetryPolicy};
use mosaic_cache::pipeline::{
    CropTileRenderer, PipelineConfig, PipelineOrchestrator, ProgressReporter, SceneProcessor,
};

use super::test_utils::{nyc_bbox, nyc_key, test_png};

// =============================================================================
// Stub Server
// =============================================================================

/// Scripted responses per path. The last queued response repeats.
#[derive(Default)]
struct StubState {
    responses: Mutex<HashMap<String, VecDeque<(StatusCode, Bytes)>>>,
    hits: Mutex<HashMap<String, usize>>,
    queries: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

#[derive(Clone)]
struct Stub {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl Stub {
    async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let router = Router::new()
            .fallback(stub_handler)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn respond(&self, path: &str, status: StatusCode, body: impl Into<Bytes>) -> &Self {
        self.state
            .responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.into()));
        self
    }

    fn with_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn queries(&self) -> Vec<String> {
        self.state.queries.lock().unwrap().clone()
    }
}

async fn stub_handler(State(state): State<Arc<StubState>>, uri: Uri) -> (StatusCode, Bytes) {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    if let Some(query) = uri.query() {
        state.queries.lock().unwrap().push(query.to_string());
    }

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut responses = state.responses.lock().unwrap();
    match responses.get_mut(&path) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
        Some(queue) if !queue.is_empty() => queue[0].clone(),
        _ => (StatusCode::NOT_FOUND, Bytes::from_static(b"no route")),
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), attempts).with_base_backoff(Duration::from_millis(1))
}

fn catalog(stub: &Stub, attempts: u32) -> StacCatalogClient {
    StacCatalogClient::new(
        reqwest::Client::new(),
        CatalogConfig::new(stub.url("/v1"), vec!["sentinel-2-l2a".into()])
            .with_retry(fast_policy(attempts)),
    )
}

fn query() -> SearchQuery {
    SearchQuery::new(nyc_bbox(), 2020, 20.0)
}

/// A STAC feature collection whose thumbnails live on the stub.
fn feature_collection(stub: &Stub, ids: &[(&str, f64)]) -> String {
    let features: Vec<serde_json::Value> = ids
        .iter()
        .map(|(id, cloud)| {
            serde_json::json!({
                "id": id,
                "properties": {"eo:cloud_cover": cloud, "view:sun_elevation": 35.0},
                "assets": {"thumbnail": {"href": stub.url(&format!("/assets/{}.png", id))}}
            })
        })
        .collect();
    serde_json::json!({"type": "FeatureCollection", "features": features}).to_string()
}

fn scene(stub: &Stub, id: &str) -> Scene {
    Scene::new(id, 5.0, 40.0, stub.url(&format!("/assets/{}.png", id)))
}

// =============================================================================
// Catalog Client
// =============================================================================

#[tokio::test]
async fn test_catalog_retries_transient_statuses() {
    let stub = Stub::start().await;
    stub.respond("/v1/search", StatusCode::SERVICE_UNAVAILABLE, "busy")
        .respond("/v1/search", StatusCode::TOO_MANY_REQUESTS, "slow down")
        .respond(
            "/v1/search",
            StatusCode::OK,
            feature_collection(&stub, &[("S2A_1", 4.0), ("S2A_2", 9.0)]),
        );

    let scenes = catalog(&stub, 3).search(&query()).await.unwrap();

    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].id, "S2A_1");
    assert_eq!(scenes[0].asset_ref, stub.url("/assets/S2A_1.png"));
    assert_eq!(stub.hits("/v1/search"), 3);

    let query = &stub.queries()[0];
    assert!(query.contains("collections=sentinel-2-l2a"), "{}", query);
    assert!(query.contains("datetime=2020-01-01T00%3A00%3A00Z"), "{}", query);
}

#[tokio::test]
async fn test_catalog_client_error_is_permanent() {
    let stub = Stub::start().await;
    stub.respond("/v1/search", StatusCode::BAD_REQUEST, "bad bbox");

    let err = catalog(&stub, 3).search(&query()).await.unwrap_err();

    assert!(
        matches!(err, CatalogError::Status { status: 400, ref message } if message == "bad bbox"),
        "{:?}",
        err
    );
    assert_eq!(stub.hits("/v1/search"), 1);
}

#[tokio::test]
async fn test_catalog_gives_up_after_max_attempts() {
    let stub = Stub::start().await;
    stub.respond("/v1/search", StatusCode::INTERNAL_SERVER_ERROR, "boom");

    let err = catalog(&stub, 2).search(&query()).await.unwrap_err();

    assert!(matches!(err, CatalogError::Status { status: 500, .. }), "{:?}", err);
    assert_eq!(stub.hits("/v1/search"), 2);
}

#[tokio::test]
async fn test_catalog_timeout_is_not_retried() {
    let stub = Stub::start().await;
    stub.respond("/v1/search", StatusCode::OK, feature_collection(&stub, &[]));
    stub.with_delay(Duration::from_millis(500));

    let client = StacCatalogClient::new(
        reqwest::Client::new(),
        CatalogConfig::new(stub.url("/v1"), vec![]).with_retry(
            RetryPolicy::new(Duration::from_millis(50), 3)
                .with_base_backoff(Duration::from_millis(1)),
        ),
    );
    let err = client.search(&query()).await.unwrap_err();

    assert!(matches!(err, CatalogError::Timeout(_)), "{:?}", err);
    assert_eq!(stub.hits("/v1/search"), 1);
}

#[tokio::test]
async fn test_catalog_invalid_body() {
    let stub = Stub::start().await;
    stub.respond("/v1/search", StatusCode::OK, "<html>maintenance</html>");

    let err = catalog(&stub, 3).search(&query()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Decode(_)), "{:?}", err);
    assert_eq!(stub.hits("/v1/search"), 1);
}

// =============================================================================
// Asset Fetcher
// =============================================================================

#[tokio::test]
async fn test_fetcher_retries_transient_statuses() {
    let stub = Stub::start().await;
    let png = test_png(8, 8);
    stub.respond("/assets/S1.png", StatusCode::BAD_GATEWAY, "")
        .respond("/assets/S1.png", StatusCode::OK, png.clone());

    let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), fast_policy(3));
    let bytes = fetcher.fetch(&scene(&stub, "S1")).await.unwrap();

    assert_eq!(bytes, png);
    assert_eq!(stub.hits("/assets/S1.png"), 2);
}

#[tokio::test]
async fn test_fetcher_not_found_is_permanent() {
    let stub = Stub::start().await;

    let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), fast_policy(3));
    let err = fetcher.fetch(&scene(&stub, "missing")).await.unwrap_err();

    match err {
        FetchError::Status { status, url } => {
            assert_eq!(status, 404);
            assert_eq!(url, stub.url("/assets/missing.png"));
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    assert_eq!(stub.hits("/assets/missing.png"), 1);
}

#[tokio::test]
async fn test_fetcher_connection_refused() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), fast_policy(2));
    let scene = Scene::new("S1", 1.0, 40.0, format!("http://{}/a.png", addr));

    assert!(matches!(
        fetcher.fetch(&scene).await,
        Err(FetchError::Http(_))
    ));
}

// =============================================================================
// Pipeline over HTTP
// =============================================================================

#[tokio::test]
async fn test_pipeline_over_http_clients() {
    let stub = Stub::start().await;
    stub.respond(
        "/v1/search",
        StatusCode::OK,
        feature_collection(&stub, &[("S2A_1", 2.0), ("S2A_2", 6.0), ("S2A_cloudy", 70.0)]),
    );
    // First scene's asset is gone; second recovers after one 503
    stub.respond("/assets/S2A_2.png", StatusCode::SERVICE_UNAVAILABLE, "")
        .respond("/assets/S2A_2.png", StatusCode::OK, test_png(64, 64));

    let dir = TempDir::new().unwrap();
    let http = reqwest::Client::new();
    let orch = PipelineOrchestrator::new(
        MosaicCache::new(dir.path()),
        catalog(&stub, 3),
        SceneProcessor::with_working_size(HttpAssetFetcher::new(http, fast_policy(3)), 64),
        CropTileRenderer::new(16),
        PipelineConfig {
            max_zoom: 1,
            workers: 2,
            ..PipelineConfig::default()
        },
    )
    .unwrap();

    let record = orch
        .run(nyc_key(2020), &ProgressReporter::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.tile_count, 5);
    assert_eq!(record.scene_ids, vec!["S2A_2".to_string()]);
    assert_eq!(stub.hits("/assets/S2A_1.png"), 1);
    assert_eq!(stub.hits("/assets/S2A_2.png"), 2);
    assert_eq!(stub.hits("/assets/S2A_cloudy.png"), 0);
}
