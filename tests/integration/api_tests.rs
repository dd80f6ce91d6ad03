//! API integration tests for tile retrieval and error handling.
//!
//! Tests verify:
//! - Tile retrieval with immutable caching headers
//! - Validation order (400 before mosaic lookup before tile lookup)
//! - JSON error bodies
//! - Listing and stats endpoints

use axum::http::StatusCode;
use tempfile::TempDir;

use mosaic_cache::cache::{MosaicCache, METADATA_FILE};
use mosaic_cache::tile::TileFormat;

use super::test_utils::{get, get_json, is_valid_png, nyc_key, seed_mosaic, test_router};

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_tile_retrieval_success() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0), (1, 1, 0)], TileFormat::Png).await;
    let router = test_router(cache);

    let uri = record.hash.tile_path(1, 1, 0, TileFormat::Png);
    let (status, headers, body) = get(&router, &uri).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=31536000, immutable"
    );
    assert!(is_valid_png(&body));
}

#[tokio::test]
async fn test_second_request_served_from_hot_cache() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;
    let router = test_router(cache);
    let uri = record.hash.tile_path(0, 0, 0, TileFormat::Png);

    let (_, first, first_body) = get(&router, &uri).await;
    let (_, second, second_body) = get(&router, &uri).await;

    assert_eq!(first.get("x-tile-cache-hit").unwrap(), "false");
    assert_eq!(second.get("x-tile-cache-hit").unwrap(), "true");
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn test_jpg_tile_content_type() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2021), &[(0, 0, 0)], TileFormat::Jpg).await;
    let router = test_router(cache);

    let (status, headers, _) = get(&router, &record.hash.tile_path(0, 0, 0, TileFormat::Jpg)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_unknown_mosaic_returns_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(MosaicCache::new(dir.path()));

    let (status, json) = get_json(&router, "/tiles/unknownhash/5/10/7.png").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "mosaic_not_found");
    assert_eq!(json["message"], "Mosaic not found: unknownhash");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_unsupported_format_returns_400() {
    let dir = TempDir::new().unwrap();
    let router = test_router(MosaicCache::new(dir.path()));

    let (status, json) = get_json(&router, "/tiles/abc123/1/0/0.bmp").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Unsupported format: bmp");

    // Only the canonical "jpg" spelling is accepted
    let (status, _) = get_json(&router, "/tiles/abc123/1/0/0.jpeg").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_coordinates_return_400() {
    let dir = TempDir::new().unwrap();
    let router = test_router(MosaicCache::new(dir.path()));

    for uri in [
        "/tiles/abc123/2/4/0.png",
        "/tiles/abc123/2/0/4.png",
        "/tiles/abc123/25/0/0.png",
        "/tiles/abc123/z/0/0.png",
        "/tiles/abc123/1/-1/0.png",
        "/tiles/abc123/1/0/y.png",
        "/tiles/abc123/1/0/0",
    ] {
        let (status, json) = get_json(&router, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {}", uri);
        assert!(json["message"].is_string());
    }
}

#[tokio::test]
async fn test_validation_precedes_mosaic_lookup() {
    let dir = TempDir::new().unwrap();
    let router = test_router(MosaicCache::new(dir.path()));

    // Unknown mosaic and bad coordinates: the coordinates win
    let (status, _) = get_json(&router, "/tiles/unknownhash/1/5/5.png").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_tile_in_existing_mosaic_returns_404() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;
    let router = test_router(cache);

    let (status, json) = get_json(&router, &record.hash.tile_path(1, 1, 1, TileFormat::Png)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "tile_not_found");
    assert!(json["message"].as_str().unwrap().starts_with("Tile not found"));

    // Tile exists in another format only
    let (status, _) = get_json(&router, &record.hash.tile_path(0, 0, 0, TileFormat::Webp)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_partial_mosaic_is_not_served() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;

    // Simulate an interrupted run: tiles present, metadata missing
    let metadata = dir
        .path()
        .join("tiles")
        .join(record.hash.as_str())
        .join(METADATA_FILE);
    std::fs::remove_file(metadata).unwrap();

    let router = test_router(cache);
    let (status, json) = get_json(&router, &record.hash.tile_path(0, 0, 0, TileFormat::Png)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "mosaic_not_found");
}

// =============================================================================
// Management Endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let router = test_router(MosaicCache::new(dir.path()));

    let (status, json) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_mosaics_listing() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let png = seed_mosaic(&cache, &nyc_key(2019), &[(0, 0, 0)], TileFormat::Png).await;
    let jpg = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Jpg).await;
    let router = test_router(cache);

    let (status, json) = get_json(&router, "/mosaics").await;
    assert_eq!(status, StatusCode::OK);

    let mosaics = json["mosaics"].as_array().unwrap();
    assert_eq!(mosaics.len(), 2);

    let find = |hash: &str| {
        mosaics
            .iter()
            .find(|m| m["hash"] == hash)
            .unwrap_or_else(|| panic!("missing {}", hash))
            .clone()
    };

    let entry = find(png.hash.as_str());
    assert_eq!(entry["year"], 2019);
    assert_eq!(entry["tileCount"], 1);
    assert_eq!(entry["tileUrl"], png.hash.tile_template(TileFormat::Png));

    let entry = find(jpg.hash.as_str());
    assert_eq!(entry["tileUrl"], jpg.hash.tile_template(TileFormat::Jpg));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    seed_mosaic(&cache, &nyc_key(2019), &[(0, 0, 0), (1, 0, 0)], TileFormat::Png).await;
    seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;
    let router = test_router(cache);

    let (status, json) = get_json(&router, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["storage"]["mosaic_count"], 2);
    assert_eq!(json["storage"]["tile_count"], 3);
    assert_eq!(json["hot_cache"]["entries"], 0);
}
