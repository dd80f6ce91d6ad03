//! Store integration tests.
//!
//! Tests verify:
//! - On-disk layout and metadata schema
//! - Listing, deletion and age-based cleanup
//! - Hash-derived addressing shared by every caller

use chrono::{Duration, Utc};
use tempfile::TempDir;

use mosaic_cache::cache::{BBox, MosaicCache, MosaicKey, MosaicRecord, METADATA_FILE};
use mosaic_cache::tile::TileFormat;

use super::test_utils::{nyc_bbox, nyc_key, seed_mosaic, test_png};

#[tokio::test]
async fn test_disk_layout() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0), (2, 3, 1)], TileFormat::Png).await;

    let root = dir.path().join("tiles").join(record.hash.as_str());
    assert!(root.join(METADATA_FILE).is_file());
    assert!(root.join("0").join("0").join("0.png").is_file());
    assert!(root.join("2").join("3").join("1.png").is_file());

    // No temporary files left behind
    let leftovers: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_metadata_on_disk() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;

    let path = dir
        .path()
        .join("tiles")
        .join(record.hash.as_str())
        .join(METADATA_FILE);
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();

    assert_eq!(json["year"], 2020);
    assert_eq!(json["hash"], record.hash.as_str());
    assert_eq!(json["tileCount"], 1);
    assert!(json["totalSize"].as_u64().unwrap() > 0);
    assert_eq!(json["scenes"][0], "scene-0");
    assert!(json["downloadDate"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_nearby_requests_share_one_entry() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;

    let noisy = MosaicKey::new(
        2020,
        BBox::new(-74.2002, 40.5001, -73.8004, 40.8999).unwrap(),
    );
    assert!(cache.has_mosaic(&noisy.hash()).await);
    assert!(!cache.has_mosaic(&nyc_key(2021).hash()).await);
}

#[tokio::test]
async fn test_tiles_without_metadata_are_absent() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let hash = nyc_key(2020).hash();

    cache
        .save_tile(&hash, 0, 0, 0, &test_png(8, 8), TileFormat::Png)
        .await
        .unwrap();

    assert!(!cache.has_mosaic(&hash).await);
    assert!(cache.get_info(&hash).await.is_none());
    assert!(cache.list_all().await.unwrap().is_empty());
    assert!(cache.tile_exists(&hash, 0, 0, 0, TileFormat::Png).await);
}

#[tokio::test]
async fn test_corrupted_metadata_is_skipped() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let good = seed_mosaic(&cache, &nyc_key(2019), &[(0, 0, 0)], TileFormat::Png).await;
    let bad = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;

    let path = dir
        .path()
        .join("tiles")
        .join(bad.hash.as_str())
        .join(METADATA_FILE);
    std::fs::write(path, b"{ not json").unwrap();

    let listed = cache.list_all().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].hash, good.hash);
    assert!(cache.get_info(&bad.hash).await.is_none());
}

#[tokio::test]
async fn test_list_all_newest_first() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());

    for (year, age) in [(2018, 3), (2019, 1), (2020, 2)] {
        let mut record = MosaicRecord::new(&nyc_key(year), 0, 0, vec![]);
        record.download_date = Utc::now() - Duration::days(age);
        cache.save_info(&record).await.unwrap();
    }

    let years: Vec<i32> = cache
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.year)
        .collect();
    assert_eq!(years, vec![2019, 2020, 2018]);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let record = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0)], TileFormat::Png).await;

    assert!(cache.delete(&record.hash).await.unwrap());
    assert!(!cache.has_mosaic(&record.hash).await);
    assert!(!dir.path().join("tiles").join(record.hash.as_str()).exists());

    // Deleting again is a no-op
    assert!(!cache.delete(&record.hash).await.unwrap());
}

#[tokio::test]
async fn test_cleanup_by_age() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());
    let bbox = nyc_bbox();

    let mut old = MosaicRecord::new(&MosaicKey::new(2015, bbox), 0, 0, vec![]);
    old.download_date = Utc::now() - Duration::days(45);
    cache.save_info(&old).await.unwrap();

    let fresh = seed_mosaic(&cache, &MosaicKey::new(2020, bbox), &[(0, 0, 0)], TileFormat::Png).await;

    assert_eq!(cache.cleanup(30).await.unwrap(), 1);
    assert!(!cache.has_mosaic(&old.hash).await);
    assert!(cache.has_mosaic(&fresh.hash).await);
}

#[tokio::test]
async fn test_stats_aggregates_records() {
    let dir = TempDir::new().unwrap();
    let cache = MosaicCache::new(dir.path());

    let empty = cache.stats().await.unwrap();
    assert_eq!(empty.mosaic_count, 0);
    assert!(empty.oldest.is_none());

    let a = seed_mosaic(&cache, &nyc_key(2019), &[(0, 0, 0)], TileFormat::Png).await;
    let b = seed_mosaic(&cache, &nyc_key(2020), &[(0, 0, 0), (1, 0, 1)], TileFormat::Png).await;

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.mosaic_count, 2);
    assert_eq!(stats.tile_count, 3);
    assert_eq!(stats.total_size_bytes, a.total_size_bytes + b.total_size_bytes);
    assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
}
