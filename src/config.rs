//! Configuration management for mosaic-cache.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `MOSAIC_` prefix.
//!
//! # Commands
//!
//! - `serve` - run the tile server over a storage root
//! - `download` - build mosaics for one or more years over a bbox
//! - `list` - list cached mosaics
//! - `stats` - aggregate storage statistics
//! - `cleanup` - delete mosaics older than a given age
//!
//! # Environment Variables
//!
//! - `MOSAIC_STORAGE_ROOT` - Storage root directory (default: ./data)
//! - `MOSAIC_HOST` - Server bind address (default: 0.0.0.0)
//! - `MOSAIC_PORT` - Server port (default: 3000)
//! - `MOSAIC_CACHE_TILES` - Hot tile cache size in bytes (default: 64MB)
//! - `MOSAIC_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 31536000)
//! - `MOSAIC_CATALOG_URL` - Catalog API root
//! - `MOSAIC_COLLECTION` - Catalog collection(s), comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::BBox;
use crate::catalog::{CatalogConfig, DEFAULT_ASSET_KEY, DEFAULT_MAX_SCENES};
use crate::io::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::pipeline::{
    PipelineConfig, DEFAULT_MAX_CLOUD_COVER, DEFAULT_MAX_ZOOM, DEFAULT_TILE_SIZE, DEFAULT_WORKERS,
    DEFAULT_WORKING_SIZE,
};
use crate::server::DEFAULT_CACHE_MAX_AGE;
use crate::tile::{TileFormat, DEFAULT_HOT_TILE_CAPACITY, MAX_ZOOM};

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 3000;

pub const DEFAULT_STORAGE_ROOT: &str = "./data";

/// Default catalog API root; `/search` is appended.
pub const DEFAULT_CATALOG_URL: &str = "https://earth-search.aws.element84.com/v1";

pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";

/// Default interval between cleanup daemon passes (1 hour).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// CLI Structure
// =============================================================================

/// mosaic-cache - content-addressed cache and tile server for satellite
/// imagery mosaics.
#[derive(Parser, Debug)]
#[command(name = "mosaic-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve cached tiles over HTTP
    Serve(ServeConfig),

    /// Build mosaics for one or more years over a bounding box
    Download(DownloadConfig),

    /// List cached mosaics
    List(ListConfig),

    /// Show aggregate storage statistics
    Stats(StatsConfig),

    /// Delete mosaics older than a given age
    Cleanup(CleanupConfig),
}

/// Location of the mosaic store, shared by every command.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Root directory of the mosaic store.
    #[arg(long, default_value = DEFAULT_STORAGE_ROOT, env = "MOSAIC_STORAGE_ROOT")]
    pub storage_root: PathBuf,
}

impl StorageArgs {
    fn validate(&self) -> Result<(), String> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(
                "Storage root is required. Set --storage-root or MOSAIC_STORAGE_ROOT".to_string(),
            );
        }
        Ok(())
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MOSAIC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MOSAIC_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Size of the in-memory hot tile cache in bytes.
    #[arg(long, default_value_t = DEFAULT_HOT_TILE_CAPACITY, env = "MOSAIC_CACHE_TILES")]
    pub cache_tiles: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "MOSAIC_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated). Any origin if unset.
    #[arg(long, env = "MOSAIC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Run the cleanup daemon, deleting mosaics older than this many days.
    #[arg(long, env = "MOSAIC_CLEANUP_MAX_AGE_DAYS")]
    pub cleanup_max_age_days: Option<u32>,

    /// Seconds between cleanup daemon passes.
    #[arg(
        long,
        default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS,
        env = "MOSAIC_CLEANUP_INTERVAL_SECS"
    )]
    pub cleanup_interval_secs: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;

        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.cleanup_max_age_days == Some(0) {
            return Err("cleanup_max_age_days must be greater than 0".to_string());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("cleanup_interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

// =============================================================================
// Download
// =============================================================================

/// Tile encodings the pipeline can write.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpg,
}

impl From<OutputFormat> for TileFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Png => TileFormat::Png,
            OutputFormat::Jpg => TileFormat::Jpg,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DownloadConfig {
    /// Year(s) to build. Repeat or comma-separate for several years.
    #[arg(long = "year", required = true, value_delimiter = ',')]
    pub years: Vec<i32>,

    /// Bounding box as "west,south,east,north" in degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: BBox,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Catalog API root.
    #[arg(long, default_value = DEFAULT_CATALOG_URL, env = "MOSAIC_CATALOG_URL")]
    pub catalog_url: String,

    /// Catalog collection(s) to search (comma-separated).
    #[arg(
        long = "collection",
        default_value = DEFAULT_COLLECTION,
        env = "MOSAIC_COLLECTION",
        value_delimiter = ','
    )]
    pub collections: Vec<String>,

    /// Exclude scenes with more cloud cover than this percentage.
    #[arg(long, default_value_t = DEFAULT_MAX_CLOUD_COVER)]
    pub max_cloud_cover: f64,

    /// Number of best-ranked scenes to process.
    #[arg(long, default_value_t = DEFAULT_MAX_SCENES)]
    pub max_scenes: usize,

    /// Deepest zoom level to render.
    #[arg(long, default_value_t = DEFAULT_MAX_ZOOM)]
    pub max_zoom: u8,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Tile encoding.
    #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
    pub format: OutputFormat,

    /// Concurrent tile workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "MOSAIC_WORKERS")]
    pub workers: usize,

    /// Per-attempt timeout for catalog and asset requests, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Attempts per catalog or asset request.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_retries: u32,

    /// Asset key holding the renderable image in catalog items.
    #[arg(long, default_value = DEFAULT_ASSET_KEY)]
    pub asset_key: String,

    /// Longest side of the in-memory working image, in pixels.
    #[arg(long, default_value_t = DEFAULT_WORKING_SIZE)]
    pub working_size: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;

        if self.years.is_empty() {
            return Err("at least one --year is required".to_string());
        }
        if let Some(year) = self.years.iter().find(|y| !(1900..=9999).contains(*y)) {
            return Err(format!("year {} is out of range", year));
        }
        if self.catalog_url.is_empty() {
            return Err("catalog_url is required. Set --catalog-url or MOSAIC_CATALOG_URL".into());
        }
        if self.collections.iter().all(|c| c.trim().is_empty()) {
            return Err("at least one --collection is required".to_string());
        }
        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err("max_cloud_cover must be between 0 and 100".to_string());
        }
        if self.max_scenes == 0 {
            return Err("max_scenes must be greater than 0".to_string());
        }
        if self.max_zoom > MAX_ZOOM {
            return Err(format!("max_zoom must be at most {}", MAX_ZOOM));
        }
        if self.tile_size == 0 || self.tile_size > 4096 {
            return Err("tile_size must be between 1 and 4096".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be greater than 0".to_string());
        }
        if self.working_size == 0 {
            return Err("working_size must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.timeout_secs), self.max_retries)
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig::new(self.catalog_url.clone(), self.collections.clone())
            .with_asset_key(self.asset_key.clone())
            .with_retry(self.retry_policy())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_cloud_cover: self.max_cloud_cover,
            max_scenes: self.max_scenes,
            max_zoom: self.max_zoom,
            format: self.format.into(),
            workers: self.workers,
        }
    }
}

// =============================================================================
// Management Commands
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ListConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Print JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl ListConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl StatsConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()
    }
}

#[derive(Args, Debug, Clone)]
pub struct CleanupConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Delete mosaics downloaded more than this many days ago.
    #[arg(long)]
    pub max_age_days: u32,
}

impl CleanupConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        if self.max_age_days == 0 {
            return Err("max_age_days must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
