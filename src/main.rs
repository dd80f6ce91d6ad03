//! mosaic-cache - content-addressed cache and tile server for satellite
//! imagery mosaics.
//!
//! This binary wires the pipeline, the store and the HTTP server to the
//! command line.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mosaic_cache::{
    cache::{run_cleanup_daemon, MosaicCache},
    catalog::StacCatalogClient,
    config::{CleanupConfig, Cli, Command, DownloadConfig, ListConfig, ServeConfig, StatsConfig},
    io::HttpAssetFetcher,
    pipeline::{
        CropTileRenderer, PipelineOrchestrator, ProgressReporter, SceneProcessor, Stage,
    },
    server::{create_router, RouterConfig},
    tile::{TileFormat, TileServer},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Download(config) => run_download(config).await,
        Command::List(config) => run_list(config).await,
        Command::Stats(config) => run_stats(config).await,
        Command::Cleanup(config) => run_cleanup(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Later calls in the same process are no-ops.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mosaic_cache=debug,tower_http=debug"
    } else {
        "mosaic_cache=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok();
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = MosaicCache::new(&config.storage.storage_root);

    info!("mosaic-cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Storage root: {}", config.storage.storage_root.display());
    info!("  Hot tile cache: {}MB", config.cache_tiles / (1024 * 1024));
    info!("  Cache-Control max-age: {}s", config.cache_max_age);

    match cache.stats().await {
        Ok(stats) => info!(
            "  Found {} mosaic(s), {} tile(s)",
            stats.mosaic_count, stats.tile_count
        ),
        Err(e) => {
            error!("Failed to read storage root: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let tile_server = Arc::new(TileServer::with_hot_capacity(cache, config.cache_tiles));

    let shutdown = CancellationToken::new();
    let daemon = config.cleanup_max_age_days.map(|max_age_days| {
        info!(
            "  Cleanup: mosaics older than {} day(s), every {}s",
            max_age_days, config.cleanup_interval_secs
        );
        tokio::spawn(run_cleanup_daemon(
            Arc::clone(&tile_server),
            max_age_days,
            config.cleanup_interval(),
            shutdown.clone(),
        ))
    });

    let router = create_router(tile_server, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/mosaics", addr);
    info!("");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown.cancel();
    if let Some(daemon) = daemon {
        let _ = daemon.await;
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Download Command
// =============================================================================

async fn run_download(config: DownloadConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let http = match reqwest::Client::builder()
        .user_agent(concat!("mosaic-cache/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache = MosaicCache::new(&config.storage.storage_root);
    let catalog = StacCatalogClient::new(http.clone(), config.catalog_config());
    let fetcher = HttpAssetFetcher::new(http, config.retry_policy());
    let processor = SceneProcessor::with_working_size(fetcher, config.working_size);
    let renderer = CropTileRenderer::new(config.tile_size);
    let orchestrator = match PipelineOrchestrator::new(
        cache,
        catalog,
        processor,
        renderer,
        config.pipeline_config(),
    ) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let progress = ProgressReporter::new();
    let reporter = tokio::spawn(log_progress(progress.subscribe()));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    info!(
        "Building {} mosaic(s) over {}",
        config.years.len(),
        config.bbox
    );
    let results = orchestrator
        .download_years(&config.years, config.bbox, &progress, &cancel)
        .await;

    drop(progress);
    let _ = reporter.await;

    let format: TileFormat = config.format.into();
    let mut failed = 0;
    for (year, result) in results {
        match result {
            Ok(record) => println!(
                "{}  {}  {} tiles  {} bytes  {}",
                year,
                record.hash,
                record.tile_count,
                record.total_size_bytes,
                record.hash.tile_template(format)
            ),
            Err(e) => {
                failed += 1;
                println!("{}  failed: {}", year, e);
            }
        }
    }

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Log stage transitions at INFO and per-tile progress at DEBUG.
async fn log_progress(
    mut events: tokio::sync::broadcast::Receiver<mosaic_cache::pipeline::ProgressEvent>,
) {
    let mut last_stage = None;
    loop {
        match events.recv().await {
            Ok(event) => {
                if last_stage != Some(event.stage) || event.stage != Stage::Tiling {
                    info!("[{:>3}%] {}: {}", event.percent, event.stage, event.message);
                } else {
                    debug!("[{:>3}%] {}", event.percent, event.message);
                }
                last_stage = Some(event.stage);
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("Progress display skipped {} event(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// =============================================================================
// Management Commands
// =============================================================================

async fn run_list(config: ListConfig) -> ExitCode {
    init_logging(false);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = MosaicCache::new(&config.storage.storage_root);
    let records = match cache.list_all().await {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("(no mosaics cached)");
        return ExitCode::SUCCESS;
    }

    println!(
        "{:<34} {:>6} {:>8} {:>12}  {:<20}  BBOX",
        "HASH", "YEAR", "TILES", "BYTES", "DOWNLOADED"
    );
    for record in &records {
        println!(
            "{:<34} {:>6} {:>8} {:>12}  {:<20}  {}",
            record.hash,
            record.year,
            record.tile_count,
            record.total_size_bytes,
            record.download_date.format("%Y-%m-%d %H:%M:%S"),
            record.bbox
        );
    }
    println!();
    println!("Total: {} mosaic(s)", records.len());

    ExitCode::SUCCESS
}

async fn run_stats(config: StatsConfig) -> ExitCode {
    init_logging(false);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = MosaicCache::new(&config.storage.storage_root);
    let stats = match cache.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        return print_json(&stats);
    }

    println!("Storage root: {}", config.storage.storage_root.display());
    println!("Mosaics:      {}", stats.mosaic_count);
    println!("Tiles:        {}", stats.tile_count);
    println!(
        "Total size:   {:.2} MB",
        stats.total_size_bytes as f64 / (1024.0 * 1024.0)
    );
    if let Some(oldest) = stats.oldest {
        println!("Oldest:       {}", oldest.to_rfc3339());
    }
    if let Some(newest) = stats.newest {
        println!("Newest:       {}", newest.to_rfc3339());
    }

    ExitCode::SUCCESS
}

async fn run_cleanup(config: CleanupConfig) -> ExitCode {
    init_logging(false);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = MosaicCache::new(&config.storage.storage_root);
    match cache.evict_at(config.max_age_days, chrono::Utc::now()).await {
        Ok(report) => {
            println!(
                "Deleted {} mosaic(s) older than {} day(s)",
                report.expired.len(),
                config.max_age_days
            );
            if !report.abandoned.is_empty() {
                println!(
                    "Removed {} abandoned director(ies) without metadata",
                    report.abandoned.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cleanup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
