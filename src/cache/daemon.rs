//! Background age-based eviction.
//!
//! Periodically runs [`TileServer::cleanup`] until cancelled, so evicted
//! mosaics also leave the hot tile cache. The first pass runs immediately
//! on startup.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tile::TileServer;

/// Run the cleanup loop until `cancellation` fires.
pub async fn run_cleanup_daemon(
    tile_server: Arc<TileServer>,
    max_age_days: u32,
    interval: Duration,
    cancellation: CancellationToken,
) {
    info!(
        storage_root = %tile_server.cache().storage_root().display(),
        max_age_days,
        interval_secs = interval.as_secs(),
        "Starting mosaic cleanup daemon"
    );

    loop {
        if let Err(e) = tile_server.cleanup(max_age_days).await {
            warn!(error = %e, "Mosaic cleanup pass failed");
        }

        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("Mosaic cleanup daemon shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
