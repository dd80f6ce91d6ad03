//! Pipeline orchestration.
//!
//! The orchestrator drives a mosaic from key to cached tiles:
//!
//! 1. Short-circuit if a complete mosaic for the key is already cached
//! 2. Search the catalog and rank the results
//! 3. Fetch and normalize the selected scenes (failures drop the scene)
//! 4. Render the tile pyramid on a bounded worker pool
//! 5. Persist the metadata record last, which marks the mosaic complete
//!
//! Concurrent runs for the same key are coalesced: the first caller does the
//! work and later callers wait for its result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{BBox, MosaicCache, MosaicHash, MosaicKey, MosaicRecord};
use crate::catalog::{SceneCatalog, SceneSelector, SearchQuery, DEFAULT_MAX_SCENES};
use crate::error::{PipelineError, RenderError};
use crate::io::AssetFetcher;
use crate::tile::TileFormat;

use super::processor::{ProcessedScene, SceneProcessor};
use super::progress::{ProgressEvent, ProgressReporter, Stage, TileCoord};
use super::synthesizer::{pyramid_tile_count, TileRenderer};

// =============================================================================
// Configuration
// =============================================================================

/// Default cloud cover ceiling, in percent.
pub const DEFAULT_MAX_CLOUD_COVER: f64 = 20.0;

/// Default deepest zoom level rendered.
pub const DEFAULT_MAX_ZOOM: u8 = 3;

/// Default number of concurrent tile workers.
pub const DEFAULT_WORKERS: usize = 8;

// Progress bands per stage
const PROCESSING_START: u8 = 10;
const TILING_START: u8 = 30;
const TILING_END: u8 = 99;

/// Tunables for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_cloud_cover: f64,
    pub max_scenes: usize,

    /// Tiles are rendered for zoom levels `0..=max_zoom`
    pub max_zoom: u8,
    pub format: TileFormat,

    /// Upper bound on tiles rendered concurrently
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_cloud_cover: DEFAULT_MAX_CLOUD_COVER,
            max_scenes: DEFAULT_MAX_SCENES,
            max_zoom: DEFAULT_MAX_ZOOM,
            format: TileFormat::Png,
            workers: DEFAULT_WORKERS,
        }
    }
}

// =============================================================================
// Single-flight
// =============================================================================

type RunResult = Result<MosaicRecord, PipelineError>;

/// Completion slot shared between the leader of a run and its waiters.
type InFlightSlot = watch::Receiver<Option<RunResult>>;

enum Claim {
    Leader(watch::Sender<Option<RunResult>>),
    Follower(InFlightSlot),
}

/// Removes a key from the in-flight map when the leader finishes or is
/// dropped mid-run.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<MosaicHash, InFlightSlot>>,
    hash: MosaicHash,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.hash);
    }
}

async fn wait_for_leader(mut slot: InFlightSlot) -> Option<RunResult> {
    let outcome = match slot.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        // Leader dropped without publishing
        Err(_) => None,
    };
    outcome
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives catalog search, scene processing and tiling for mosaic keys.
pub struct PipelineOrchestrator<C, F, R>
where
    C: SceneCatalog,
    F: AssetFetcher,
    R: TileRenderer,
{
    cache: MosaicCache,
    catalog: C,
    processor: SceneProcessor<F>,
    selector: SceneSelector,
    renderer: Arc<R>,
    config: PipelineConfig,
    in_flight: Mutex<HashMap<MosaicHash, InFlightSlot>>,
}

impl<C, F, R> PipelineOrchestrator<C, F, R>
where
    C: SceneCatalog + 'static,
    F: AssetFetcher + 'static,
    R: TileRenderer + 'static,
{
    /// Build an orchestrator.
    ///
    /// Fails if `renderer` cannot encode `config.format`; otherwise every
    /// tile would fail and the run would cache an empty mosaic.
    pub fn new(
        cache: MosaicCache,
        catalog: C,
        processor: SceneProcessor<F>,
        renderer: R,
        config: PipelineConfig,
    ) -> Result<Self, RenderError> {
        if !renderer.supports(config.format) {
            return Err(RenderError::UnsupportedFormat(config.format.to_string()));
        }

        Ok(Self {
            cache,
            catalog,
            processor,
            selector: SceneSelector::new(config.max_scenes),
            renderer: Arc::new(renderer),
            config,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn cache(&self) -> &MosaicCache {
        &self.cache
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of keys currently being built.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Start a run in the background.
    ///
    /// The returned handle carries a progress receiver that observes every
    /// event of the run (see [`PipelineRun::take_events`]), plus cancellation
    /// and completion.
    pub fn start(self: &Arc<Self>, key: MosaicKey) -> PipelineRun {
        let progress = ProgressReporter::new();
        let events = progress.subscribe();
        let cancel = CancellationToken::new();

        let this = Arc::clone(self);
        let task_progress = progress.clone();
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { this.run(key, &task_progress, &task_cancel).await });

        PipelineRun {
            hash: key.hash(),
            events,
            progress,
            cancel,
            handle,
        }
    }

    /// Build the mosaic for `key`, or return the cached record.
    pub async fn run(
        &self,
        key: MosaicKey,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> RunResult {
        let hash = key.hash();

        loop {
            match self.claim(&hash) {
                Claim::Leader(slot) => {
                    let guard = InFlightGuard {
                        in_flight: &self.in_flight,
                        hash: hash.clone(),
                    };

                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                        result = self.execute(key, &hash, progress) => result,
                    };
                    report_outcome(&hash, &result, progress);

                    // Clear the entry before publishing so a waiter that
                    // retries after a cancellation becomes the new leader.
                    drop(guard);
                    let _ = slot.send(Some(result.clone()));
                    return result;
                }
                Claim::Follower(slot) => {
                    debug!(hash = %hash, "Joining in-flight run");
                    progress.emit(ProgressEvent::new(
                        Stage::Searching,
                        0,
                        format!("Waiting for in-flight download of {}", hash),
                    ));

                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => Some(Err(PipelineError::Cancelled)),
                        outcome = wait_for_leader(slot) => outcome,
                    };

                    match outcome {
                        Some(Err(PipelineError::Cancelled)) | None if !cancel.is_cancelled() => {
                            // The leader was abandoned; take over.
                            continue;
                        }
                        Some(result) => {
                            report_outcome(&hash, &result, progress);
                            return result;
                        }
                        None => {
                            let result = Err(PipelineError::Cancelled);
                            report_outcome(&hash, &result, progress);
                            return result;
                        }
                    }
                }
            }
        }
    }

    /// Build mosaics for several years over one area, one at a time.
    pub async fn download_years(
        &self,
        years: &[i32],
        bbox: BBox,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Vec<(i32, RunResult)> {
        let mut results = Vec::with_capacity(years.len());
        for &year in years {
            if cancel.is_cancelled() {
                results.push((year, Err(PipelineError::Cancelled)));
                continue;
            }
            let result = self.run(MosaicKey::new(year, bbox), progress, cancel).await;
            results.push((year, result));
        }
        results
    }

    fn claim(&self, hash: &MosaicHash) -> Claim {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = in_flight.get(hash) {
            return Claim::Follower(slot.clone());
        }
        let (tx, rx) = watch::channel(None);
        in_flight.insert(hash.clone(), rx);
        Claim::Leader(tx)
    }

    async fn execute(
        &self,
        key: MosaicKey,
        hash: &MosaicHash,
        progress: &ProgressReporter,
    ) -> RunResult {
        progress.emit(ProgressEvent::new(
            Stage::Searching,
            0,
            format!("Checking cache for {}", hash),
        ));
        if let Some(record) = self.cache.get_info(hash).await {
            info!(hash = %hash, year = key.year, "Mosaic already cached");
            return Ok(record);
        }

        progress.emit(ProgressEvent::new(
            Stage::Searching,
            5,
            format!("Searching catalog for {} imagery", key.year),
        ));
        let query = SearchQuery::new(key.bbox, key.year, self.config.max_cloud_cover);
        let scenes = self.catalog.search(&query).await?;

        if scenes.is_empty() {
            let last_progress = progress.last().unwrap_or_else(|| {
                ProgressEvent::new(Stage::Searching, 5, "Searching catalog")
            });
            return Err(PipelineError::NoData {
                year: key.year,
                last_progress: Box::new(last_progress),
            });
        }

        let found = scenes.len();
        let selected = self.selector.select(scenes);
        info!(
            hash = %hash,
            year = key.year,
            found,
            selected = selected.len(),
            "Selected scenes"
        );
        progress.emit(ProgressEvent::new(
            Stage::Processing,
            PROCESSING_START,
            format!("Selected {} of {} scenes", selected.len(), found),
        ));

        let processed = self.process_scenes(&selected, progress).await;
        let summary = self.render_pyramid(hash, processed, progress).await;

        let record = MosaicRecord::new(
            &key,
            summary.tile_count,
            summary.total_size,
            summary.scene_ids,
        );
        self.cache.save_info(&record).await?;

        info!(
            hash = %hash,
            year = key.year,
            tiles = record.tile_count,
            bytes = record.total_size_bytes,
            "Mosaic complete"
        );
        Ok(record)
    }

    /// Fetch and normalize scenes in rank order. Failed scenes are skipped.
    async fn process_scenes(
        &self,
        scenes: &[crate::catalog::Scene],
        progress: &ProgressReporter,
    ) -> Vec<ProcessedScene> {
        let mut processed = Vec::with_capacity(scenes.len());
        let band = u64::from(TILING_START - PROCESSING_START);

        for (index, scene) in scenes.iter().enumerate() {
            let percent = PROCESSING_START as u64 + band * index as u64 / scenes.len() as u64;
            progress.emit(ProgressEvent::new(
                Stage::Processing,
                percent as u8,
                format!("Processing scene {} ({}/{})", scene.id, index + 1, scenes.len()),
            ));

            match self.processor.process(scene).await {
                Ok(p) => processed.push(p),
                Err(e) => warn!(scene_id = %scene.id, error = %e, "Dropping scene"),
            }
        }
        processed
    }

    /// Render every tile of the pyramid on a bounded pool of workers.
    ///
    /// Failed tiles are logged and left out of the totals.
    async fn render_pyramid(
        &self,
        hash: &MosaicHash,
        scenes: Vec<ProcessedScene>,
        progress: &ProgressReporter,
    ) -> TilingSummary {
        let total = pyramid_tile_count(self.config.max_zoom);

        if scenes.is_empty() {
            warn!(hash = %hash, "No scenes could be processed; mosaic will be empty");
            progress.emit(ProgressEvent::new(
                Stage::Tiling,
                TILING_END,
                "No scenes available for tiling",
            ));
            return TilingSummary::default();
        }

        let scene_ids: Vec<String> = scenes.iter().map(|s| s.scene_id.clone()).collect();
        let mut tally = TileTally::new(total, scene_ids.len());
        let scenes = Arc::new(scenes);
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        'grid: for zoom in 0..=self.config.max_zoom {
            let cells = 1u32 << zoom;
            for y in 0..cells {
                for x in 0..cells {
                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                        break 'grid;
                    };
                    tasks.spawn(render_tile(
                        self.cache.clone(),
                        Arc::clone(&self.renderer),
                        Arc::clone(&scenes),
                        hash.clone(),
                        TileCoord::new(zoom, x, y),
                        self.config.format,
                        permit,
                    ));

                    while let Some(joined) = tasks.try_join_next() {
                        tally.record(hash, joined, progress);
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            tally.record(hash, joined, progress);
        }

        tally.into_summary(&scene_ids)
    }
}

/// Emit the terminal progress event for a run.
fn report_outcome(hash: &MosaicHash, result: &RunResult, progress: &ProgressReporter) {
    match result {
        Ok(record) => progress.emit(ProgressEvent::new(
            Stage::Complete,
            100,
            format!("Mosaic {} ready with {} tiles", hash, record.tile_count),
        )),
        Err(e) => {
            warn!(hash = %hash, error = %e, "Pipeline run failed");
            let percent = progress.last().map(|p| p.percent).unwrap_or(0);
            progress.emit(ProgressEvent::new(Stage::Failed, percent, e.to_string()));
        }
    }
}

// =============================================================================
// Tile Workers
// =============================================================================

struct TileOutcome {
    coord: TileCoord,

    /// Bytes written and the index of the scene that supplied the tile
    result: Result<Option<(u64, usize)>, String>,
}

/// Render one tile from the first scene that covers it and persist it.
async fn render_tile<R: TileRenderer + 'static>(
    cache: MosaicCache,
    renderer: Arc<R>,
    scenes: Arc<Vec<ProcessedScene>>,
    hash: MosaicHash,
    coord: TileCoord,
    format: TileFormat,
    _permit: OwnedSemaphorePermit,
) -> TileOutcome {
    let rendered = tokio::task::spawn_blocking(
        move || -> Result<Option<(usize, Vec<u8>)>, RenderError> {
            for (index, scene) in scenes.iter().enumerate() {
                if let Some(data) = renderer.render(scene, coord, format)? {
                    return Ok(Some((index, data)));
                }
            }
            Ok(None)
        },
    )
    .await
    .map_err(|e| RenderError::Task(e.to_string()));

    let result = match rendered {
        Err(e) | Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(None)) => Ok(None),
        Ok(Ok(Some((index, data)))) => cache
            .save_tile(&hash, coord.zoom, coord.x, coord.y, &data, format)
            .await
            .map(|size| Some((size, index)))
            .map_err(|e| e.to_string()),
    };

    TileOutcome { coord, result }
}

#[derive(Debug, Default)]
struct TilingSummary {
    tile_count: u64,
    total_size: u64,
    scene_ids: Vec<String>,
}

/// Running totals while tiles complete.
struct TileTally {
    total: u64,
    done: u64,
    tile_count: u64,
    total_size: u64,
    used: Vec<bool>,
}

impl TileTally {
    fn new(total: u64, scenes: usize) -> Self {
        Self {
            total: total.max(1),
            done: 0,
            tile_count: 0,
            total_size: 0,
            used: vec![false; scenes],
        }
    }

    fn record(
        &mut self,
        hash: &MosaicHash,
        joined: Result<TileOutcome, JoinError>,
        progress: &ProgressReporter,
    ) {
        self.done += 1;
        let band = u64::from(TILING_END - TILING_START);
        let percent = (TILING_START as u64 + band * self.done / self.total) as u8;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Tile worker failed");
                return;
            }
        };

        match outcome.result {
            Ok(Some((size, index))) => {
                self.tile_count += 1;
                self.total_size += size;
                if let Some(used) = self.used.get_mut(index) {
                    *used = true;
                }
                progress.emit(
                    ProgressEvent::new(
                        Stage::Tiling,
                        percent,
                        format!("Rendered tile {}", outcome.coord),
                    )
                    .with_tile(outcome.coord),
                );
            }
            Ok(None) => {
                debug!(hash = %hash, tile = %outcome.coord, "No scene covers tile");
                progress.emit(
                    ProgressEvent::new(
                        Stage::Tiling,
                        percent,
                        format!("No coverage for tile {}", outcome.coord),
                    )
                    .with_tile(outcome.coord),
                );
            }
            Err(e) => {
                warn!(hash = %hash, tile = %outcome.coord, error = %e, "Failed to write tile");
                progress.emit(
                    ProgressEvent::new(
                        Stage::Tiling,
                        percent,
                        format!("Failed tile {}: {}", outcome.coord, e),
                    )
                    .with_tile(outcome.coord),
                );
            }
        }
    }

    fn into_summary(self, scene_ids: &[String]) -> TilingSummary {
        TilingSummary {
            tile_count: self.tile_count,
            total_size: self.total_size,
            scene_ids: scene_ids
                .iter()
                .zip(&self.used)
                .filter(|(_, used)| **used)
                .map(|(id, _)| id.clone())
                .collect(),
        }
    }
}

// =============================================================================
// Run Handle
// =============================================================================

/// Handle to a background pipeline run.
pub struct PipelineRun {
    hash: MosaicHash,

    /// Subscribed before the run was spawned
    events: broadcast::Receiver<ProgressEvent>,
    progress: ProgressReporter,
    cancel: CancellationToken,
    handle: JoinHandle<RunResult>,
}

impl PipelineRun {
    pub fn hash(&self) -> &MosaicHash {
        &self.hash
    }

    /// Take the receiver that observes every event from the start of the
    /// run. Later calls return a receiver subscribed at call time.
    pub fn take_events(&mut self) -> broadcast::Receiver<ProgressEvent> {
        let fresh = self.progress.subscribe();
        std::mem::replace(&mut self.events, fresh)
    }

    /// Add a late observer; it sees events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Request cancellation. Work already persisted is kept but no
    /// metadata is written, so the mosaic stays absent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> RunResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(hash = %self.hash, error = %e, "Pipeline task aborted");
                Err(PipelineError::Cancelled)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
