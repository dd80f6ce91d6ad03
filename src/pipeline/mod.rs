//! Mosaic production: scene processing, tile synthesis and orchestration.

mod orchestrator;
mod processor;
mod progress;
mod synthesizer;

pub use orchestrator::{
    PipelineConfig, PipelineOrchestrator, PipelineRun, DEFAULT_MAX_CLOUD_COVER, DEFAULT_MAX_ZOOM,
    DEFAULT_WORKERS,
};
pub use processor::{normalize, ProcessedScene, SceneProcessor, DEFAULT_WORKING_SIZE};
pub use progress::{
    ProgressEvent, ProgressReporter, Stage, TileCoord, DEFAULT_PROGRESS_CAPACITY,
};
pub use synthesizer::{
    encode, is_encodable, pyramid_tile_count, CropTileRenderer, TileRenderer, DEFAULT_JPEG_QUALITY,
    DEFAULT_TILE_SIZE,
};
