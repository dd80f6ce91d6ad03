//! Pipeline progress reporting.
//!
//! Progress is published on a broadcast channel so any number of observers
//! can follow a run. Observers that fall behind skip events rather than
//! stalling the pipeline. The most recent event is also retained so failures
//! can report where the run stopped.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events per observer.
pub const DEFAULT_PROGRESS_CAPACITY: usize = 256;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Searching,
    Processing,
    Tiling,
    Complete,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Searching => "searching",
            Stage::Processing => "processing",
            Stage::Tiling => "tiling",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Position of one tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// One progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,

    /// Overall completion, 0-100
    pub percent: u8,
    pub message: String,

    /// Set for per-tile events during tiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile: Option<TileCoord>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: message.into(),
            tile: None,
        }
    }

    pub fn with_tile(mut self, tile: TileCoord) -> Self {
        self.tile = Some(tile);
        self
    }
}

/// Publisher side of a run's progress stream.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressEvent>,
    last: Arc<Mutex<Option<ProgressEvent>>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PROGRESS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Add an observer. It receives events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no observers is not an error.
    pub fn emit(&self, event: ProgressEvent) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(event.clone());
        let _ = self.tx.send(event);
    }

    /// The most recently emitted event.
    pub fn last(&self) -> Option<ProgressEvent> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
