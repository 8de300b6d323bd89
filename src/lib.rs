//! Tracked-Object Capture Kernel
//!
//! This crate turns a stream of per-frame detections from an external
//! detector/tracker into durable training evidence: an image, a YOLO label in
//! two resolutions, and one database row per capture.
//!
//! # Architecture
//!
//! Detections flow through a single sequential consumer per stream:
//!
//! 1. **State Store** (`tracker`): per-object hysteresis bookkeeping.
//! 2. **Decision Engine** (`decision`): pure capture decision per detection.
//! 3. **Artifact Writer** (`artifacts`): image, resize, labels, row.
//! 4. **Coordinate Transformer** (`geometry`): VOC to YOLO, rescaling.
//! 5. **Persistence** (`storage`): SQLite or in-memory capture records.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frame carried with each detection batch
//! - `ingest`: detection batch sources (JSONL replay, synthetic)
//! - `pipeline`: per-stream glue with per-event failure isolation
//! - Core types: `ObjectId`, `DetectionEvent`

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod annotate;
pub mod artifacts;
pub mod config;
pub mod decision;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod tracker;
pub mod ui;

pub use artifacts::{ArtifactLayout, ArtifactName, ArtifactSettings, ArtifactWriter, CaptureImage};
pub use config::CaptureConfig;
pub use decision::{decide, CaptureAction, Thresholds};
pub use error::{CaptureError, CaptureFailure};
pub use frame::Frame;
pub use geometry::{
    from_normalized, rescale, to_normalized, ImageShape, NormalizedBox, VocBox, YoloLabel,
};
pub use ingest::{open_source, DetectionBatch, DetectionSource, ReplaySource, SyntheticSource};
pub use pipeline::{EventOutcome, Pipeline, PipelineStats};
pub use storage::{CaptureRecord, CaptureStore, InMemoryCaptureStore, SqliteCaptureStore};
pub use tracker::{ObjectTracker, StateSnapshot};

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:track_capture_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Seconds since the unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Detection Events --------------------

/// Track id assigned by the external tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One detector output for one tracked object in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// `None` when the tracker has not (yet) assigned an id.
    pub object_id: Option<ObjectId>,
    pub class_id: u32,
    pub confidence: f32, // 0..=1
    pub bbox: VocBox,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Capture time, seconds since epoch.
    pub timestamp: u64,
}

impl DetectionEvent {
    pub fn frame_shape(&self) -> ImageShape {
        ImageShape::new(self.frame_width, self.frame_height)
    }

    /// Rejects detections the state store must never see.
    ///
    /// Frame dimensions are not checked here: a zero-sized frame only aborts
    /// the capture, the observation itself still counts.
    pub fn validate(&self) -> std::result::Result<(), CaptureError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(CaptureError::InvalidDetection(format!(
                "confidence {} out of bounds",
                self.confidence
            )));
        }
        if !self.bbox.is_ordered() {
            return Err(CaptureError::InvalidDetection(format!(
                "box ({:.2}, {:.2}, {:.2}, {:.2}) is not ordered",
                self.bbox.x1, self.bbox.y1, self.bbox.x2, self.bbox.y2
            )));
        }
        Ok(())
    }
}
