//! Detection batch sources.
//!
//! A source yields one `DetectionBatch` per processed frame: the decoded
//! frame plus every detection the external detector/tracker reported for it.
//!
//! - `replay`: JSON-lines detector output referencing frame images on disk
//! - `synthetic` (`stub://...`): generated frames and moving objects, for
//!   tests and demos
//!
//! Sources only read local files. Video decoding and the detector itself
//! live outside this crate.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::frame::Frame;
use crate::DetectionEvent;

pub mod replay;
pub mod synthetic;

pub use replay::ReplaySource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// One frame and its detections.
pub struct DetectionBatch {
    pub frame: Frame,
    pub events: Vec<DetectionEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub batches: u64,
    /// Input records dropped because they could not be decoded.
    pub skipped: u64,
}

pub trait DetectionSource: Send {
    fn name(&self) -> &str;

    /// `Ok(None)` when the stream has ended.
    fn next_batch(&mut self) -> Result<Option<DetectionBatch>>;

    fn stats(&self) -> SourceStats;
}

/// Opens `stub://...` as a synthetic source and anything else as a local
/// replay file. Other URL schemes are rejected.
pub fn open_source(uri: &str) -> Result<Box<dyn DetectionSource>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("empty source"));
    }
    if uri.starts_with("stub://") {
        let config = SyntheticConfig::parse(uri)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "unsupported source {:?}: only local replay files and stub:// are supported",
            uri
        ));
    }
    Ok(Box::new(ReplaySource::open(Path::new(uri))?))
}
