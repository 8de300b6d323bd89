//! JSON-lines replay source.
//!
//! Each line is one processed frame:
//!
//! ```text
//! {"frame": "frames/000001.png", "timestamp": 1721517879,
//!  "detections": [{"object_id": 7, "class_id": 0, "confidence": 0.81,
//!                  "box": [100.0, 50.0, 300.0, 250.0]}]}
//! ```
//!
//! `object_id` may be `null` (untracked detection) and `timestamp` may be
//! omitted (wall clock is used). Relative frame paths resolve against the
//! directory of the JSONL file. Lines that fail to parse, or whose frame
//! cannot be decoded, are logged and skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use super::{DetectionBatch, DetectionSource, SourceStats};
use crate::frame::Frame;
use crate::geometry::VocBox;
use crate::{now_s, DetectionEvent, ObjectId};

#[derive(Debug, Deserialize)]
struct ReplayLine {
    frame: PathBuf,
    timestamp: Option<u64>,
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

#[derive(Debug, Deserialize)]
struct ReplayDetection {
    object_id: Option<u64>,
    class_id: u32,
    confidence: f32,
    #[serde(rename = "box")]
    bbox: [f64; 4],
}

pub struct ReplaySource {
    name: String,
    base_dir: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    batches: u64,
    skipped: u64,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::info!("ReplaySource: reading {}", path.display());
        Ok(Self {
            name: path.display().to_string(),
            base_dir,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            batches: 0,
            skipped: 0,
        })
    }

    fn decode_line(&self, line: &str) -> Result<DetectionBatch> {
        let record: ReplayLine = serde_json::from_str(line).context("invalid replay record")?;
        let timestamp = match record.timestamp {
            Some(ts) => ts,
            None => now_s()?,
        };
        let frame_path = if record.frame.is_absolute() {
            record.frame
        } else {
            self.base_dir.join(record.frame)
        };
        let frame = Frame::open(&frame_path, timestamp)?;
        let events = record
            .detections
            .into_iter()
            .map(|d| DetectionEvent {
                object_id: d.object_id.map(ObjectId),
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: VocBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                frame_width: frame.width(),
                frame_height: frame.height(),
                timestamp,
            })
            .collect();
        Ok(DetectionBatch { frame, events })
    }
}

impl DetectionSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_batch(&mut self) -> Result<Option<DetectionBatch>> {
        while let Some(line) = self.lines.next() {
            let line = line.with_context(|| format!("failed to read {}", self.name))?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match self.decode_line(&line) {
                Ok(batch) => {
                    self.batches += 1;
                    return Ok(Some(batch));
                }
                Err(e) => {
                    self.skipped += 1;
                    log::warn!("{}:{}: skipping line: {:#}", self.name, self.line_no, e);
                }
            }
        }
        Ok(None)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            source: self.name.clone(),
            batches: self.batches,
            skipped: self.skipped,
        }
    }
}
