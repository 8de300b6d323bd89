//! Synthetic source (`stub://`) for tests and demos.
//!
//! Produces 640x480 frames with a few objects sliding across them. Object
//! confidence follows a fixed pattern with a periodic dip, so the capture
//! hysteresis gets exercised without a detector.
//!
//! Options go in the query string: `stub://yard?frames=200&objects=3`.
//! Without `frames` the source never ends.

use anyhow::{anyhow, Result};

use super::{DetectionBatch, DetectionSource, SourceStats};
use crate::frame::Frame;
use crate::geometry::VocBox;
use crate::{now_s, DetectionEvent, ObjectId};

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;
const BOX_SIZE: f64 = 64.0;
/// Every object's confidence dips below any sane threshold once per period.
const DIP_PERIOD: u64 = 40;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticConfig {
    pub url: String,
    pub frames: Option<u64>,
    pub objects: u32,
    pub classes: u32,
}

impl SyntheticConfig {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source must start with stub://"))?;
        let mut config = Self {
            url: url.to_string(),
            frames: None,
            objects: 2,
            classes: 2,
        };
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(config);
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid stub option {:?}", pair))?;
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub option {} must be an integer", key))?;
            match key {
                "frames" => config.frames = Some(parsed),
                "objects" => config.objects = u32::try_from(parsed)?,
                "classes" => config.classes = u32::try_from(parsed)?.max(1),
                other => return Err(anyhow!("unknown stub option {:?}", other)),
            }
        }
        Ok(config)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        log::info!("SyntheticSource: connected to {}", config.url);
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn detections(&self, timestamp: u64) -> Vec<DetectionEvent> {
        let span = FRAME_WIDTH as f64 - BOX_SIZE;
        (0..self.config.objects)
            .map(|i| {
                let id = i as u64 + 1;
                let phase = self.frame_count + id * 7;
                let x1 = ((phase * 4) as f64) % span;
                let y1 = 40.0 + (i as f64 * 90.0) % (FRAME_HEIGHT as f64 - BOX_SIZE - 40.0);
                let confidence = if phase % DIP_PERIOD == 0 {
                    0.1
                } else {
                    0.55 + ((phase % 9) as f32) * 0.05
                };
                DetectionEvent {
                    object_id: Some(ObjectId(id)),
                    class_id: i % self.config.classes,
                    confidence,
                    bbox: VocBox::new(x1, y1, x1 + BOX_SIZE, y1 + BOX_SIZE),
                    frame_width: FRAME_WIDTH,
                    frame_height: FRAME_HEIGHT,
                    timestamp,
                }
            })
            .collect()
    }
}

impl DetectionSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn next_batch(&mut self) -> Result<Option<DetectionBatch>> {
        if self
            .config
            .frames
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.frame_count += 1;
        let timestamp = now_s()?;
        let pixels = self.generate_synthetic_pixels();
        let frame = Frame::from_rgb(pixels, FRAME_WIDTH, FRAME_HEIGHT, timestamp)?;
        let events = self.detections(timestamp);
        Ok(Some(DetectionBatch { frame, events }))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            source: self.config.url.clone(),
            batches: self.frame_count,
            skipped: 0,
        }
    }
}
