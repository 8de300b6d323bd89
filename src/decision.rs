//! Capture decision engine.
//!
//! `decide` is pure: it inspects a post-observation snapshot and names the
//! action. The side effects of an action are applied by
//! [`ObjectTracker::commit`](crate::tracker::ObjectTracker::commit) once the
//! action has actually been carried out.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::tracker::StateSnapshot;

pub const DEFAULT_SS_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_FRAME_COUNT_THRESHOLD: u32 = 3;
pub const DEFAULT_ADDITIONAL_FRAME_THRESHOLD: u32 = 20;
pub const DEFAULT_MAX_SCREENSHOTS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Consecutive qualifying frames before the first capture.
    pub frame_count: u32,
    /// A frame qualifies only when its confidence is strictly above this.
    pub ss_confidence: f32,
    /// Qualifying frames between two captures of the same object.
    pub additional_frame: u32,
    /// Upper bound on captures per object.
    pub max_screenshots: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT_THRESHOLD,
            ss_confidence: DEFAULT_SS_CONFIDENCE_THRESHOLD,
            additional_frame: DEFAULT_ADDITIONAL_FRAME_THRESHOLD,
            max_screenshots: DEFAULT_MAX_SCREENSHOTS,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if !self.ss_confidence.is_finite() || !(0.0..1.0).contains(&self.ss_confidence) {
            return Err(anyhow!("ss_confidence threshold must be within [0, 1)"));
        }
        if self.frame_count == 0 {
            return Err(anyhow!("frame_count threshold must be at least 1"));
        }
        if self.additional_frame == 0 {
            return Err(anyhow!("additional_frame threshold must be at least 1"));
        }
        if self.max_screenshots == 0 {
            return Err(anyhow!("max_screenshots must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureAction {
    None,
    InitialCapture,
    AdditionalCapture,
    StopTracking,
}

impl CaptureAction {
    /// True for actions that write artifacts.
    pub fn is_capture(self) -> bool {
        matches!(
            self,
            CaptureAction::InitialCapture | CaptureAction::AdditionalCapture
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureAction::None => "none",
            CaptureAction::InitialCapture => "initial",
            CaptureAction::AdditionalCapture => "additional",
            CaptureAction::StopTracking => "stop",
        }
    }
}

/// First matching rule wins.
pub fn decide(state: &StateSnapshot, confidence: f32, thresholds: &Thresholds) -> CaptureAction {
    if !state.active {
        return CaptureAction::None;
    }
    if state.frame_count < thresholds.frame_count {
        return CaptureAction::None;
    }
    if confidence <= thresholds.ss_confidence {
        return CaptureAction::None;
    }
    if !state.initial_captured {
        return CaptureAction::InitialCapture;
    }
    if state.frames_since_last_capture >= thresholds.additional_frame
        && state.capture_count < thresholds.max_screenshots
    {
        return CaptureAction::AdditionalCapture;
    }
    if state.capture_count >= thresholds.max_screenshots {
        return CaptureAction::StopTracking;
    }
    CaptureAction::None
}
