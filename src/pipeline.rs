//! Per-stream capture pipeline.
//!
//! A `Pipeline` owns the state store, the artifact writer and a persistence
//! handle for exactly one stream. Every event runs to completion before the
//! next one is looked at, and a failing event never stops the stream.

use anyhow::Result;

use crate::artifacts::{ArtifactSettings, ArtifactWriter, CaptureRequest};
use crate::config::CaptureConfig;
use crate::decision::{decide, CaptureAction, Thresholds};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::DetectionBatch;
use crate::storage::{CaptureRecord, CaptureStore};
use crate::tracker::ObjectTracker;
use crate::{DetectionEvent, ObjectId};

#[derive(Clone, Debug, PartialEq)]
pub enum EventOutcome {
    /// Observed; no capture due.
    Ignored,
    Captured {
        action: CaptureAction,
        record: CaptureRecord,
    },
    /// The object reached its capture limit.
    Stopped(ObjectId),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub batches: u64,
    pub events: u64,
    pub captures: u64,
    /// Captures whose row exists but whose later steps failed.
    pub partial_captures: u64,
    pub stops: u64,
    pub errors: u64,
}

pub struct Pipeline<S: CaptureStore> {
    tracker: ObjectTracker,
    thresholds: Thresholds,
    class_names: Vec<String>,
    writer: ArtifactWriter,
    store: S,
    stats: PipelineStats,
}

impl<S: CaptureStore> Pipeline<S> {
    /// Single-stream pipeline writing under `cfg.output_dir`. Creates the
    /// artifact directories; fails if they cannot be created.
    pub fn new(cfg: &CaptureConfig, store: S) -> Result<Self> {
        Self::with_artifacts(cfg, cfg.artifact_settings(), store)
    }

    /// Pipeline writing to its own artifact root. Pipelines running side by
    /// side must each get a distinct root (see
    /// [`CaptureConfig::stream_artifact_settings`]).
    pub fn with_artifacts(
        cfg: &CaptureConfig,
        artifacts: ArtifactSettings,
        store: S,
    ) -> Result<Self> {
        let writer = ArtifactWriter::new(artifacts)?;
        Ok(Self {
            tracker: ObjectTracker::new(cfg.thresholds.ss_confidence)
                .with_capacity_limit(cfg.max_tracked_objects),
            thresholds: cfg.thresholds,
            class_names: cfg.class_names.clone(),
            writer,
            store,
            stats: PipelineStats::default(),
        })
    }

    pub fn process_event(
        &mut self,
        event: &DetectionEvent,
        frame: &Frame,
    ) -> Result<EventOutcome, CaptureError> {
        self.stats.events += 1;
        let object_id = event.object_id.ok_or(CaptureError::MissingTrackId)?;
        event.validate()?;

        let snapshot = self.tracker.observe(object_id, event.confidence);
        let action = decide(&snapshot, event.confidence, &self.thresholds);

        match action {
            CaptureAction::None => Ok(EventOutcome::Ignored),
            CaptureAction::StopTracking => {
                self.tracker.commit(object_id, action);
                self.tracker.log_summary(object_id);
                self.stats.stops += 1;
                Ok(EventOutcome::Stopped(object_id))
            }
            CaptureAction::InitialCapture | CaptureAction::AdditionalCapture => {
                let class_name = self
                    .class_names
                    .get(event.class_id as usize)
                    .ok_or(CaptureError::UnknownClass(event.class_id))?;
                let request = CaptureRequest {
                    action,
                    object_id,
                    event,
                    snapshot: &snapshot,
                    frame,
                    class_name,
                };
                match self.writer.capture(&mut self.store, &request) {
                    Ok(record) => {
                        self.tracker.commit(object_id, action);
                        self.stats.captures += 1;
                        Ok(EventOutcome::Captured { action, record })
                    }
                    Err(failure) => {
                        // A row exists: count the capture so the next
                        // qualifying frame does not insert a duplicate.
                        if failure.record_id.is_some() {
                            self.tracker.commit(object_id, action);
                            self.stats.partial_captures += 1;
                        }
                        Err(failure.error)
                    }
                }
            }
        }
    }

    /// Runs every event of the batch, logging and counting failures.
    pub fn process_batch(&mut self, batch: &DetectionBatch) -> Vec<EventOutcome> {
        self.stats.batches += 1;
        let mut outcomes = Vec::with_capacity(batch.events.len());
        for event in &batch.events {
            match self.process_event(event, &batch.frame) {
                Ok(outcome) => outcomes.push(outcome),
                Err(CaptureError::MissingTrackId) => {
                    self.stats.errors += 1;
                    log::debug!(
                        "{}: skipping class {} detection without track id",
                        CaptureError::MissingTrackId.code(),
                        event.class_id
                    );
                }
                Err(e) => {
                    self.stats.errors += 1;
                    log::warn!(
                        "{}: object {}: {}",
                        e.code(),
                        event
                            .object_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        e
                    );
                }
            }
        }
        outcomes
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VocBox;
    use crate::storage::InMemoryCaptureStore;

    fn config(root: &std::path::Path) -> CaptureConfig {
        CaptureConfig {
            output_dir: root.to_path_buf(),
            class_names: vec!["bird".to_string(), "squirrel".to_string()],
            resize: crate::geometry::ImageShape::new(32, 24),
            thresholds: Thresholds {
                frame_count: 3,
                ss_confidence: 0.5,
                additional_frame: 20,
                max_screenshots: 2,
            },
            ..CaptureConfig::default()
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(vec![90u8; 64 * 48 * 3], 64, 48, 100).unwrap()
    }

    fn event(object_id: Option<u64>, class_id: u32, confidence: f32) -> DetectionEvent {
        DetectionEvent {
            object_id: object_id.map(ObjectId),
            class_id,
            confidence,
            bbox: VocBox::new(8.0, 8.0, 24.0, 40.0),
            frame_width: 64,
            frame_height: 48,
            timestamp: 100,
        }
    }

    #[test]
    fn steady_object_is_captured_on_third_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut pipeline = Pipeline::new(&config(dir.path()), InMemoryCaptureStore::new())?;
        let frame = frame();

        let outcomes: Vec<EventOutcome> = (0..3)
            .map(|_| pipeline.process_event(&event(Some(4), 1, 0.6), &frame))
            .collect::<Result<_, _>>()?;
        assert_eq!(outcomes[0], EventOutcome::Ignored);
        assert_eq!(outcomes[1], EventOutcome::Ignored);
        match &outcomes[2] {
            EventOutcome::Captured { action, record } => {
                assert_eq!(*action, CaptureAction::InitialCapture);
                assert_eq!(record.class_name, "squirrel");
                assert_eq!(record.frame_count, 3);
                assert!(record.is_complete());
            }
            other => panic!("expected a capture, got {:?}", other),
        }
        assert_eq!(pipeline.store().count()?, 1);
        assert_eq!(pipeline.stats().captures, 1);
        Ok(())
    }

    #[test]
    fn missing_track_id_leaves_the_store_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut pipeline = Pipeline::new(&config(dir.path()), InMemoryCaptureStore::new())?;
        let err = pipeline
            .process_event(&event(None, 0, 0.9), &frame())
            .unwrap_err();
        assert!(matches!(err, CaptureError::MissingTrackId));
        assert!(pipeline.tracker().is_empty());
        Ok(())
    }

    #[test]
    fn invalid_detection_is_not_observed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut pipeline = Pipeline::new(&config(dir.path()), InMemoryCaptureStore::new())?;
        let err = pipeline
            .process_event(&event(Some(1), 0, 1.5), &frame())
            .unwrap_err();
        assert_eq!(err.code(), "InvalidDetectionError");
        assert!(pipeline.tracker().is_empty());
        Ok(())
    }

    #[test]
    fn unknown_class_skips_capture_but_keeps_tracking() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut pipeline = Pipeline::new(&config(dir.path()), InMemoryCaptureStore::new())?;
        let frame = frame();
        pipeline.process_event(&event(Some(2), 9, 0.9), &frame)?;
        pipeline.process_event(&event(Some(2), 9, 0.9), &frame)?;
        let err = pipeline
            .process_event(&event(Some(2), 9, 0.9), &frame)
            .unwrap_err();
        assert!(matches!(err, CaptureError::UnknownClass(9)));

        let snap = pipeline.tracker().snapshot(ObjectId(2)).unwrap();
        assert_eq!(snap.frame_count, 3);
        assert!(!snap.initial_captured);
        assert_eq!(pipeline.store().count()?, 0);
        Ok(())
    }

    #[test]
    fn stop_is_reported_once_the_limit_is_reached() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut cfg = config(dir.path());
        cfg.thresholds = Thresholds {
            frame_count: 1,
            ss_confidence: 0.5,
            additional_frame: 2,
            max_screenshots: 2,
        };
        let mut pipeline = Pipeline::new(&cfg, InMemoryCaptureStore::new())?;
        let frame = frame();

        let mut outcomes = Vec::new();
        for _ in 0..8 {
            outcomes.push(pipeline.process_event(&event(Some(5), 0, 0.9), &frame)?);
        }
        let captures = outcomes
            .iter()
            .filter(|o| matches!(o, EventOutcome::Captured { .. }))
            .count();
        let stops = outcomes
            .iter()
            .filter(|o| matches!(o, EventOutcome::Stopped(_)))
            .count();
        assert_eq!(captures, 2);
        assert_eq!(stops, 1);
        assert_eq!(pipeline.store().count()?, 2);
        assert!(!pipeline.tracker().snapshot(ObjectId(5)).unwrap().active);
        Ok(())
    }
}
