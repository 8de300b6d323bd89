//! Tracked-object state store.
//!
//! One record per tracker id, owned by a single pipeline. Updates are
//! order-dependent, so a store must only ever be fed by one consumer.

use std::collections::{BTreeMap, HashMap};

use crate::decision::CaptureAction;
use crate::ObjectId;

#[derive(Clone, Debug)]
struct TrackedObjectState {
    /// Append-only while above threshold; never trimmed on a dip.
    confidence_history: Vec<f32>,
    frame_count: u32,
    frames_since_last_capture: u32,
    initial_captured: bool,
    capture_count: u32,
    active: bool,
    /// Store-local sequence number of the last update, for eviction.
    last_update: u64,
}

impl TrackedObjectState {
    fn new(confidence: f32, seq: u64) -> Self {
        Self {
            confidence_history: vec![confidence],
            frame_count: 1,
            frames_since_last_capture: 0,
            initial_captured: false,
            capture_count: 0,
            active: true,
            last_update: seq,
        }
    }

    /// State for an id that comes back after being evicted while stopped.
    fn retired(confidence: f32, seq: u64, capture_count: u32) -> Self {
        Self {
            initial_captured: true,
            capture_count,
            active: false,
            ..Self::new(confidence, seq)
        }
    }

    fn snapshot(&self, object_id: ObjectId) -> StateSnapshot {
        StateSnapshot {
            object_id,
            frame_count: self.frame_count,
            frames_since_last_capture: self.frames_since_last_capture,
            initial_captured: self.initial_captured,
            capture_count: self.capture_count,
            active: self.active,
            history_len: self.confidence_history.len(),
        }
    }
}

/// Immutable copy of an object's state after an observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSnapshot {
    pub object_id: ObjectId,
    pub frame_count: u32,
    pub frames_since_last_capture: u32,
    pub initial_captured: bool,
    pub capture_count: u32,
    pub active: bool,
    pub history_len: usize,
}

/// Result of [`ObjectTracker::summary`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerSummary {
    pub frame_count: u32,
    pub consistent_above_threshold: bool,
    pub mean_confidence: f32,
}

pub struct ObjectTracker {
    objects: HashMap<ObjectId, TrackedObjectState>,
    /// `last_update` -> id, oldest first.
    recency: BTreeMap<u64, ObjectId>,
    /// Capture counts of stopped ids that were evicted. A stop outlives
    /// eviction, so these ids come back inactive.
    retired: HashMap<ObjectId, u32>,
    confidence_threshold: f32,
    max_tracked: Option<usize>,
    seq: u64,
    evicted: u64,
}

impl ObjectTracker {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            objects: HashMap::new(),
            recency: BTreeMap::new(),
            retired: HashMap::new(),
            confidence_threshold,
            max_tracked: None,
            seq: 0,
            evicted: 0,
        }
    }

    /// Caps the number of tracked ids; the least recently updated id is
    /// dropped when a new one would exceed the cap. An evicted id that had
    /// stopped keeps only a tombstone and stays stopped if it reappears; any
    /// other evicted id starts over.
    pub fn with_capacity_limit(mut self, max_tracked: Option<usize>) -> Self {
        self.max_tracked = max_tracked.filter(|max| *max > 0);
        self
    }

    /// Records one detection for `object_id` and returns the new state.
    pub fn observe(&mut self, object_id: ObjectId, confidence: f32) -> StateSnapshot {
        self.seq += 1;
        let seq = self.seq;
        let threshold = self.confidence_threshold;

        if let Some(state) = self.objects.get_mut(&object_id) {
            self.recency.remove(&state.last_update);
            self.recency.insert(seq, object_id);
            state.last_update = seq;
            if confidence > threshold {
                state.frame_count += 1;
                state.confidence_history.push(confidence);
                state.frames_since_last_capture += 1;
                log::debug!(
                    "object {} updated: confidence {:.2}, frame count {}",
                    object_id,
                    confidence,
                    state.frame_count
                );
            } else {
                state.frame_count = 0;
                state.frames_since_last_capture = 0;
                log::debug!(
                    "object {} below threshold ({:.2} <= {:.2}); counters reset",
                    object_id,
                    confidence,
                    threshold
                );
            }
            return state.snapshot(object_id);
        }

        self.evict_for_insert();
        let state = match self.retired.remove(&object_id) {
            Some(capture_count) => {
                log::debug!(
                    "object {} reappeared after its stop; capture stays disabled",
                    object_id
                );
                TrackedObjectState::retired(confidence, seq, capture_count)
            }
            None => {
                log::info!(
                    "object {} initialized with confidence {:.2}",
                    object_id,
                    confidence
                );
                TrackedObjectState::new(confidence, seq)
            }
        };
        let snapshot = state.snapshot(object_id);
        self.objects.insert(object_id, state);
        self.recency.insert(seq, object_id);
        snapshot
    }

    /// Applies the side effects of an action that was carried out.
    ///
    /// Returns false when the id is unknown.
    pub fn commit(&mut self, object_id: ObjectId, action: CaptureAction) -> bool {
        let Some(state) = self.objects.get_mut(&object_id) else {
            return false;
        };
        match action {
            CaptureAction::None => {}
            CaptureAction::InitialCapture => {
                state.initial_captured = true;
                state.capture_count = 1;
            }
            CaptureAction::AdditionalCapture => {
                state.frames_since_last_capture = 0;
                state.capture_count += 1;
            }
            CaptureAction::StopTracking => {
                state.active = false;
                log::info!(
                    "object {} reached {} captures; capture disabled",
                    object_id,
                    state.capture_count
                );
            }
        }
        true
    }

    pub fn snapshot(&self, object_id: ObjectId) -> Option<StateSnapshot> {
        self.objects
            .get(&object_id)
            .map(|state| state.snapshot(object_id))
    }

    pub fn confidence_history(&self, object_id: ObjectId) -> Option<&[f32]> {
        self.objects
            .get(&object_id)
            .map(|state| state.confidence_history.as_slice())
    }

    pub fn summary(&self, object_id: ObjectId) -> Option<TrackerSummary> {
        let state = self.objects.get(&object_id)?;
        let history = &state.confidence_history;
        let mean_confidence = if history.is_empty() {
            0.0
        } else {
            history.iter().sum::<f32>() / history.len() as f32
        };
        Some(TrackerSummary {
            frame_count: state.frame_count,
            consistent_above_threshold: history.iter().all(|c| *c > self.confidence_threshold),
            mean_confidence,
        })
    }

    pub fn log_summary(&self, object_id: ObjectId) {
        match self.summary(object_id) {
            Some(summary) => log::debug!(
                "object {}: frame count {}, consistent above threshold: {}, mean confidence {:.2}",
                object_id,
                summary.frame_count,
                summary.consistent_above_threshold,
                summary.mean_confidence
            ),
            None => log::warn!("object {} not found in tracker", object_id),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of ids dropped by the capacity limit so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Forgets every tracked object.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.recency.clear();
        self.retired.clear();
        log::info!("object tracker reset");
    }

    fn evict_for_insert(&mut self) {
        let Some(max) = self.max_tracked else {
            return;
        };
        while self.objects.len() >= max {
            let Some((_, oldest)) = self.recency.pop_first() else {
                return;
            };
            if let Some(state) = self.objects.remove(&oldest) {
                if !state.active {
                    self.retired.insert(oldest, state.capture_count);
                }
            }
            self.evicted += 1;
            log::debug!("object {} evicted (tracker holds {} ids)", oldest, max);
        }
    }
}
