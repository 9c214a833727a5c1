// src/analysis/track_store.rs
//
// Arena of live tracks keyed by identifier. Identifiers start at 1, grow
// monotonically and are never handed out twice, so a retired organism that
// reappears always comes back under a new id.

use super::morphology::MorphologyDescriptor;
use super::motion_estimator::{PositionSample, PositionWindow, StepHistory};
use crate::error::PipelineError;
use crate::types::BehaviorLabel;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Matched on the current frame.
    Active,
    /// Unmatched, still within the lost-frame tolerance.
    Coasting,
    /// Removed from the store. Only ever seen on tracks handed back by
    /// [`TrackStore::retire`].
    Retired,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub status: TrackStatus,
    /// Trailing positions, oldest first.
    pub window: PositionWindow,
    /// Per-frame centroid steps for the motion gate.
    pub steps: StepHistory,
    pub frames_since_hit: u32,
    pub label: BehaviorLabel,
    pub morphology: Option<MorphologyDescriptor>,
    /// Consecutive frames the rule table said SWIMMING.
    pub swim_streak: u32,
    pub first_frame: u64,
    pub hits: u64,
}

impl Track {
    fn new(id: u64, sample: PositionSample, window_capacity: usize, step_capacity: usize) -> Self {
        let mut window = PositionWindow::new(window_capacity);
        window.push(sample);
        Self {
            id,
            status: TrackStatus::Active,
            window,
            steps: StepHistory::new(step_capacity),
            frames_since_hit: 0,
            label: BehaviorLabel::Unknown,
            morphology: None,
            swim_streak: 0,
            first_frame: sample.frame_index,
            hits: 1,
        }
    }

    /// Last matched centroid.
    pub fn position(&self) -> (f64, f64) {
        self.window
            .newest()
            .map(|s| (s.x, s.y))
            .unwrap_or((f64::NAN, f64::NAN))
    }

    pub fn last_seen_frame(&self) -> Option<u64> {
        self.window.newest().map(|s| s.frame_index)
    }

    pub fn is_active(&self) -> bool {
        self.status == TrackStatus::Active
    }

    pub(crate) fn record_hit(&mut self, sample: PositionSample) -> Result<(), PipelineError> {
        if let Some(last) = self.window.newest() {
            if sample.frame_index <= last.frame_index {
                return Err(PipelineError::TrackInvariant {
                    track_id: self.id,
                    reason: format!(
                        "sample for frame {} after frame {}",
                        sample.frame_index, last.frame_index
                    ),
                });
            }
            self.steps.push(sample.distance_to(last));
        }
        self.window.push(sample);
        self.frames_since_hit = 0;
        self.status = TrackStatus::Active;
        self.hits += 1;
        self.check_invariants()
    }

    pub(crate) fn record_miss(&mut self) {
        self.frames_since_hit += 1;
        self.status = TrackStatus::Coasting;
    }

    /// Window bounded by its capacity and ordered by frame index.
    pub fn check_invariants(&self) -> Result<(), PipelineError> {
        if self.window.len() > self.window.capacity() {
            return Err(PipelineError::TrackInvariant {
                track_id: self.id,
                reason: format!(
                    "window holds {} samples, capacity {}",
                    self.window.len(),
                    self.window.capacity()
                ),
            });
        }
        let ordered = self
            .window
            .iter()
            .zip(self.window.iter().skip(1))
            .all(|(a, b)| a.frame_index < b.frame_index);
        if !ordered {
            return Err(PipelineError::TrackInvariant {
                track_id: self.id,
                reason: "window samples out of frame order".to_string(),
            });
        }
        Ok(())
    }
}

pub struct TrackStore {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    window_capacity: usize,
    step_capacity: usize,
}

impl TrackStore {
    pub fn new(window_capacity: usize, step_capacity: usize) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            window_capacity,
            step_capacity,
        }
    }

    /// Start a track with a singleton window; returns its new id.
    pub fn spawn(&mut self, sample: PositionSample) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track::new(id, sample, self.window_capacity, self.step_capacity),
        );
        id
    }

    /// Remove a track for good. The id is not reissued.
    pub fn retire(&mut self, id: u64) -> Option<Track> {
        self.tracks.remove(&id).map(|mut t| {
            t.status = TrackStatus::Retired;
            t
        })
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// Ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn active_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_active()).count()
    }
}
