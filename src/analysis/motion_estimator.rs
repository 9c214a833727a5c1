// src/analysis/motion_estimator.rs
//
// Causal Motion Estimator. Every estimate is rebuilt from a track's trailing
// window; nothing is carried over between frames and no sample newer than
// the current frame can exist in the window.
//
//   displacement = |newest - oldest|            (straight line, always)
//   speed        = numerator / (t_newest - t_oldest)
//                  numerator = displacement     (speed_mode: net)
//                            = Σ |p[i+1]-p[i]|  (speed_mode: path)

use crate::types::{MotionConfig, MotionGateConfig, SpeedMode};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub frame_index: u64,
    pub timestamp_s: f64,
    pub x: f64,
    pub y: f64,
}

impl PositionSample {
    pub fn distance_to(&self, other: &PositionSample) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Fixed-capacity FIFO of the most recent positions, oldest first.
#[derive(Debug, Clone)]
pub struct PositionWindow {
    samples: VecDeque<PositionSample>,
    capacity: usize,
}

impl PositionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append the newest sample; returns the evicted oldest one, if any.
    pub fn push(&mut self, sample: PositionSample) -> Option<PositionSample> {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&PositionSample> {
        self.samples.front()
    }

    pub fn newest(&self) -> Option<&PositionSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PositionSample> {
        self.samples.iter()
    }
}

/// Recent per-frame centroid steps, for the binary motion gate.
#[derive(Debug, Clone)]
pub struct StepHistory {
    steps: VecDeque<f64>,
    capacity: usize,
}

impl StepHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            steps: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, step_px: f64) {
        if self.capacity == 0 {
            return;
        }
        self.steps.push_back(step_px);
        while self.steps.len() > self.capacity {
            self.steps.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn count_at_least(&self, min_step_px: f64) -> usize {
        self.steps.iter().filter(|&&s| s >= min_step_px).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionEstimate {
    pub speed_px_s: f64,
    pub displacement_px: f64,
    /// Direction of the net displacement, atan2(dy, dx) in degrees.
    pub heading_deg: Option<f64>,
    /// Window samples the estimate was built from.
    pub samples: usize,
}

pub struct CausalMotionEstimator {
    speed_mode: SpeedMode,
    gate: Option<MotionGateConfig>,
}

impl CausalMotionEstimator {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            speed_mode: config.speed_mode,
            gate: config.motion_gate.clone(),
        }
    }

    /// Steps a track must remember for the gate (0 when the gate is off).
    pub fn step_capacity(&self) -> usize {
        self.gate.as_ref().map_or(0, |g| g.window_frames)
    }

    /// `None` until the window holds at least two samples.
    pub fn estimate(&self, window: &PositionWindow, steps: &StepHistory) -> Option<MotionEstimate> {
        if window.len() < 2 {
            return None;
        }
        let oldest = window.oldest()?;
        let newest = window.newest()?;

        let dx = newest.x - oldest.x;
        let dy = newest.y - oldest.y;
        let displacement = dx.hypot(dy);
        let heading_deg = if displacement > 0.0 {
            Some(dy.atan2(dx).to_degrees())
        } else {
            None
        };

        let numerator = match self.speed_mode {
            SpeedMode::Net => displacement,
            SpeedMode::Path => path_length(window),
        };
        let span_s = newest.timestamp_s - oldest.timestamp_s;
        let mut speed = if span_s > 0.0 { numerator / span_s } else { 0.0 };

        if let Some(gate) = &self.gate {
            let moving =
                steps.len() >= gate.window_frames && steps.count_at_least(gate.min_step_px) >= gate.min_count;
            if !moving {
                speed = 0.0;
            }
        }

        Some(MotionEstimate {
            speed_px_s: speed,
            displacement_px: displacement,
            heading_deg,
            samples: window.len(),
        })
    }
}

fn path_length(window: &PositionWindow) -> f64 {
    window
        .iter()
        .zip(window.iter().skip(1))
        .map(|(a, b)| a.distance_to(b))
        .sum()
}
