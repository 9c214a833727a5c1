// src/pipeline/metrics.rs
//
// Per-video counters. Cloned handles share the same atomics, so the reader
// task and the analysis task can both report into one instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub skipped_frames: Arc<AtomicU64>,
    pub detections: Arc<AtomicU64>,
    pub records: Arc<AtomicU64>,
    pub tracks_spawned: Arc<AtomicU64>,
    pub tracks_retired: Arc<AtomicU64>,
    pub swimming_records: Arc<AtomicU64>,
    pub attached_records: Arc<AtomicU64>,
    pub unknown_records: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            skipped_frames: Arc::new(AtomicU64::new(0)),
            detections: Arc::new(AtomicU64::new(0)),
            records: Arc::new(AtomicU64::new(0)),
            tracks_spawned: Arc::new(AtomicU64::new(0)),
            tracks_retired: Arc::new(AtomicU64::new(0)),
            swimming_records: Arc::new(AtomicU64::new(0)),
            attached_records: Arc::new(AtomicU64::new(0)),
            unknown_records: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Last frame's processing time.
    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            skipped_frames: self.skipped_frames.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            tracks_spawned: self.tracks_spawned.load(Ordering::Relaxed),
            tracks_retired: self.tracks_retired.load(Ordering::Relaxed),
            swimming_records: self.swimming_records.load(Ordering::Relaxed),
            attached_records: self.attached_records.load(Ordering::Relaxed),
            unknown_records: self.unknown_records.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub skipped_frames: u64,
    pub detections: u64,
    pub records: u64,
    pub tracks_spawned: u64,
    pub tracks_retired: u64,
    pub swimming_records: u64,
    pub attached_records: u64,
    pub unknown_records: u64,
    pub last_frame_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
