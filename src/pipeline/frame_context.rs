// src/pipeline/frame_context.rs
//
// Everything the pipeline produced for one frame. Records are in ascending
// track id order.

use crate::output::TrackRecord;

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_index: u64,
    pub timestamp_s: f64,
    pub detection_count: usize,
    /// false when the frame could not be decoded and tracks only aged.
    pub decoded: bool,
    pub records: Vec<TrackRecord>,
}

impl FrameContext {
    pub fn new(frame_index: u64, timestamp_s: f64) -> Self {
        Self {
            frame_index,
            timestamp_s,
            detection_count: 0,
            decoded: true,
            records: Vec::new(),
        }
    }

    pub fn skipped(frame_index: u64, timestamp_s: f64) -> Self {
        Self {
            decoded: false,
            ..Self::new(frame_index, timestamp_s)
        }
    }
}
