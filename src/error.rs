// src/error.rs
//
// Typed failures at the pipeline seams. The binary wraps these in anyhow.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing calibration / pipeline parameters. Always raised
/// before the first frame is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(
        "ROI mask (center {xc:.1},{yc:.1}, radius {radius:.1}) covers no pixel of a {width}x{height} frame"
    )]
    DegenerateMask {
        xc: f64,
        yc: f64,
        radius: f64,
        width: usize,
        height: usize,
    },

    #[error("background image {path}: {reason}")]
    Background { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// One frame failed to decode. Recoverable: the frame is skipped.
    #[error("frame {frame_index} could not be read: {reason}")]
    FrameRead { frame_index: u64, reason: String },

    /// The source cannot produce even its first frame.
    #[error("input {input} is unreadable: {reason}")]
    SourceUnreadable { input: String, reason: String },

    #[error("frame {frame_index} arrived after frame {last_index}")]
    OutOfOrderFrame { frame_index: u64, last_index: u64 },

    /// Internal bug class. Never corrected silently.
    #[error("track {track_id} invariant violated: {reason}")]
    TrackInvariant { track_id: u64, reason: String },
}

impl PipelineError {
    /// Whether the run can continue past this error by skipping one frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FrameRead { .. })
    }
}
