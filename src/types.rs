// src/types.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// RUN CONFIGURATION
// ============================================================================

/// Effective configuration of one run. Loaded once, validated, then shared
/// read-only with every stage of the pipeline and copied into the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub calibration: CalibrationConfig,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub motion: MotionConfig,
    pub behavior: BehaviorConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Values produced by the standalone ROI / threshold tuners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub mask: MaskConfig,
    /// Intensity threshold; a pixel is foreground when strictly above it.
    pub thresh: u8,
    pub min_area: u32,
    pub max_area: u32,
    /// Bounds on bounding-box width and height, pixels.
    pub min_wh: u32,
    pub max_wh: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mask: MaskConfig::default(),
            thresh: 10,
            min_area: 10,
            max_area: 824,
            min_wh: 2,
            max_wh: 52,
        }
    }
}

/// Circular region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// false = the whole frame is the ROI
    pub enabled: bool,
    pub xc: f64,
    pub yc: f64,
    pub radius: f64,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            xc: 320.0,
            yc: 256.0,
            radius: 128.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    Fixed,
    Otsu,
}

impl ThresholdMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Otsu => "otsu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub thresh_method: ThresholdMethod,
    /// Static background image (same size as the footage) subtracted before
    /// thresholding.
    pub background_path: Option<PathBuf>,
    /// Frames with more foreground pixels than this produce no detections.
    pub max_foreground_pixels: Option<usize>,
    /// Elliptical closing kernel diameter in pixels, 0 or 1 disables.
    pub close_kernel: u32,
    /// Elliptical opening kernel diameter in pixels, 0 or 1 disables.
    pub open_kernel: u32,
    /// Blobs whose centroid is this close to the frame edge are dropped.
    pub border_margin_px: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresh_method: ThresholdMethod::Fixed,
            background_path: None,
            max_foreground_pixels: None,
            close_kernel: 0,
            open_kernel: 0,
            border_margin_px: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Association gate in pixels. Falls back to `calibration.max_wh`.
    pub max_track_dist_px: Option<f64>,
    /// A track unmatched for more than this many frames is retired.
    pub max_lost_frames: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_track_dist_px: None,
            max_lost_frames: 10,
        }
    }
}

/// Numerator of the speed estimate. Displacement is always the straight
/// line between the window endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    /// straight-line endpoint displacement / window time span
    Net,
    /// cumulative path length / window time span
    Path,
}

impl SpeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Net => "net",
            Self::Path => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub fps: f64,
    /// Number of trailing position samples kept per track (>= 2).
    pub velocity_window: usize,
    pub speed_mode: SpeedMode,
    pub motion_gate: Option<MotionGateConfig>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            velocity_window: 15,
            speed_mode: SpeedMode::Net,
            motion_gate: None,
        }
    }
}

/// Binary "is it moving at all" gate over recent per-frame centroid steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionGateConfig {
    pub window_frames: usize,
    pub min_step_px: f64,
    pub min_count: usize,
}

impl Default for MotionGateConfig {
    fn default() -> Self {
        Self {
            window_frames: 5,
            min_step_px: 0.5,
            min_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub min_movement_speed_px_s: f64,
    pub min_displacement_px: f64,
    /// |aspect_ratio - 1| below this is a BALL pose.
    pub ball_aspect_eps: f64,
    /// Depth in pixels of each end cap used for head/tail polarity.
    pub num_cap_lines: u32,
    /// Consecutive raw SWIMMING frames required before SWIMMING is emitted.
    /// 1 disables confirmation.
    pub swim_confirm_frames: u32,
    pub elongation_bias: Option<ElongationBiasConfig>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            min_movement_speed_px_s: 8.0,
            min_displacement_px: 2.0,
            ball_aspect_eps: 0.25,
            num_cap_lines: 4,
            swim_confirm_frames: 1,
            elongation_bias: None,
        }
    }
}

/// Lets clearly elongated bodies count as swimming at a fraction of the
/// speed threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElongationBiasConfig {
    pub min_aspect_ratio: f64,
    /// In (0, 1].
    pub speed_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Defaults to a `csv` directory next to each input.
    pub output_dir: Option<PathBuf>,
    /// Frames buffered between the reader and the analysis loop.
    pub reader_queue: usize,
    pub video_extensions: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            reader_queue: 16,
            video_extensions: ["mp4", "avi", "mov", "mkv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// FRAMES
// ============================================================================

/// Decoded frame as it leaves a frame source: packed RGB8.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Frame {
    pub fn from_rgb(index: u64, width: usize, height: usize, data: Vec<u8>) -> Self {
        Self {
            index,
            data,
            width,
            height,
        }
    }
}

/// Single-channel image after background subtraction and ROI masking.
#[derive(Debug, Clone)]
pub struct MaskedFrame {
    pub index: u64,
    pub timestamp_s: f64,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

// ============================================================================
// LABELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorLabel {
    Swimming,
    Attached,
    Unknown,
}

impl BehaviorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swimming => "swimming",
            Self::Attached => "attached",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Ball,
    Elongated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwimDirection {
    Forward,
    Backward,
    None,
}
