// src/preprocessing.rs
//
// Frame Preprocessor: RGB frame → value channel → (static background
// subtraction) → circular ROI mask. Everything here is fixed for the whole
// run, so the stage holds no temporal state.

use crate::error::ConfigError;
use crate::types::{Config, Frame, MaskConfig, MaskedFrame};
use std::path::Path;
use tracing::info;

/// Precomputed ROI membership for one frame geometry.
#[derive(Debug, Clone)]
pub struct RoiMask {
    inside: Vec<bool>,
    pixel_count: usize,
}

impl RoiMask {
    /// Build the mask for a `width` x `height` frame. An ROI that covers no
    /// pixel of the frame is a configuration error.
    pub fn new(cfg: &MaskConfig, width: usize, height: usize) -> Result<Self, ConfigError> {
        let degenerate = || ConfigError::DegenerateMask {
            xc: cfg.xc,
            yc: cfg.yc,
            radius: cfg.radius,
            width,
            height,
        };

        if width == 0 || height == 0 {
            return Err(degenerate());
        }

        let inside: Vec<bool> = if cfg.enabled {
            let r2 = cfg.radius * cfg.radius;
            (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| {
                    let dx = x as f64 - cfg.xc;
                    let dy = y as f64 - cfg.yc;
                    dx * dx + dy * dy <= r2
                })
                .collect()
        } else {
            vec![true; width * height]
        };

        let pixel_count = inside.iter().filter(|&&v| v).count();
        if pixel_count == 0 {
            return Err(degenerate());
        }

        Ok(Self {
            inside,
            pixel_count,
        })
    }

    #[inline]
    pub fn contains_index(&self, idx: usize) -> bool {
        self.inside[idx]
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }
}

#[derive(Debug)]
pub struct Preprocessor {
    mask: RoiMask,
    background: Option<Vec<u8>>,
    fps: f64,
}

impl Preprocessor {
    /// Builds the mask and loads the configured background image, if any.
    pub fn new(config: &Config, width: usize, height: usize) -> Result<Self, ConfigError> {
        let background = match &config.detection.background_path {
            Some(path) => Some(load_background(path, width, height)?),
            None => None,
        };
        Self::with_background(config, width, height, background)
    }

    pub fn with_background(
        config: &Config,
        width: usize,
        height: usize,
        background: Option<Vec<u8>>,
    ) -> Result<Self, ConfigError> {
        let mask = RoiMask::new(&config.calibration.mask, width, height)?;
        if let Some(bg) = &background {
            if bg.len() != width * height {
                return Err(ConfigError::Background {
                    path: config
                        .detection
                        .background_path
                        .clone()
                        .unwrap_or_default(),
                    reason: format!(
                        "{} pixels, frame has {}",
                        bg.len(),
                        width * height
                    ),
                });
            }
        }

        info!(
            "ROI: {} of {} pixels ({}x{}){}",
            mask.pixel_count(),
            width * height,
            width,
            height,
            if background.is_some() {
                ", background subtraction on"
            } else {
                ""
            }
        );

        Ok(Self {
            mask,
            background,
            fps: config.motion.fps,
        })
    }

    pub fn mask(&self) -> &RoiMask {
        &self.mask
    }

    /// Caller guarantees the frame matches the mask geometry.
    pub fn process(&self, frame: &Frame) -> MaskedFrame {
        let mut data = value_channel(&frame.data);

        if let Some(bg) = &self.background {
            for (px, &b) in data.iter_mut().zip(bg.iter()) {
                *px = px.saturating_sub(b);
            }
        }

        for (idx, px) in data.iter_mut().enumerate() {
            if !self.mask.contains_index(idx) {
                *px = 0;
            }
        }

        MaskedFrame {
            index: frame.index,
            timestamp_s: frame.index as f64 / self.fps,
            width: frame.width,
            height: frame.height,
            data,
        }
    }
}

/// HSV value channel of packed RGB8, i.e. max(r, g, b) per pixel.
pub fn value_channel(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| px[0].max(px[1]).max(px[2]))
        .collect()
}

/// Load a background image and reduce it to the value channel.
pub fn load_background(path: &Path, width: usize, height: usize) -> Result<Vec<u8>, ConfigError> {
    let img = image::open(path).map_err(|e| ConfigError::Background {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let rgb = img.to_rgb8();
    if rgb.width() as usize != width || rgb.height() as usize != height {
        return Err(ConfigError::Background {
            path: path.to_path_buf(),
            reason: format!(
                "size {}x{} does not match footage {}x{}",
                rgb.width(),
                rgb.height(),
                width,
                height
            ),
        });
    }
    Ok(value_channel(rgb.as_raw()))
}
