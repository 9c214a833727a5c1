// src/manifest.rs
//
// Run manifest: written once per video before the first frame is analysed,
// so a partial run still documents exactly how its rows were produced.

use crate::analysis::RuleDescription;
use crate::types::{Config, SpeedMode};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct MotionDefinitions {
    pub displacement: &'static str,
    pub speed_mode: SpeedMode,
    pub speed: &'static str,
    pub heading: &'static str,
    pub timestamp: &'static str,
    pub association_gate_px: f64,
}

impl MotionDefinitions {
    pub fn for_config(config: &Config) -> Self {
        let speed = match config.motion.speed_mode {
            SpeedMode::Net => "straight-line displacement / (t_newest - t_oldest)",
            SpeedMode::Path => "sum of consecutive window steps / (t_newest - t_oldest)",
        };
        Self {
            displacement: "euclidean distance between oldest and newest window sample",
            speed_mode: config.motion.speed_mode,
            speed,
            heading: "atan2(dy, dx) of the displacement, degrees, image coordinates",
            timestamp: "frame_index / fps",
            association_gate_px: config.association_gate_px(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub tool: &'static str,
    pub version: &'static str,
    pub created_at: DateTime<Utc>,
    pub input: String,
    pub frame_width: usize,
    pub frame_height: usize,
    pub roi_pixels: usize,
    pub config: Config,
    pub motion: MotionDefinitions,
    pub rules: Vec<RuleDescription>,
    pub csv_columns: Vec<&'static str>,
}

impl RunManifest {
    pub fn new(
        input: &Path,
        frame_size: (usize, usize),
        roi_pixels: usize,
        config: &Config,
        rules: Vec<RuleDescription>,
    ) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            created_at: Utc::now(),
            input: input.display().to_string(),
            frame_width: frame_size.0,
            frame_height: frame_size.1,
            roi_pixels,
            config: config.clone(),
            motion: MotionDefinitions::for_config(config),
            rules,
            csv_columns: crate::output::CSV_COLUMNS.to_vec(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create manifest {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}
