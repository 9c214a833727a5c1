// src/config.rs

use crate::error::ConfigError;
use crate::types::Config;
use std::fs;
use std::path::Path;

impl Config {
    /// Read, parse and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Association gate actually used by the tracker.
    pub fn association_gate_px(&self) -> f64 {
        self.tracking
            .max_track_dist_px
            .unwrap_or(self.calibration.max_wh as f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cal = &self.calibration;
        if cal.max_area == 0 {
            return Err(ConfigError::invalid("calibration.max_area", "must be > 0"));
        }
        if cal.min_area > cal.max_area {
            return Err(ConfigError::invalid(
                "calibration.min_area",
                format!("{} exceeds max_area {}", cal.min_area, cal.max_area),
            ));
        }
        if cal.max_wh == 0 {
            return Err(ConfigError::invalid("calibration.max_wh", "must be > 0"));
        }
        if cal.min_wh > cal.max_wh {
            return Err(ConfigError::invalid(
                "calibration.min_wh",
                format!("{} exceeds max_wh {}", cal.min_wh, cal.max_wh),
            ));
        }
        if cal.mask.enabled {
            non_negative("calibration.mask.xc", cal.mask.xc)?;
            non_negative("calibration.mask.yc", cal.mask.yc)?;
            if !(cal.mask.radius.is_finite() && cal.mask.radius > 0.0) {
                return Err(ConfigError::invalid(
                    "calibration.mask.radius",
                    format!("{} gives a zero-area ROI", cal.mask.radius),
                ));
            }
        }

        non_negative("detection.border_margin_px", self.detection.border_margin_px)?;

        if let Some(gate) = self.tracking.max_track_dist_px {
            if !(gate.is_finite() && gate > 0.0) {
                return Err(ConfigError::invalid(
                    "tracking.max_track_dist_px",
                    format!("{} must be > 0", gate),
                ));
            }
        }

        let motion = &self.motion;
        if !(motion.fps.is_finite() && motion.fps > 0.0) {
            return Err(ConfigError::invalid(
                "motion.fps",
                format!("{} must be > 0", motion.fps),
            ));
        }
        if motion.velocity_window < 2 {
            return Err(ConfigError::invalid(
                "motion.velocity_window",
                format!("{} must be >= 2", motion.velocity_window),
            ));
        }
        if let Some(gate) = &motion.motion_gate {
            if gate.window_frames == 0 {
                return Err(ConfigError::invalid(
                    "motion.motion_gate.window_frames",
                    "must be >= 1",
                ));
            }
            if gate.min_count == 0 || gate.min_count > gate.window_frames {
                return Err(ConfigError::invalid(
                    "motion.motion_gate.min_count",
                    format!("{} must be in 1..={}", gate.min_count, gate.window_frames),
                ));
            }
            non_negative("motion.motion_gate.min_step_px", gate.min_step_px)?;
        }

        let behavior = &self.behavior;
        non_negative(
            "behavior.min_movement_speed_px_s",
            behavior.min_movement_speed_px_s,
        )?;
        non_negative("behavior.min_displacement_px", behavior.min_displacement_px)?;
        non_negative("behavior.ball_aspect_eps", behavior.ball_aspect_eps)?;
        if behavior.swim_confirm_frames == 0 {
            return Err(ConfigError::invalid(
                "behavior.swim_confirm_frames",
                "must be >= 1",
            ));
        }
        if let Some(bias) = &behavior.elongation_bias {
            if !(bias.min_aspect_ratio.is_finite() && bias.min_aspect_ratio >= 1.0) {
                return Err(ConfigError::invalid(
                    "behavior.elongation_bias.min_aspect_ratio",
                    format!("{} must be >= 1", bias.min_aspect_ratio),
                ));
            }
            if !(bias.speed_fraction > 0.0 && bias.speed_fraction <= 1.0) {
                return Err(ConfigError::invalid(
                    "behavior.elongation_bias.speed_fraction",
                    format!("{} must be in (0, 1]", bias.speed_fraction),
                ));
            }
        }

        if self.output.reader_queue == 0 {
            return Err(ConfigError::invalid("output.reader_queue", "must be >= 1"));
        }

        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{} must be a finite value >= 0", value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SpeedMode, ThresholdMethod};

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
calibration:
  thresh: 25
  mask:
    enabled: true
    xc: 100
    yc: 80
    radius: 60
motion:
  fps: 25
  velocity_window: 8
  speed_mode: path
detection:
  thresh_method: otsu
"#;
        let cfg = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.calibration.thresh, 25);
        assert_eq!(cfg.calibration.max_area, 824);
        assert!(cfg.calibration.mask.enabled);
        assert_eq!(cfg.motion.velocity_window, 8);
        assert_eq!(cfg.motion.speed_mode, SpeedMode::Path);
        assert_eq!(cfg.detection.thresh_method, ThresholdMethod::Otsu);
        assert_eq!(cfg.behavior.swim_confirm_frames, 1);
    }

    #[test]
    fn test_window_below_two_is_rejected() {
        let err = Config::from_yaml_str("motion:\n  velocity_window: 1\n").unwrap_err();
        match err {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "motion.velocity_window"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_negative_thresholds_are_rejected() {
        let err =
            Config::from_yaml_str("behavior:\n  min_movement_speed_px_s: -1.0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "behavior.min_movement_speed_px_s",
                ..
            }
        ));

        let err = Config::from_yaml_str("behavior:\n  min_displacement_px: -0.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "behavior.min_displacement_px",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_radius_mask_is_rejected() {
        let yaml = "calibration:\n  mask:\n    enabled: true\n    radius: 0\n";
        assert!(matches!(
            Config::from_yaml_str(yaml),
            Err(ConfigError::Invalid {
                field: "calibration.mask.radius",
                ..
            })
        ));
    }

    #[test]
    fn test_inverted_bounds_are_rejected() {
        let mut cfg = Config::default();
        cfg.calibration.min_area = 900;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.calibration.min_wh = 60;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_gate_falls_back_to_max_wh() {
        let mut cfg = Config::default();
        assert_eq!(cfg.association_gate_px(), 52.0);
        cfg.tracking.max_track_dist_px = Some(30.0);
        assert_eq!(cfg.association_gate_px(), 30.0);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let cfg = Config::from_yaml_str(include_str!("../config.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
