// src/analysis/behavior_classifier.rs
//
// Behavior Classifier: an ordered table of typed rules over the current
// motion estimate and morphology. First match wins. The table is built once
// from the config and printed into the run manifest.
//
//   1. insufficient_history     estimate undefined          → UNKNOWN
//   2. moving_above_thresholds  speed & displacement        → SWIMMING
//   3. elongated_bias           (optional) relaxed speed     → SWIMMING
//   4. fallback                 always                       → ATTACHED
//
// The optional swim confirmation only ever looks at past frames of the same
// track, so the label at frame N still depends on frames <= N only.

use super::morphology::MorphologyDescriptor;
use super::motion_estimator::MotionEstimate;
use super::track_store::Track;
use crate::types::{BehaviorConfig, BehaviorLabel, Pose, SwimDirection};
use serde::Serialize;

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCondition {
    InsufficientHistory,
    MovingAboveThresholds {
        min_speed_px_s: f64,
        min_displacement_px: f64,
    },
    ElongatedBias {
        min_aspect_ratio: f64,
        min_speed_px_s: f64,
        min_displacement_px: f64,
    },
    Always,
}

impl RuleCondition {
    pub fn matches(
        &self,
        motion: Option<&MotionEstimate>,
        morphology: Option<&MorphologyDescriptor>,
    ) -> bool {
        match self {
            Self::InsufficientHistory => motion.is_none(),
            Self::MovingAboveThresholds {
                min_speed_px_s,
                min_displacement_px,
            } => motion.map_or(false, |m| {
                m.speed_px_s >= *min_speed_px_s && m.displacement_px >= *min_displacement_px
            }),
            Self::ElongatedBias {
                min_aspect_ratio,
                min_speed_px_s,
                min_displacement_px,
            } => match (motion, morphology) {
                (Some(m), Some(d)) => {
                    d.aspect_ratio >= *min_aspect_ratio
                        && m.speed_px_s >= *min_speed_px_s
                        && m.displacement_px >= *min_displacement_px
                }
                _ => false,
            },
            Self::Always => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::InsufficientHistory => "fewer than 2 window samples".to_string(),
            Self::MovingAboveThresholds {
                min_speed_px_s,
                min_displacement_px,
            } => format!(
                "speed_px_s >= {} and displacement_px >= {}",
                min_speed_px_s, min_displacement_px
            ),
            Self::ElongatedBias {
                min_aspect_ratio,
                min_speed_px_s,
                min_displacement_px,
            } => format!(
                "aspect_ratio >= {} and speed_px_s >= {} and displacement_px >= {}",
                min_aspect_ratio, min_speed_px_s, min_displacement_px
            ),
            Self::Always => "always".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BehaviorRule {
    pub name: &'static str,
    pub condition: RuleCondition,
    pub label: BehaviorLabel,
}

/// One row of the rule table as written to the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct RuleDescription {
    pub order: usize,
    pub name: String,
    pub condition: String,
    pub label: BehaviorLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// What the rule table said.
    pub raw: BehaviorLabel,
    /// What gets emitted after swim confirmation.
    pub label: BehaviorLabel,
    pub rule: &'static str,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct BehaviorClassifier {
    rules: Vec<BehaviorRule>,
    swim_confirm_frames: u32,
}

impl BehaviorClassifier {
    pub fn new(config: &BehaviorConfig) -> Self {
        let mut rules = vec![
            BehaviorRule {
                name: "insufficient_history",
                condition: RuleCondition::InsufficientHistory,
                label: BehaviorLabel::Unknown,
            },
            BehaviorRule {
                name: "moving_above_thresholds",
                condition: RuleCondition::MovingAboveThresholds {
                    min_speed_px_s: config.min_movement_speed_px_s,
                    min_displacement_px: config.min_displacement_px,
                },
                label: BehaviorLabel::Swimming,
            },
        ];
        if let Some(bias) = &config.elongation_bias {
            rules.push(BehaviorRule {
                name: "elongated_bias",
                condition: RuleCondition::ElongatedBias {
                    min_aspect_ratio: bias.min_aspect_ratio,
                    min_speed_px_s: bias.speed_fraction * config.min_movement_speed_px_s,
                    min_displacement_px: config.min_displacement_px,
                },
                label: BehaviorLabel::Swimming,
            });
        }
        rules.push(BehaviorRule {
            name: "fallback",
            condition: RuleCondition::Always,
            label: BehaviorLabel::Attached,
        });

        Self::with_rules(rules, config.swim_confirm_frames)
    }

    /// Custom table. A trailing `Always` rule is appended when missing so
    /// every input gets a label.
    pub fn with_rules(mut rules: Vec<BehaviorRule>, swim_confirm_frames: u32) -> Self {
        if !matches!(rules.last(), Some(r) if r.condition == RuleCondition::Always) {
            rules.push(BehaviorRule {
                name: "fallback",
                condition: RuleCondition::Always,
                label: BehaviorLabel::Attached,
            });
        }
        Self {
            rules,
            swim_confirm_frames: swim_confirm_frames.max(1),
        }
    }

    pub fn describe(&self) -> Vec<RuleDescription> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, r)| RuleDescription {
                order: i + 1,
                name: r.name.to_string(),
                condition: r.condition.describe(),
                label: r.label,
            })
            .collect()
    }

    /// Pure rule-table lookup.
    pub fn evaluate(
        &self,
        motion: Option<&MotionEstimate>,
        morphology: Option<&MorphologyDescriptor>,
    ) -> (BehaviorLabel, &'static str) {
        self.rules
            .iter()
            .find(|r| r.condition.matches(motion, morphology))
            .map(|r| (r.label, r.name))
            .unwrap_or((BehaviorLabel::Unknown, "none"))
    }

    /// Classify the track for the current frame and store the label on it.
    pub fn classify(
        &self,
        track: &mut Track,
        motion: Option<&MotionEstimate>,
        morphology: Option<&MorphologyDescriptor>,
    ) -> Classification {
        let (raw, rule) = self.evaluate(motion, morphology);

        if raw == BehaviorLabel::Swimming {
            track.swim_streak = track.swim_streak.saturating_add(1);
        } else {
            track.swim_streak = 0;
        }

        let label = if raw == BehaviorLabel::Swimming && track.swim_streak < self.swim_confirm_frames {
            BehaviorLabel::Attached
        } else {
            raw
        };

        track.label = label;
        Classification { raw, label, rule }
    }
}

/// Forward when the head leads the motion (or the body is a ball).
pub fn swim_direction(
    label: BehaviorLabel,
    motion: Option<&MotionEstimate>,
    morphology: Option<&MorphologyDescriptor>,
) -> SwimDirection {
    if label != BehaviorLabel::Swimming {
        return SwimDirection::None;
    }
    let Some(m) = morphology else {
        return SwimDirection::None;
    };
    if m.pose == Pose::Ball {
        return SwimDirection::Forward;
    }
    match (m.head_axis, motion.and_then(|e| e.heading_deg)) {
        (Some((hx, hy)), Some(heading)) => {
            let rad = heading.to_radians();
            if hx * rad.cos() + hy * rad.sin() >= 0.0 {
                SwimDirection::Forward
            } else {
                SwimDirection::Backward
            }
        }
        _ => SwimDirection::None,
    }
}
