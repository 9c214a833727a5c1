// src/analysis/mod.rs
//
// Per-frame tracking and behaviour modules.
//
// Signal flow:
//   Detections → associator (updates track_store) ─┬→ motion_estimator ─┐
//                                                   └→ morphology ───────┼→ behavior_classifier → label
//
// Orchestrated by pipeline::VideoPipeline.

pub mod associator;
pub mod behavior_classifier;
pub mod morphology;
pub mod motion_estimator;
pub mod track_store;

// Re-exports for ergonomic access from the pipeline
pub use associator::{AssociationOutcome, TrackAssociator};
pub use behavior_classifier::{swim_direction, BehaviorClassifier, RuleDescription};
pub use morphology::MorphologyAnalyzer;
pub use motion_estimator::CausalMotionEstimator;
pub use track_store::TrackStore;
