// src/detection/mod.rs

mod blob_detector;
mod types;

// Re-export public APIs
pub use blob_detector::BlobDetector;
pub use types::*;
