// src/pipeline/orchestrator.rs
//
// Per-video pipeline. One instance per video, fed frames strictly in index
// order:
//
//   Frame → Preprocessor → BlobDetector → TrackAssociator (TrackStore)
//         → MorphologyAnalyzer → CausalMotionEstimator → BehaviorClassifier
//         → TrackRecord per active track
//
// Nothing here can see a frame after the one being processed.

use super::event_bus::{EventBus, TrackEvent};
use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use crate::analysis::{
    swim_direction, AssociationOutcome, BehaviorClassifier, CausalMotionEstimator,
    MorphologyAnalyzer, RuleDescription, TrackAssociator, TrackStore,
};
use crate::detection::BlobDetector;
use crate::error::PipelineError;
use crate::output::TrackRecord;
use crate::preprocessing::Preprocessor;
use crate::types::{BehaviorLabel, Config, Frame};
use std::time::Instant;
use tracing::debug;

const MAX_PENDING_EVENTS: usize = 4096;

pub struct VideoPipeline {
    width: usize,
    height: usize,
    fps: f64,
    preprocessor: Preprocessor,
    detector: BlobDetector,
    associator: TrackAssociator,
    store: TrackStore,
    motion: CausalMotionEstimator,
    morphology: MorphologyAnalyzer,
    classifier: BehaviorClassifier,
    last_index: Option<u64>,
    metrics: PipelineMetrics,
    events: EventBus,
}

impl VideoPipeline {
    /// Builds every stage for a `width` x `height` video. Mask and background
    /// problems surface here, before the first frame.
    pub fn new(config: &Config, width: usize, height: usize) -> Result<Self, PipelineError> {
        let preprocessor = Preprocessor::new(config, width, height)?;
        Ok(Self::assemble(config, width, height, preprocessor))
    }

    fn assemble(config: &Config, width: usize, height: usize, preprocessor: Preprocessor) -> Self {
        let motion = CausalMotionEstimator::new(&config.motion);
        let store = TrackStore::new(config.motion.velocity_window, motion.step_capacity());
        Self {
            width,
            height,
            fps: config.motion.fps,
            preprocessor,
            detector: BlobDetector::new(config),
            associator: TrackAssociator::new(config),
            store,
            motion,
            morphology: MorphologyAnalyzer::new(&config.behavior),
            classifier: BehaviorClassifier::new(&config.behavior),
            last_index: None,
            metrics: PipelineMetrics::new(),
            events: EventBus::new(MAX_PENDING_EVENTS),
        }
    }

    pub fn frame_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn roi_pixels(&self) -> usize {
        self.preprocessor.mask().pixel_count()
    }

    pub fn rule_table(&self) -> Vec<RuleDescription> {
        self.classifier.describe()
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn drain_events(&mut self) -> Vec<TrackEvent> {
        self.events.drain()
    }

    fn timestamp_of(&self, frame_index: u64) -> f64 {
        frame_index as f64 / self.fps
    }

    fn check_order(&mut self, frame_index: u64) -> Result<(), PipelineError> {
        if let Some(last) = self.last_index {
            if frame_index <= last {
                return Err(PipelineError::OutOfOrderFrame {
                    frame_index,
                    last_index: last,
                });
            }
        }
        self.last_index = Some(frame_index);
        Ok(())
    }

    /// Run one decoded frame through every stage.
    ///
    /// A frame whose geometry does not match the video is a recoverable
    /// `FrameRead`; the caller is expected to `skip_frame` it.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameContext, PipelineError> {
        let started = Instant::now();
        if frame.width != self.width
            || frame.height != self.height
            || frame.data.len() != self.width * self.height * 3
        {
            return Err(PipelineError::FrameRead {
                frame_index: frame.index,
                reason: format!(
                    "frame is {}x{} ({} bytes), video is {}x{}",
                    frame.width,
                    frame.height,
                    frame.data.len(),
                    self.width,
                    self.height
                ),
            });
        }
        self.check_order(frame.index)?;

        let masked = self.preprocessor.process(frame);
        let detections = self.detector.detect(&masked, self.preprocessor.mask());
        let outcome = self.associator.associate(
            &mut self.store,
            &detections,
            frame.index,
            masked.timestamp_s,
        )?;

        for &(id, di) in outcome.matched.iter().chain(outcome.spawned.iter()) {
            let descriptor = self.morphology.analyze(&detections[di]);
            if let Some(track) = self.store.get_mut(id) {
                track.morphology = Some(descriptor);
            }
        }
        self.publish_lifecycle(&outcome, frame.index);

        let mut ctx = FrameContext::new(frame.index, masked.timestamp_s);
        ctx.detection_count = detections.len();
        ctx.records = self.classify_active(frame.index, masked.timestamp_s)?;

        self.metrics.inc(&self.metrics.total_frames);
        self.metrics
            .add(&self.metrics.detections, detections.len() as u64);
        self.metrics
            .add(&self.metrics.records, ctx.records.len() as u64);
        for record in &ctx.records {
            let counter = match record.behavior {
                BehaviorLabel::Swimming => &self.metrics.swimming_records,
                BehaviorLabel::Attached => &self.metrics.attached_records,
                BehaviorLabel::Unknown => &self.metrics.unknown_records,
            };
            self.metrics.inc(counter);
        }
        self.metrics.set_timing(
            &self.metrics.frame_time_us,
            started.elapsed().as_micros() as u64,
        );

        Ok(ctx)
    }

    /// Account for a frame that could not be decoded: every track ages by
    /// one unmatched frame and no records are produced.
    pub fn skip_frame(&mut self, frame_index: u64) -> Result<FrameContext, PipelineError> {
        self.check_order(frame_index)?;
        let timestamp_s = self.timestamp_of(frame_index);
        let outcome = self
            .associator
            .associate(&mut self.store, &[], frame_index, timestamp_s)?;
        self.publish_lifecycle(&outcome, frame_index);

        self.metrics.inc(&self.metrics.total_frames);
        self.metrics.inc(&self.metrics.skipped_frames);
        Ok(FrameContext::skipped(frame_index, timestamp_s))
    }

    fn publish_lifecycle(&mut self, outcome: &AssociationOutcome, frame_index: u64) {
        debug!(
            "Frame {}: {} matched, {} spawned, {} coasting, {} retired",
            frame_index,
            outcome.matched.len(),
            outcome.spawned.len(),
            outcome.coasting.len(),
            outcome.retired.len()
        );
        for &(id, _) in &outcome.spawned {
            if let Some(track) = self.store.get(id) {
                let (x, y) = track.position();
                self.events.publish(TrackEvent::Spawned {
                    track_id: id,
                    frame_index,
                    x,
                    y,
                });
            }
            self.metrics.inc(&self.metrics.tracks_spawned);
        }
        for track in &outcome.retired {
            let last_seen = track.last_seen_frame().unwrap_or(track.first_frame);
            self.events.publish(TrackEvent::Retired {
                track_id: track.id,
                frame_index,
                lifetime_frames: last_seen - track.first_frame + 1,
                hits: track.hits,
            });
            self.metrics.inc(&self.metrics.tracks_retired);
        }
    }

    /// Motion, label and output row for every track matched on this frame,
    /// in ascending id order.
    fn classify_active(
        &mut self,
        frame_index: u64,
        timestamp_s: f64,
    ) -> Result<Vec<TrackRecord>, PipelineError> {
        let mut records = Vec::with_capacity(self.store.active_count());

        for track in self.store.iter_mut() {
            if !track.is_active() {
                continue;
            }
            let Some(morph) = track.morphology else {
                return Err(PipelineError::TrackInvariant {
                    track_id: track.id,
                    reason: "active track without morphology".to_string(),
                });
            };
            let estimate = self.motion.estimate(&track.window, &track.steps);
            let previous = track.label;
            let result = self
                .classifier
                .classify(track, estimate.as_ref(), Some(&morph));

            if result.raw != result.label {
                debug!(
                    "Track {} held at {} while {} is unconfirmed (frame {})",
                    track.id,
                    result.label.as_str(),
                    result.raw.as_str(),
                    frame_index
                );
            }
            if result.label != previous {
                debug!(
                    "Track {} {} → {} at frame {} ({})",
                    track.id,
                    previous.as_str(),
                    result.label.as_str(),
                    frame_index,
                    result.rule
                );
                self.events.publish(TrackEvent::BehaviorChanged {
                    track_id: track.id,
                    frame_index,
                    from: previous,
                    to: result.label,
                    rule: result.rule,
                });
            }

            let (x, y) = track.position();
            records.push(TrackRecord {
                frame_index,
                time_s: timestamp_s,
                track_id: track.id,
                centroid_x: x,
                centroid_y: y,
                speed_px_s: estimate.map(|e| e.speed_px_s),
                displacement_px: estimate.map(|e| e.displacement_px),
                heading_deg: estimate.and_then(|e| e.heading_deg),
                area_px: morph.area_px,
                perimeter_px: morph.perimeter_px,
                aspect_ratio: morph.aspect_ratio,
                elongation: morph.elongation,
                solidity: morph.solidity,
                pose: morph.pose,
                behavior: result.label,
                swim_direction: swim_direction(result.label, estimate.as_ref(), Some(&morph)),
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordWriter;
    use crate::types::{BehaviorConfig, MotionConfig, Pose, SwimDirection};

    const W: usize = 320;
    const H: usize = 120;

    /// Black RGB frame with bright 5x5 squares centred on each point.
    fn frame(index: u64, blobs: &[(usize, usize)]) -> Frame {
        let mut data = vec![0u8; W * H * 3];
        for &(cx, cy) in blobs {
            for y in cy - 2..=cy + 2 {
                for x in cx - 2..=cx + 2 {
                    let i = (y * W + x) * 3;
                    data[i] = 200;
                    data[i + 1] = 200;
                    data[i + 2] = 200;
                }
            }
        }
        Frame::from_rgb(index, W, H, data)
    }

    fn config() -> Config {
        Config {
            motion: MotionConfig {
                fps: 30.0,
                velocity_window: 8,
                ..MotionConfig::default()
            },
            behavior: BehaviorConfig {
                min_movement_speed_px_s: 15.0,
                min_displacement_px: 2.0,
                ..BehaviorConfig::default()
            },
            ..Config::default()
        }
    }

    fn pipeline() -> VideoPipeline {
        VideoPipeline::new(&config(), W, H).unwrap()
    }

    fn moving(index: u64) -> Frame {
        frame(index, &[(20 + 20 * index as usize, 60)])
    }

    #[test]
    fn test_stationary_blob_unknown_then_attached() {
        let mut p = pipeline();
        let mut labels = Vec::new();
        for i in 0..20 {
            let ctx = p.process_frame(&frame(i, &[(100, 60)])).unwrap();
            assert_eq!(ctx.records.len(), 1);
            assert_eq!(ctx.records[0].track_id, 1);
            labels.push(ctx.records[0].behavior);
        }
        assert_eq!(labels[0], BehaviorLabel::Unknown);
        assert!(labels[1..].iter().all(|&l| l == BehaviorLabel::Attached));
    }

    #[test]
    fn test_first_record_has_undefined_motion() {
        let mut p = pipeline();
        let ctx = p.process_frame(&frame(0, &[(100, 60)])).unwrap();
        let r = &ctx.records[0];
        assert!(r.speed_px_s.is_none());
        assert!(r.displacement_px.is_none());
        assert_eq!(r.area_px, 25.0);
        assert_eq!(r.pose, Pose::Ball);
        assert_eq!(r.swim_direction, SwimDirection::None);
    }

    #[test]
    fn test_moving_blob_is_swimming_once_window_fills() {
        let mut p = pipeline();
        for i in 0..14u64 {
            let ctx = p.process_frame(&moving(i)).unwrap();
            assert_eq!(ctx.records.len(), 1);
            let r = &ctx.records[0];
            assert_eq!(r.track_id, 1);
            if i >= 7 {
                assert_eq!(r.behavior, BehaviorLabel::Swimming, "frame {i}");
                assert!((r.speed_px_s.unwrap() - 600.0).abs() < 1e-6);
                assert!((r.displacement_px.unwrap() - 140.0).abs() < 1e-6);
                assert_eq!(r.swim_direction, SwimDirection::Forward);
            }
        }
    }

    #[test]
    fn test_retired_track_comes_back_with_new_id() {
        let mut p = pipeline();
        p.process_frame(&frame(0, &[(100, 60)])).unwrap();
        p.process_frame(&frame(1, &[(100, 60)])).unwrap();
        // default tolerance is 10 unmatched frames
        for i in 2..=12 {
            let ctx = p.process_frame(&frame(i, &[])).unwrap();
            assert!(ctx.records.is_empty());
        }
        assert!(p.store().get(1).is_none());

        let ctx = p.process_frame(&frame(13, &[(100, 60)])).unwrap();
        assert_eq!(ctx.records.len(), 1);
        assert_eq!(ctx.records[0].track_id, 2);
        assert_eq!(ctx.records[0].behavior, BehaviorLabel::Unknown);

        let events = p.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            TrackEvent::Retired {
                track_id: 1,
                frame_index: 12,
                ..
            }
        )));
    }

    #[test]
    fn test_coasting_track_emits_no_row() {
        let mut p = pipeline();
        p.process_frame(&frame(0, &[(100, 60), (200, 60)])).unwrap();
        let ctx = p.process_frame(&frame(1, &[(100, 60)])).unwrap();
        assert_eq!(ctx.records.len(), 1);
        assert_eq!(ctx.records[0].track_id, 1);
        assert_eq!(p.store().len(), 2);
    }

    #[test]
    fn test_future_frame_does_not_change_past_records() {
        let run = |last: Frame| {
            let mut p = pipeline();
            let mut out = Vec::new();
            for i in 0..10u64 {
                out.push(p.process_frame(&moving(i)).unwrap().records);
            }
            p.process_frame(&last).unwrap();
            out
        };
        let a = run(moving(10));
        let b = run(frame(10, &[(40, 30), (300, 100)]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_runs_produce_identical_csv() {
        let run = || {
            let mut p = pipeline();
            let mut w = RecordWriter::new(Vec::new());
            for i in 0..12u64 {
                let blobs = [(20 + 20 * i as usize, 40), (160, 90)];
                let ctx = p.process_frame(&frame(i, &blobs)).unwrap();
                w.write_all(&ctx.records).unwrap();
            }
            w.into_inner().unwrap()
        };
        let a = run();
        assert!(!a.is_empty());
        assert_eq!(a, run());
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut p = pipeline();
        for i in 0..30u64 {
            p.process_frame(&frame(i, &[(100 + (i % 3) as usize, 60)]))
                .unwrap();
            for t in p.store().iter() {
                assert!(t.window.len() <= 8);
            }
        }
        let t = p.store().get(1).unwrap();
        let frames: Vec<u64> = t.window.iter().map(|s| s.frame_index).collect();
        assert_eq!(frames, (22..30).collect::<Vec<u64>>());
    }

    #[test]
    fn test_skipped_frame_ages_tracks() {
        let mut p = pipeline();
        p.process_frame(&frame(0, &[(100, 60)])).unwrap();
        let ctx = p.skip_frame(1).unwrap();
        assert!(!ctx.decoded);
        assert!(ctx.records.is_empty());
        assert_eq!(p.store().get(1).unwrap().frames_since_hit, 1);

        let ctx = p.process_frame(&frame(2, &[(101, 60)])).unwrap();
        assert_eq!(ctx.records[0].track_id, 1);
        assert_eq!(p.metrics().summary().skipped_frames, 1);
    }

    #[test]
    fn test_out_of_order_frame_is_fatal() {
        let mut p = pipeline();
        p.process_frame(&frame(5, &[])).unwrap();
        let err = p.process_frame(&frame(5, &[])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrderFrame {
                frame_index: 5,
                last_index: 5
            }
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_wrong_size_frame_is_recoverable() {
        let mut p = pipeline();
        let bad = Frame::from_rgb(0, 10, 10, vec![0; 300]);
        let err = p.process_frame(&bad).unwrap_err();
        assert!(err.is_recoverable());
        // index 0 was not consumed
        assert!(p.skip_frame(0).is_ok());
    }

    #[test]
    fn test_label_change_events() {
        let mut p = pipeline();
        for i in 0..3u64 {
            p.process_frame(&moving(i)).unwrap();
        }
        let events = p.drain_events();
        assert!(matches!(events[0], TrackEvent::Spawned { track_id: 1, .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            TrackEvent::BehaviorChanged {
                track_id: 1,
                to: BehaviorLabel::Swimming,
                ..
            }
        )));
    }
}
