// src/analysis/associator.rs
//
// Greedy nearest-centroid association.
//
// Every (track, detection) pair inside the gate is collected, sorted by
// (distance, track id, detection index) and accepted in that order when
// neither side is taken yet. The tie-break keys make the result independent
// of float noise in equal distances.
//
// Coasting tracks take part in matching; a track whose unmatched counter
// goes above `max_lost_frames` is retired after matching.

use super::motion_estimator::PositionSample;
use super::track_store::{Track, TrackStore};
use crate::detection::Detection;
use crate::error::PipelineError;
use crate::types::Config;
use std::collections::BTreeSet;
use tracing::debug;

/// What one association step did to the store.
#[derive(Debug, Default)]
pub struct AssociationOutcome {
    /// (track id, detection index)
    pub matched: Vec<(u64, usize)>,
    /// (new track id, detection index)
    pub spawned: Vec<(u64, usize)>,
    pub coasting: Vec<u64>,
    pub retired: Vec<Track>,
}

pub struct TrackAssociator {
    gate_px: f64,
    max_lost_frames: u32,
}

impl TrackAssociator {
    pub fn new(config: &Config) -> Self {
        Self {
            gate_px: config.association_gate_px(),
            max_lost_frames: config.tracking.max_lost_frames,
        }
    }

    pub fn associate(
        &self,
        store: &mut TrackStore,
        detections: &[Detection],
        frame_index: u64,
        timestamp_s: f64,
    ) -> Result<AssociationOutcome, PipelineError> {
        let mut outcome = AssociationOutcome::default();

        let mut pairs: Vec<(f64, u64, usize)> = Vec::new();
        for track in store.iter() {
            let pos = track.position();
            for (di, det) in detections.iter().enumerate() {
                let dist = det.distance_to(pos);
                if dist <= self.gate_px {
                    pairs.push((dist, track.id, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut taken_tracks: BTreeSet<u64> = BTreeSet::new();
        let mut taken_dets = vec![false; detections.len()];
        for (dist, id, di) in pairs {
            if taken_tracks.contains(&id) || taken_dets[di] {
                continue;
            }
            taken_tracks.insert(id);
            taken_dets[di] = true;

            let (x, y) = detections[di].centroid;
            if let Some(track) = store.get_mut(id) {
                track.record_hit(PositionSample {
                    frame_index,
                    timestamp_s,
                    x,
                    y,
                })?;
            }
            debug!("Track {} matched detection {} (dist={:.2}px)", id, di, dist);
            outcome.matched.push((id, di));
        }

        // unmatched tracks coast; the ones past tolerance are retired
        let mut expired = Vec::new();
        for track in store.iter_mut() {
            if taken_tracks.contains(&track.id) {
                continue;
            }
            track.record_miss();
            if track.frames_since_hit > self.max_lost_frames {
                expired.push(track.id);
            } else {
                outcome.coasting.push(track.id);
            }
        }
        for id in expired {
            if let Some(track) = store.retire(id) {
                outcome.retired.push(track);
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if taken_dets[di] {
                continue;
            }
            let id = store.spawn(PositionSample {
                frame_index,
                timestamp_s,
                x: det.centroid.0,
                y: det.centroid.1,
            });
            outcome.spawned.push((id, di));
        }

        outcome.matched.sort_by_key(|&(_, di)| di);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackingConfig;

    fn det(x: usize, y: usize) -> Detection {
        // 3x3 block centred on (x, y)
        let pixels = (y - 1..=y + 1)
            .flat_map(|py| (x - 1..=x + 1).map(move |px| (px, py)))
            .collect();
        Detection::from_pixels(pixels).unwrap()
    }

    fn associator(gate: f64, max_lost: u32) -> TrackAssociator {
        TrackAssociator::new(&Config {
            tracking: TrackingConfig {
                max_track_dist_px: Some(gate),
                max_lost_frames: max_lost,
            },
            ..Config::default()
        })
    }

    fn step(
        a: &TrackAssociator,
        store: &mut TrackStore,
        dets: &[Detection],
        frame: u64,
    ) -> AssociationOutcome {
        a.associate(store, dets, frame, frame as f64 / 30.0).unwrap()
    }

    #[test]
    fn test_spawn_then_match() {
        let a = associator(10.0, 3);
        let mut store = TrackStore::new(8, 0);
        let out = step(&a, &mut store, &[det(10, 10), det(50, 50)], 0);
        assert_eq!(out.spawned, vec![(1, 0), (2, 1)]);

        let out = step(&a, &mut store, &[det(12, 10), det(52, 51)], 1);
        assert_eq!(out.matched, vec![(1, 0), (2, 1)]);
        assert!(out.spawned.is_empty());
        assert_eq!(store.get(1).unwrap().position(), (12.0, 10.0));
    }

    #[test]
    fn test_outside_gate_spawns_new_track() {
        let a = associator(5.0, 3);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10)], 0);
        let out = step(&a, &mut store, &[det(30, 10)], 1);
        assert!(out.matched.is_empty());
        assert_eq!(out.spawned, vec![(2, 0)]);
        assert_eq!(out.coasting, vec![1]);
    }

    #[test]
    fn test_gate_is_inclusive() {
        let a = associator(5.0, 3);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10)], 0);
        let out = step(&a, &mut store, &[det(15, 10)], 1);
        assert_eq!(out.matched, vec![(1, 0)]);
    }

    #[test]
    fn test_closest_pair_wins() {
        let a = associator(20.0, 3);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10), det(30, 10)], 0);
        // a single detection between them, nearer to track 2
        let out = step(&a, &mut store, &[det(22, 10)], 1);
        assert_eq!(out.matched, vec![(2, 0)]);
        assert_eq!(out.coasting, vec![1]);
    }

    #[test]
    fn test_equal_distance_prefers_lower_track_id() {
        let a = associator(20.0, 3);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10), det(30, 10)], 0);
        let out = step(&a, &mut store, &[det(20, 10)], 1);
        assert_eq!(out.matched, vec![(1, 0)]);
    }

    #[test]
    fn test_matching_is_global_not_per_track() {
        let a = associator(20.0, 3);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(5, 10), det(15, 10)], 0);
        // track 2 takes the detection at 14 (1px) before track 1 (9px) can;
        // track 1 has nothing else in the gate, so the detection at 30 spawns
        let out = step(&a, &mut store, &[det(14, 10), det(30, 10)], 1);
        assert_eq!(out.matched, vec![(2, 0)]);
        assert_eq!(out.coasting, vec![1]);
        assert_eq!(out.spawned, vec![(3, 1)]);
    }

    #[test]
    fn test_retire_after_tolerance_and_fresh_id() {
        let a = associator(10.0, 2);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10)], 0);
        step(&a, &mut store, &[det(10, 10)], 1);

        // missed frames 2, 3 → coasting; frame 4 → 3 misses > 2 → retired
        assert_eq!(step(&a, &mut store, &[], 2).coasting, vec![1]);
        assert_eq!(step(&a, &mut store, &[], 3).coasting, vec![1]);
        let out = step(&a, &mut store, &[], 4);
        assert_eq!(out.retired.len(), 1);
        assert_eq!(out.retired[0].id, 1);
        assert_eq!(store.len(), 0);

        let out = step(&a, &mut store, &[det(10, 10)], 5);
        assert_eq!(out.spawned, vec![(2, 0)]);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_coasting_track_can_be_reacquired() {
        let a = associator(10.0, 5);
        let mut store = TrackStore::new(8, 0);
        step(&a, &mut store, &[det(10, 10)], 0);
        step(&a, &mut store, &[], 1);
        step(&a, &mut store, &[], 2);
        let out = step(&a, &mut store, &[det(13, 10)], 3);
        assert_eq!(out.matched, vec![(1, 0)]);
        let t = store.get(1).unwrap();
        assert_eq!(t.frames_since_hit, 0);
        let frames: Vec<u64> = t.window.iter().map(|s| s.frame_index).collect();
        assert_eq!(frames, vec![0, 3]);
    }
}
