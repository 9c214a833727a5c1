// src/pipeline/event_bus.rs
//
// Track lifecycle events. The pipeline publishes; the run loop drains once
// per frame and logs them.

use crate::types::BehaviorLabel;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Spawned {
        track_id: u64,
        frame_index: u64,
        x: f64,
        y: f64,
    },
    Retired {
        track_id: u64,
        frame_index: u64,
        /// Frames between spawn and the last match.
        lifetime_frames: u64,
        hits: u64,
    },
    BehaviorChanged {
        track_id: u64,
        frame_index: u64,
        from: BehaviorLabel,
        to: BehaviorLabel,
        rule: &'static str,
    },
}

pub struct EventBus {
    events: VecDeque<TrackEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: TrackEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<TrackEvent> {
        self.events.drain(..).collect()
    }
}
