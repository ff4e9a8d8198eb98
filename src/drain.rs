//! Adaptive drain control.
//!
//! Once per render quantum the controller compares how much audio is queued
//! between capture and render with the operator's target. When the queue
//! runs over, a proportion of the excess is thrown away from the oldest end
//! so the consumer catches up with the producer. The controller is purely
//! reactive: it never predicts future occupancy.
//!
//! Correction is done by discarding frames rather than time-stretching.
//! A discard is a tiny skip in the signal; at high drain rates it can be
//! audible, which is the price of tracking the target tightly.

use crate::ring_buffer::{frames_for_ms, FrameConsumer};

/// Drain decisions for one stream at a fixed sample rate
#[derive(Debug, Clone, Copy)]
pub struct DrainController {
    sample_rate: u32,
}

impl DrainController {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// How many frames to discard this quantum.
    ///
    /// Zero when the target is 0 (drain control off), when the queue is at
    /// or under the target, or when `drain_rate` is 0. Otherwise
    /// `ceil(excess * drain_rate)` frames, never more than is queued.
    pub fn frames_to_discard(
        &self,
        occupancy_frames: usize,
        target_buffer_ms: i32,
        drain_rate: f32,
    ) -> usize {
        if target_buffer_ms <= 0 || drain_rate <= 0.0 || drain_rate.is_nan() {
            return 0;
        }

        let target_frames = frames_for_ms(target_buffer_ms as u32, self.sample_rate);
        let excess = match occupancy_frames.checked_sub(target_frames) {
            Some(excess) if excess > 0 => excess,
            _ => return 0,
        };

        let rate = f64::from(drain_rate.min(1.0));
        let discard = (excess as f64 * rate).ceil() as usize;
        discard.min(excess).min(occupancy_frames)
    }

    /// Apply one quantum of drain control to `consumer`. Returns frames discarded.
    pub fn run(
        &self,
        consumer: &mut FrameConsumer,
        target_buffer_ms: i32,
        drain_rate: f32,
    ) -> usize {
        let occupancy = consumer.occupancy_frames();
        let discard = self.frames_to_discard(occupancy, target_buffer_ms, drain_rate);
        if discard == 0 {
            return 0;
        }
        consumer.discard(discard)
    }
}
