//! Lock-free single-producer/single-consumer frame queue.
//!
//! Wraps a `ringbuf` heap buffer of interleaved `f32` samples and only ever
//! moves whole frames, so the two halves can never disagree about channel
//! alignment. The producer half lives in the capture callback, the consumer
//! half in the render callback; neither operation blocks or allocates.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a matched producer/consumer pair holding `capacity_frames` frames
/// of `channels` interleaved samples each.
pub fn frame_ring(capacity_frames: usize, channels: u16) -> (FrameProducer, FrameConsumer) {
    let channels = usize::from(channels.max(1));
    let capacity_frames = capacity_frames.max(1);
    let rb = HeapRb::<f32>::new(capacity_frames * channels);
    let (producer, consumer) = rb.split();

    (
        FrameProducer { inner: producer, channels, capacity_frames },
        FrameConsumer { inner: consumer, channels, capacity_frames },
    )
}

/// Write half, owned by the capture thread
pub struct FrameProducer {
    inner: HeapProd<f32>,
    channels: usize,
    capacity_frames: usize,
}

impl FrameProducer {
    /// Append as many whole frames of `samples` as fit.
    ///
    /// Frames that do not fit are dropped; a trailing partial frame is
    /// ignored. Returns the number of frames written.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let offered = samples.len() / self.channels;
        let room = self.inner.vacant_len() / self.channels;
        let frames = offered.min(room);
        if frames > 0 {
            self.inner.push_slice(&samples[..frames * self.channels]);
        }
        frames
    }

    pub fn occupancy_frames(&self) -> usize {
        (self.inner.occupied_len() / self.channels).min(self.capacity_frames)
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Read half, owned by the render thread
pub struct FrameConsumer {
    inner: HeapCons<f32>,
    channels: usize,
    capacity_frames: usize,
}

impl FrameConsumer {
    /// Fill `out` with up to `out.len() / channels` frames.
    ///
    /// Returns the number of frames copied. On shortfall the tail of `out`
    /// is left untouched; the caller decides what silence looks like.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let wanted = out.len() / self.channels;
        let frames = wanted.min(self.occupancy_frames());
        if frames > 0 {
            self.inner.pop_slice(&mut out[..frames * self.channels]);
        }
        frames
    }

    /// Drop up to `frames` of the oldest frames. Returns how many were dropped.
    pub fn discard(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.occupancy_frames());
        if frames > 0 {
            self.inner.skip(frames * self.channels);
        }
        frames
    }

    /// Frames currently queued, in [0, capacity]. May be stale by the time
    /// the caller looks at it if the producer is running.
    pub fn occupancy_frames(&self) -> usize {
        (self.inner.occupied_len() / self.channels).min(self.capacity_frames)
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Number of frames needed to hold `ms` milliseconds at `sample_rate`
pub fn frames_for_ms(ms: u32, sample_rate: u32) -> usize {
    (u64::from(ms) * u64::from(sample_rate) / 1000) as usize
}

/// Whole milliseconds represented by `frames` at `sample_rate`
pub fn ms_for_frames(frames: usize, sample_rate: u32) -> i32 {
    if sample_rate == 0 {
        return 0;
    }
    (frames as u64 * 1000 / u64::from(sample_rate)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_preserves_order() {
        let (mut producer, mut consumer) = frame_ring(8, 2);
        assert_eq!(producer.write(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]), 3);
        assert_eq!(consumer.occupancy_frames(), 3);

        let mut out = [0.0f32; 4];
        assert_eq!(consumer.read(&mut out), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);
        assert_eq!(consumer.occupancy_frames(), 1);
    }

    #[test]
    fn test_write_drops_what_does_not_fit() {
        let (mut producer, consumer) = frame_ring(4, 1);
        assert_eq!(producer.write(&[0.1; 3]), 3);
        assert_eq!(producer.write(&[0.2; 3]), 1);
        assert_eq!(producer.write(&[0.3; 3]), 0);
        assert_eq!(consumer.occupancy_frames(), 4);
        assert_eq!(producer.occupancy_frames(), producer.capacity_frames());
    }

    #[test]
    fn test_partial_frames_are_ignored() {
        let (mut producer, consumer) = frame_ring(4, 2);
        assert_eq!(producer.write(&[0.5, 0.5, 0.5]), 1);
        assert_eq!(consumer.occupancy_frames(), 1);
    }

    #[test]
    fn test_short_read_leaves_tail_untouched() {
        let (mut producer, mut consumer) = frame_ring(4, 1);
        producer.write(&[0.25]);
        let mut out = [9.0f32; 3];
        assert_eq!(consumer.read(&mut out), 1);
        assert_eq!(out, [0.25, 9.0, 9.0]);
    }

    #[test]
    fn test_discard_is_bounded_by_occupancy() {
        let (mut producer, mut consumer) = frame_ring(16, 2);
        producer.write(&[0.0; 20]);
        assert_eq!(consumer.discard(4), 4);
        assert_eq!(consumer.occupancy_frames(), 6);
        assert_eq!(consumer.discard(100), 6);
        assert_eq!(consumer.occupancy_frames(), 0);
        assert_eq!(consumer.discard(1), 0);
    }

    #[test]
    fn test_discard_drops_oldest_frames() {
        let (mut producer, mut consumer) = frame_ring(8, 1);
        producer.write(&[1.0, 2.0, 3.0, 4.0]);
        consumer.discard(3);
        let mut out = [0.0f32; 1];
        consumer.read(&mut out);
        assert_eq!(out[0], 4.0);
    }

    #[test]
    fn test_ms_frame_conversions() {
        assert_eq!(frames_for_ms(20, 48_000), 960);
        assert_eq!(frames_for_ms(500, 44_100), 22_050);
        assert_eq!(ms_for_frames(3_840, 48_000), 80);
        assert_eq!(ms_for_frames(100, 48_000), 2);
        assert_eq!(ms_for_frames(100, 0), 0);
    }
}
