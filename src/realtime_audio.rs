//! The work done inside the two audio callbacks.
//!
//! Everything here runs on real-time threads: no locks, no allocation, no
//! logging. All buffers are sized when the streams open. Parameters are
//! read once at the start of each quantum; status goes out through
//! [`Telemetry`] atomics.

use std::sync::Arc;

use crate::drain::DrainController;
use crate::gain::GainStage;
use crate::params::EngineParameters;
use crate::ring_buffer::{FrameConsumer, FrameProducer};
use crate::telemetry::Telemetry;

/// Largest render quantum handled in a single pass; bigger callbacks are
/// processed in chunks of this size.
pub const MAX_CHUNK_FRAMES: usize = 4096;

/// Capture side: moves each input quantum into the ring buffer
pub struct CaptureProcessor {
    producer: FrameProducer,
    telemetry: Arc<Telemetry>,
}

impl CaptureProcessor {
    pub fn new(producer: FrameProducer, telemetry: Arc<Telemetry>) -> Self {
        Self { producer, telemetry }
    }

    /// Queue one quantum of interleaved capture samples. Frames that don't
    /// fit are dropped; the capture thread never waits for the renderer.
    pub fn process(&mut self, input: &[f32]) {
        let offered = input.len() / self.producer.channels();
        let written = self.producer.write(input);
        self.telemetry.record_capture(written, offered - written);
    }
}

/// Render side: drain control, gain, channel mapping and silence fill
pub struct RenderProcessor {
    consumer: FrameConsumer,
    params: Arc<EngineParameters>,
    telemetry: Arc<Telemetry>,
    drain: DrainController,
    gain: GainStage,
    output_channels: usize,
    scratch: Vec<f32>,
}

impl RenderProcessor {
    pub fn new(
        consumer: FrameConsumer,
        params: Arc<EngineParameters>,
        telemetry: Arc<Telemetry>,
        sample_rate: u32,
        output_channels: u16,
        gain: GainStage,
    ) -> Self {
        let scratch = vec![0.0; MAX_CHUNK_FRAMES * consumer.channels()];
        Self {
            consumer,
            params,
            telemetry,
            drain: DrainController::new(sample_rate),
            gain,
            output_channels: usize::from(output_channels.max(1)),
            scratch,
        }
    }

    /// Produce one quantum of interleaved output.
    pub fn process(&mut self, output: &mut [f32]) {
        let frames = output.len() / self.output_channels;

        if !self.params.effect_on() {
            // Muted: empty the queue so unmuting starts from a fresh buffer
            self.consumer.discard(self.consumer.occupancy_frames());
            output.fill(0.0);
            self.telemetry.record_render(frames, 0, 0, self.consumer.occupancy_frames());
            return;
        }

        let gain = self.params.gain();
        let drained = self.drain.run(
            &mut self.consumer,
            self.params.target_buffer_ms(),
            self.params.drain_rate(),
        );

        let input_channels = self.consumer.channels();
        let mut done = 0;
        let mut underrun = 0;

        while done < frames {
            let chunk = (frames - done).min(MAX_CHUNK_FRAMES);
            let read = self.consumer.read(&mut self.scratch[..chunk * input_channels]);

            let span = done * self.output_channels..(done + chunk) * self.output_channels;
            let out = &mut output[span];
            self.map_channels(read, out, gain);

            if read < chunk {
                out[read * self.output_channels..].fill(0.0);
                underrun += frames - done - read;
                done = frames;
            } else {
                done += chunk;
            }
        }

        // Trailing samples that don't form a whole frame
        output[frames * self.output_channels..].fill(0.0);

        self.telemetry
            .record_render(frames, underrun, drained, self.consumer.occupancy_frames());
    }

    fn map_channels(&self, frames: usize, out: &mut [f32], gain: f32) {
        let input_channels = self.consumer.channels();
        let output_channels = self.output_channels;
        let input = &self.scratch[..frames * input_channels];

        if input_channels == 1 {
            // Mono source on every output channel
            for (frame, &sample) in out.chunks_exact_mut(output_channels).zip(input.iter()) {
                frame.fill(self.gain.process_sample(sample, gain));
            }
        } else if input_channels == output_channels {
            for (dst, &src) in out.iter_mut().zip(input.iter()) {
                *dst = self.gain.process_sample(src, gain);
            }
        } else {
            out[..frames * output_channels].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::SaturationMode;
    use crate::ring_buffer::{frame_ring, ms_for_frames};

    const RATE: u32 = 48_000;

    type Pipeline = (CaptureProcessor, RenderProcessor, Arc<EngineParameters>, Arc<Telemetry>);

    fn pipeline(input_channels: u16, output_channels: u16) -> Pipeline {
        let params = Arc::new(EngineParameters::new(4.0, 0, 0.0));
        let telemetry = Arc::new(Telemetry::new());
        let (producer, consumer) = frame_ring(24_000, input_channels);
        let capture = CaptureProcessor::new(producer, telemetry.clone());
        let render = RenderProcessor::new(
            consumer,
            params.clone(),
            telemetry.clone(),
            RATE,
            output_channels,
            GainStage::new(SaturationMode::Hard),
        );
        (capture, render, params, telemetry)
    }

    #[test]
    fn test_muted_render_is_silent_and_consumes() {
        let (mut capture, mut render, _params, telemetry) = pipeline(1, 2);
        capture.process(&[0.1; 480]);

        let mut out = vec![1.0f32; 2 * 240];
        render.process(&mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(telemetry.buffer_frames(), 0);
    }

    #[test]
    fn test_mono_is_fanned_out_with_gain() {
        let (mut capture, mut render, params, _telemetry) = pipeline(1, 2);
        params.set_effect_on(true);
        capture.process(&[0.05, -0.1, 0.2]);

        let mut out = vec![0.0f32; 6];
        render.process(&mut out);
        let expected = [0.2, 0.2, -0.4, -0.4, 0.8, 0.8];
        for (actual, expected) in out.iter().zip(expected.iter()) {
            assert!((actual - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_matching_channels_copy_through() {
        let (mut capture, mut render, params, _telemetry) = pipeline(2, 2);
        params.set_effect_on(true);
        params.set_gain(3.0);
        capture.process(&[0.25, -0.25]);

        let mut out = vec![0.0f32; 2];
        render.process(&mut out);
        assert_eq!(out, vec![0.75, -0.75]);
    }

    #[test]
    fn test_unsupported_layout_renders_silence() {
        let (mut capture, mut render, params, _telemetry) = pipeline(2, 6);
        params.set_effect_on(true);
        capture.process(&[0.5; 8]);

        let mut out = vec![1.0f32; 6 * 4];
        render.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_underrun_fills_silence_and_is_counted() {
        let (mut capture, mut render, params, telemetry) = pipeline(1, 1);
        params.set_effect_on(true);
        capture.process(&[0.1; 10]);

        let mut out = vec![1.0f32; 16];
        render.process(&mut out);

        assert!(out[..10].iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(out[10..].iter().all(|&s| s == 0.0));
        assert_eq!(telemetry.session_stats().underrun_frames, 6);
    }

    #[test]
    fn test_overflow_is_counted() {
        let telemetry = Arc::new(Telemetry::new());
        let (producer, _consumer) = frame_ring(8, 1);
        let mut capture = CaptureProcessor::new(producer, telemetry.clone());

        capture.process(&[0.0; 12]);
        let stats = telemetry.session_stats();
        assert_eq!(stats.frames_captured, 8);
        assert_eq!(stats.overflow_frames, 4);
    }

    #[test]
    fn test_drain_runs_before_reading() {
        let (mut capture, mut render, params, telemetry) = pipeline(1, 2);
        params.set_effect_on(true);
        params.set_target_buffer_ms(50);
        params.set_drain_rate(0.5);
        capture.process(&vec![0.0; 3_840]);

        let mut out = vec![0.0f32; 2 * 240];
        render.process(&mut out);

        let stats = telemetry.session_stats();
        assert_eq!(stats.drained_frames, 720);
        assert_eq!(ms_for_frames(telemetry.buffer_frames(), RATE), 60);
    }

    #[test]
    fn test_large_quantum_is_processed_in_chunks() {
        let (mut capture, mut render, params, telemetry) = pipeline(1, 1);
        params.set_effect_on(true);
        params.set_gain(3.0);
        let frames = MAX_CHUNK_FRAMES * 2 + 10;
        capture.process(&vec![0.25; frames]);

        let mut out = vec![0.0f32; frames];
        render.process(&mut out);
        assert!(out.iter().all(|&s| s == 0.75));
        assert_eq!(telemetry.session_stats().underrun_frames, 0);
        assert_eq!(telemetry.buffer_frames(), 0);
    }
}
