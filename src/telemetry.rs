use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::ring_buffer::ms_for_frames;
use crate::stream::{Direction, StreamEndpoint, TransportMode};

/// Advisory status shared by the audio callbacks and the control path.
///
/// Endpoint fields are written on the control path when streams open and
/// close. Occupancy and the session counters are written by the callbacks
/// with relaxed stores; readers may see slightly stale values.
#[derive(Debug)]
pub struct Telemetry {
    streams_open: AtomicBool,
    sample_rate: AtomicU32,
    input_low_latency: AtomicBool,
    output_low_latency: AtomicBool,
    input_latency_ms: AtomicI32,
    output_latency_ms: AtomicI32,
    buffer_frames: AtomicU32,

    callbacks: AtomicU64,
    frames_captured: AtomicU64,
    frames_rendered: AtomicU64,
    overflow_frames: AtomicU64,
    underrun_frames: AtomicU64,
    drained_frames: AtomicU64,
    stream_errors: AtomicU64,
    disconnected: AtomicBool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            streams_open: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            input_low_latency: AtomicBool::new(false),
            output_low_latency: AtomicBool::new(false),
            input_latency_ms: AtomicI32::new(-1),
            output_latency_ms: AtomicI32::new(-1),
            buffer_frames: AtomicU32::new(0),
            callbacks: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            overflow_frames: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            drained_frames: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            disconnected: AtomicBool::new(false),
        }
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the session counters and flags ahead of a fresh open
    pub(crate) fn reset_session(&self) {
        self.buffer_frames.store(0, Ordering::Relaxed);
        self.callbacks.store(0, Ordering::Relaxed);
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_rendered.store(0, Ordering::Relaxed);
        self.overflow_frames.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.drained_frames.store(0, Ordering::Relaxed);
        self.stream_errors.store(0, Ordering::Relaxed);
        self.disconnected.store(false, Ordering::Relaxed);
    }

    pub(crate) fn record_endpoint(&self, endpoint: &StreamEndpoint) {
        let low_latency = endpoint.transport == TransportMode::LowLatency;
        match endpoint.direction {
            Direction::Capture => {
                self.input_low_latency.store(low_latency, Ordering::Relaxed);
                self.input_latency_ms.store(endpoint.latency_ms, Ordering::Relaxed);
            }
            Direction::Render => {
                self.output_low_latency.store(low_latency, Ordering::Relaxed);
                self.output_latency_ms.store(endpoint.latency_ms, Ordering::Relaxed);
                self.sample_rate.store(endpoint.sample_rate, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn mark_open(&self) {
        self.streams_open.store(true, Ordering::Release);
    }

    /// Forget everything endpoint-related; session counters survive for the log
    pub(crate) fn mark_closed(&self) {
        self.streams_open.store(false, Ordering::Release);
        self.sample_rate.store(0, Ordering::Relaxed);
        self.input_low_latency.store(false, Ordering::Relaxed);
        self.output_low_latency.store(false, Ordering::Relaxed);
        self.input_latency_ms.store(-1, Ordering::Relaxed);
        self.output_latency_ms.store(-1, Ordering::Relaxed);
        self.buffer_frames.store(0, Ordering::Relaxed);
    }

    // Callback-side recorders. Plain relaxed atomics only.

    #[inline]
    pub(crate) fn record_capture(&self, captured: usize, dropped: usize) {
        self.frames_captured.fetch_add(captured as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.overflow_frames.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_render(
        &self,
        rendered: usize,
        underrun: usize,
        drained: usize,
        occupancy_frames: usize,
    ) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.frames_rendered.fetch_add(rendered as u64, Ordering::Relaxed);
        if underrun > 0 {
            self.underrun_frames.fetch_add(underrun as u64, Ordering::Relaxed);
        }
        if drained > 0 {
            self.drained_frames.fetch_add(drained as u64, Ordering::Relaxed);
        }
        self.buffer_frames.store(occupancy_frames.min(u32::MAX as usize) as u32, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_stream_error(&self, disconnected: bool) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
        if disconnected {
            self.disconnected.store(true, Ordering::Release);
        }
    }

    pub fn streams_open(&self) -> bool {
        self.streams_open.load(Ordering::Acquire)
    }

    pub fn is_input_low_latency(&self) -> bool {
        self.input_low_latency.load(Ordering::Relaxed)
    }

    pub fn is_output_low_latency(&self) -> bool {
        self.output_low_latency.load(Ordering::Relaxed)
    }

    /// Capture latency estimate in ms, -1 when unknown or closed
    pub fn input_latency_ms(&self) -> i32 {
        self.input_latency_ms.load(Ordering::Relaxed)
    }

    /// Render latency estimate in ms, -1 when unknown or closed
    pub fn output_latency_ms(&self) -> i32 {
        self.output_latency_ms.load(Ordering::Relaxed)
    }

    pub fn buffer_frames(&self) -> usize {
        self.buffer_frames.load(Ordering::Relaxed) as usize
    }

    /// Queued audio in whole ms, -1 when no stream is open
    pub fn current_buffer_ms(&self) -> i32 {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        if !self.streams_open() || sample_rate == 0 {
            return -1;
        }
        ms_for_frames(self.buffer_frames(), sample_rate)
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn session_stats(&self) -> SessionStats {
        SessionStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            overflow_frames: self.overflow_frames.load(Ordering::Relaxed),
            underrun_frames: self.underrun_frames.load(Ordering::Relaxed),
            drained_frames: self.drained_frames.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            streams_open: self.streams_open(),
            sample_rate: self.sample_rate.load(Ordering::Relaxed),
            input_low_latency: self.is_input_low_latency(),
            output_low_latency: self.is_output_low_latency(),
            input_latency_ms: self.input_latency_ms(),
            output_latency_ms: self.output_latency_ms(),
            current_buffer_ms: self.current_buffer_ms(),
            stats: self.session_stats(),
        }
    }

    pub(crate) fn log_session(&self) {
        let stats = self.session_stats();
        info!(
            "Session stats: callbacks={}, captured={}, rendered={}, drained={}, \
             overflow={}, underrun={}, errors={}",
            stats.callbacks,
            stats.frames_captured,
            stats.frames_rendered,
            stats.drained_frames,
            stats.overflow_frames,
            stats.underrun_frames,
            stats.stream_errors
        );
    }
}

/// Counters accumulated since the streams were last opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub callbacks: u64,
    pub frames_captured: u64,
    pub frames_rendered: u64,
    /// Captured frames thrown away because the queue was full
    pub overflow_frames: u64,
    /// Rendered frames filled with silence because the queue ran dry
    pub underrun_frames: u64,
    /// Frames discarded by drain control
    pub drained_frames: u64,
    pub stream_errors: u64,
}

/// Point-in-time copy of [`Telemetry`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub streams_open: bool,
    pub sample_rate: u32,
    pub input_low_latency: bool,
    pub output_low_latency: bool,
    pub input_latency_ms: i32,
    pub output_latency_ms: i32,
    pub current_buffer_ms: i32,
    pub stats: SessionStats,
}
