use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::AudioSettings;
use crate::error::{BackendError, OpenError};
use crate::gain::GainStage;
use crate::params::EngineParameters;
use crate::platform::{
    AudioBackend, FaultCallback, NegotiatedStream, PlatformStream, StreamFault, StreamRequest,
};
use crate::realtime_audio::{CaptureProcessor, RenderProcessor};
use crate::ring_buffer::{frame_ring, frames_for_ms};
use crate::telemetry::Telemetry;

/// Legacy capture paths buffer roughly one extra period internally
const LEGACY_CAPTURE_LATENCY_FACTOR: i32 = 2;
/// Legacy render paths add mixing and conversion stages on top of the buffer
const LEGACY_RENDER_LATENCY_FACTOR: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Capture,
    Render,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Capture => f.write_str("capture"),
            Direction::Render => f.write_str("render"),
        }
    }
}

/// Audio path between the application and the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Frames exchanged directly against a small hardware buffer
    LowLatency,
    /// Fallback path with extra buffering and looser scheduling
    Legacy,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::LowLatency => f.write_str("low-latency"),
            TransportMode::Legacy => f.write_str("legacy"),
        }
    }
}

/// Realized parameters of one open stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEndpoint {
    pub direction: Direction,
    pub device_id: Option<i32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback quantum, 0 if the platform didn't say
    pub frames_per_burst: u32,
    /// Hardware buffer depth, 0 if the platform didn't say
    pub buffer_size_frames: u32,
    pub transport: TransportMode,
    /// Latency estimate, -1 if unknown
    pub latency_ms: i32,
}

impl StreamEndpoint {
    /// Classify what the platform granted.
    ///
    /// A stream only counts as low-latency if the fast path was granted
    /// and its burst is shorter than `low_latency_burst_ms`.
    pub fn from_negotiated(stream: &NegotiatedStream, low_latency_burst_ms: f32) -> Self {
        let burst_ms = match (stream.frames_per_burst, stream.sample_rate) {
            (Some(frames), rate) if rate > 0 => Some(frames as f32 * 1000.0 / rate as f32),
            _ => None,
        };

        let transport = match (stream.transport, burst_ms) {
            (TransportMode::LowLatency, Some(ms)) if ms < low_latency_burst_ms => {
                TransportMode::LowLatency
            }
            _ => TransportMode::Legacy,
        };

        let latency_ms = estimate_latency_ms(
            stream.direction,
            transport,
            stream.reported_latency_ms,
            stream.buffer_size_frames,
            stream.sample_rate,
        );

        Self {
            direction: stream.direction,
            device_id: stream.device_id,
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            frames_per_burst: stream.frames_per_burst.unwrap_or(0),
            buffer_size_frames: stream.buffer_size_frames.unwrap_or(0),
            transport,
            latency_ms,
        }
    }
}

/// Platform-reported latency when available, otherwise buffer depth over
/// sample rate, scaled up for the extra buffering of legacy paths.
pub fn estimate_latency_ms(
    direction: Direction,
    transport: TransportMode,
    reported_ms: Option<f64>,
    buffer_size_frames: Option<u32>,
    sample_rate: u32,
) -> i32 {
    if let Some(ms) = reported_ms.filter(|ms| ms.is_finite() && *ms >= 0.0) {
        return ms as i32;
    }

    let frames = match buffer_size_frames {
        Some(frames) if sample_rate > 0 => frames,
        _ => return -1,
    };

    let buffer_ms = (u64::from(frames) * 1000 / u64::from(sample_rate)) as i32;
    match (transport, direction) {
        (TransportMode::LowLatency, _) => buffer_ms,
        (TransportMode::Legacy, Direction::Capture) => buffer_ms * LEGACY_CAPTURE_LATENCY_FACTOR,
        (TransportMode::Legacy, Direction::Render) => buffer_ms * LEGACY_RENDER_LATENCY_FACTOR,
    }
}

struct OpenStream {
    endpoint: StreamEndpoint,
    stream: Box<dyn PlatformStream>,
}

/// Outcome of one open attempt that didn't succeed
enum Attempt {
    /// The fast path negotiated fine but the stream wouldn't build
    RetryLegacy(Direction),
    /// Capture can't run at the render rate; `native` is the rate it can
    RateMismatch { native: u32, source: BackendError },
    Failed(OpenError),
}

#[derive(Debug, Clone, Copy)]
struct FastPath {
    capture: bool,
    render: bool,
}

/// The capture and render streams and the ring buffer between them.
///
/// The ring buffer halves live inside the two stream callbacks, so they are
/// released together with the streams on [`close`](Self::close).
pub struct StreamPair {
    settings: AudioSettings,
    params: Arc<EngineParameters>,
    telemetry: Arc<Telemetry>,
    capture: Option<OpenStream>,
    render: Option<OpenStream>,
}

impl StreamPair {
    pub fn new(
        settings: AudioSettings,
        params: Arc<EngineParameters>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            settings,
            params,
            telemetry,
            capture: None,
            render: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.capture.is_some() || self.render.is_some()
    }

    pub fn capture_endpoint(&self) -> Option<&StreamEndpoint> {
        self.capture.as_ref().map(|open| &open.endpoint)
    }

    pub fn render_endpoint(&self) -> Option<&StreamEndpoint> {
        self.render.as_ref().map(|open| &open.endpoint)
    }

    /// Open and start both streams.
    ///
    /// Render opens first, on `output_device` or the platform default, and
    /// its sample rate is then requested for capture. If the capture device
    /// can't run at that rate, both streams move to the capture device's
    /// native rate. Each direction tries the low-latency transport and
    /// quietly settles for legacy. Fails only if a direction can't be
    /// opened at all.
    pub fn open(
        &mut self,
        backend: &mut dyn AudioBackend,
        output_device: Option<i32>,
    ) -> Result<(), OpenError> {
        if self.is_open() {
            return Ok(());
        }

        let mut fast = FastPath { capture: true, render: true };
        loop {
            let err = match self.try_open(backend, output_device, fast) {
                Ok(()) => return Ok(()),
                Err(Attempt::RetryLegacy(direction)) => {
                    warn!(
                        "{} stream could not be built on the low-latency transport, \
                         retrying on legacy",
                        direction
                    );
                    match direction {
                        Direction::Capture => fast.capture = false,
                        Direction::Render => fast.render = false,
                    }
                    continue;
                }
                Err(Attempt::RateMismatch { source, .. }) => {
                    OpenError::DeviceUnavailable { direction: Direction::Capture, source }
                }
                Err(Attempt::Failed(err)) => err,
            };

            error!("Failed to open audio streams: {}", err);
            return Err(err);
        }
    }

    fn try_open(
        &mut self,
        backend: &mut dyn AudioBackend,
        output_device: Option<i32>,
        fast: FastPath,
    ) -> Result<(), Attempt> {
        let mut render =
            self.negotiate(backend, Direction::Render, output_device, None, fast.render)?;
        let capture_rate = Some(render.sample_rate);
        let capture =
            match self.negotiate(backend, Direction::Capture, None, capture_rate, fast.capture) {
                Err(Attempt::RateMismatch { native, .. }) => {
                    warn!(
                        "Capture device can't run at {} Hz, moving both streams to {} Hz",
                        render.sample_rate, native
                    );
                    render = self.negotiate(
                        backend,
                        Direction::Render,
                        output_device,
                        Some(native),
                        fast.render,
                    )?;
                    let capture_rate = Some(render.sample_rate);
                    self.negotiate(backend, Direction::Capture, None, capture_rate, fast.capture)?
                }
                other => other?,
            };

        let threshold_ms = self.settings.low_latency_burst_ms;
        let render_endpoint = StreamEndpoint::from_negotiated(&render, threshold_ms);
        let capture_endpoint = StreamEndpoint::from_negotiated(&capture, threshold_ms);

        self.telemetry.reset_session();

        let capacity = frames_for_ms(self.settings.ring_capacity_ms, render.sample_rate);
        let (producer, consumer) = frame_ring(capacity, capture.channels);
        let mut capture_processor = CaptureProcessor::new(producer, self.telemetry.clone());
        let mut render_processor = RenderProcessor::new(
            consumer,
            self.params.clone(),
            self.telemetry.clone(),
            render.sample_rate,
            render.channels,
            GainStage::new(self.settings.saturation),
        );

        let render_callback = Box::new(move |out: &mut [f32]| render_processor.process(out));
        let mut render_stream = backend
            .build_render(&render, render_callback, self.fault_callback())
            .map_err(|e| build_failure(&render, e))?;
        let capture_callback = Box::new(move |input: &[f32]| capture_processor.process(input));
        let mut capture_stream = backend
            .build_capture(&capture, capture_callback, self.fault_callback())
            .map_err(|e| build_failure(&capture, e))?;

        // Give capture a head start so the first render quantum finds data
        capture_stream.start().map_err(|source| {
            Attempt::Failed(OpenError::DeviceUnavailable { direction: Direction::Capture, source })
        })?;
        if self.settings.warmup_ms > 0 {
            thread::sleep(Duration::from_millis(self.settings.warmup_ms));
        }
        if let Err(source) = render_stream.start() {
            if let Err(e) = capture_stream.stop() {
                warn!("Error stopping capture stream after failed render start: {}", e);
            }
            return Err(Attempt::Failed(OpenError::DeviceUnavailable {
                direction: Direction::Render,
                source,
            }));
        }

        for endpoint in [&render_endpoint, &capture_endpoint] {
            info!(
                "{} stream opened: device={:?}, sampleRate={}, channels={}, framesPerBurst={}, \
                 bufferSize={}, transport={}, latency={}ms",
                endpoint.direction,
                endpoint.device_id,
                endpoint.sample_rate,
                endpoint.channels,
                endpoint.frames_per_burst,
                endpoint.buffer_size_frames,
                endpoint.transport,
                endpoint.latency_ms
            );
            if endpoint.transport == TransportMode::Legacy {
                warn!(
                    "{} stream is on the legacy transport; expect higher latency",
                    endpoint.direction
                );
            }
            self.telemetry.record_endpoint(endpoint);
        }
        info!("Ring buffer: {} frames ({}ms)", capacity, self.settings.ring_capacity_ms);
        self.telemetry.mark_open();

        self.render = Some(OpenStream { endpoint: render_endpoint, stream: render_stream });
        self.capture = Some(OpenStream { endpoint: capture_endpoint, stream: capture_stream });
        Ok(())
    }

    fn negotiate(
        &self,
        backend: &mut dyn AudioBackend,
        direction: Direction,
        device_id: Option<i32>,
        sample_rate: Option<u32>,
        allow_fast: bool,
    ) -> Result<NegotiatedStream, Attempt> {
        let channels = match direction {
            Direction::Capture => self.settings.input_channels,
            Direction::Render => self.settings.output_channels,
        };
        let transport = if allow_fast { TransportMode::LowLatency } else { TransportMode::Legacy };
        let mut request = StreamRequest {
            direction,
            device_id,
            sample_rate,
            channels,
            transport,
            burst_frames: self.settings.burst_frames,
        };

        loop {
            match backend.negotiate(&request) {
                Ok(stream) => return Ok(stream),
                Err(BackendError::DeviceNotFound(id)) if request.device_id.is_some() => {
                    warn!("Output device {} not found, falling back to the default output", id);
                    request.device_id = None;
                }
                Err(BackendError::UnsupportedSampleRate { direction: dir, requested, native }) => {
                    let source =
                        BackendError::UnsupportedSampleRate { direction: dir, requested, native };
                    return Err(match direction {
                        Direction::Capture => Attempt::RateMismatch { native, source },
                        Direction::Render => {
                            Attempt::Failed(OpenError::DeviceUnavailable { direction, source })
                        }
                    });
                }
                Err(e) if request.transport == TransportMode::LowLatency => {
                    warn!(
                        "{} low-latency transport unavailable ({}), falling back to legacy",
                        direction, e
                    );
                    request.transport = TransportMode::Legacy;
                }
                Err(source) => {
                    return Err(Attempt::Failed(OpenError::DeviceUnavailable { direction, source }));
                }
            }
        }
    }

    fn fault_callback(&self) -> FaultCallback {
        let telemetry = self.telemetry.clone();
        Box::new(move |fault: StreamFault| {
            telemetry.record_stream_error(fault == StreamFault::Disconnected);
        })
    }

    /// Stop both streams and release them with the ring buffer. No-op when closed.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }

        for open in [self.capture.take(), self.render.take()].into_iter().flatten() {
            let OpenStream { endpoint, mut stream } = open;
            if let Err(e) = stream.stop() {
                warn!("Error stopping {} stream: {}", endpoint.direction, e);
            }
        }

        self.telemetry.log_session();
        self.telemetry.mark_closed();
        info!("Streams closed");
    }
}

impl Drop for StreamPair {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_failure(stream: &NegotiatedStream, source: BackendError) -> Attempt {
    if stream.transport == TransportMode::LowLatency {
        Attempt::RetryLegacy(stream.direction)
    } else {
        Attempt::Failed(OpenError::DeviceUnavailable { direction: stream.direction, source })
    }
}
