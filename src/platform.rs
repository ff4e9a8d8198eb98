use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, Host, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};
use log::debug;

use crate::device_router::{classify_device_name, AudioDevice, DeviceProvider};
use crate::error::BackendError;
use crate::stream::{Direction, TransportMode};

/// Capture data callback: receives one quantum of interleaved input samples
pub type CaptureCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;
/// Render data callback: fills one quantum of interleaved output samples
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;
/// Stream fault callback; may run on an audio thread, so must not block
pub type FaultCallback = Box<dyn FnMut(StreamFault) + Send + 'static>;

/// Asynchronous stream failures reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFault {
    /// The device was unplugged or otherwise went away
    Disconnected,
    Other,
}

/// What the engine asks the platform for, per direction
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub direction: Direction,
    /// Render only; `None` means the platform default output
    pub device_id: Option<i32>,
    /// `None` lets the platform pick its native rate
    pub sample_rate: Option<u32>,
    pub channels: u16,
    pub transport: TransportMode,
    /// Burst size to ask for on the low-latency transport
    pub burst_frames: u32,
}

/// What the platform agreed to provide
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedStream {
    pub direction: Direction,
    pub device_id: Option<i32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Transport the platform granted
    pub transport: TransportMode,
    pub frames_per_burst: Option<u32>,
    pub buffer_size_frames: Option<u32>,
    /// Latency measured by the platform itself, when it offers one
    pub reported_latency_ms: Option<f64>,
}

/// A built platform stream. Dropping it releases the stream.
pub trait PlatformStream {
    fn start(&mut self) -> Result<(), BackendError>;
    fn stop(&mut self) -> Result<(), BackendError>;
}

/// Stream factory for one audio platform.
///
/// Negotiation is a query with no side effects, so a refused low-latency
/// request can be retried on the legacy transport before any callback is
/// handed over.
pub trait AudioBackend: DeviceProvider {
    fn negotiate(&mut self, request: &StreamRequest) -> Result<NegotiatedStream, BackendError>;

    fn build_capture(
        &mut self,
        stream: &NegotiatedStream,
        data: CaptureCallback,
        faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError>;

    fn build_render(
        &mut self,
        stream: &NegotiatedStream,
        data: RenderCallback,
        faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError>;
}

/// Audio backend on top of CPAL.
///
/// Low-latency transport means a fixed callback buffer of the requested
/// burst size, clamped into what the device supports. Devices that don't
/// report a buffer range only get the legacy transport, where CPAL picks
/// its default buffering. Output device ids are enumeration indices.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::with_host(cpal::default_host())
    }

    pub fn with_host(host: Host) -> Self {
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    fn resolve_device(
        &self,
        direction: Direction,
        device_id: Option<i32>,
    ) -> Result<Device, BackendError> {
        match (direction, device_id) {
            (Direction::Capture, _) => self
                .host
                .default_input_device()
                .ok_or(BackendError::NoDevice(Direction::Capture)),
            (Direction::Render, None) => self
                .host
                .default_output_device()
                .ok_or(BackendError::NoDevice(Direction::Render)),
            (Direction::Render, Some(id)) => {
                let index = usize::try_from(id).map_err(|_| BackendError::DeviceNotFound(id))?;
                self.host
                    .output_devices()
                    .map_err(|e| BackendError::Backend(e.to_string()))?
                    .nth(index)
                    .ok_or(BackendError::DeviceNotFound(id))
            }
        }
    }

    fn stream_config(stream: &NegotiatedStream) -> StreamConfig {
        let buffer_size = match (stream.transport, stream.frames_per_burst) {
            (TransportMode::LowLatency, Some(frames)) => BufferSize::Fixed(frames),
            _ => BufferSize::Default,
        };

        StreamConfig {
            channels: stream.channels,
            sample_rate: SampleRate(stream.sample_rate),
            buffer_size,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for CpalBackend {
    fn output_devices(&self) -> Vec<AudioDevice> {
        self.host
            .output_devices()
            .map(|devices| {
                devices
                    .enumerate()
                    .map(|(index, device)| {
                        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                        let kind = classify_device_name(&name);
                        AudioDevice::new(index as i32, name, kind)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AudioBackend for CpalBackend {
    fn negotiate(&mut self, request: &StreamRequest) -> Result<NegotiatedStream, BackendError> {
        let device = self.resolve_device(request.direction, request.device_id)?;
        let default_config = match request.direction {
            Direction::Capture => device.default_input_config(),
            Direction::Render => device.default_output_config(),
        }
        .map_err(|e| BackendError::Backend(e.to_string()))?;

        let native_rate = default_config.sample_rate().0;
        let ranges = match request.direction {
            Direction::Capture => device
                .supported_input_configs()
                .map(|configs| rate_ranges(configs, request.channels)),
            Direction::Render => device
                .supported_output_configs()
                .map(|configs| rate_ranges(configs, request.channels)),
        }
        .map_err(|e| BackendError::Backend(e.to_string()))?;

        let sample_rate = pick_sample_rate(request.sample_rate, native_rate, &ranges).ok_or(
            BackendError::UnsupportedSampleRate {
                direction: request.direction,
                requested: request.sample_rate.unwrap_or(native_rate),
                native: native_rate,
            },
        )?;

        let frames_per_burst = match request.transport {
            TransportMode::Legacy => None,
            TransportMode::LowLatency => match default_config.buffer_size() {
                SupportedBufferSize::Range { min, max } => {
                    Some(request.burst_frames.clamp(*min, *max))
                }
                SupportedBufferSize::Unknown => {
                    return Err(BackendError::TransportRefused {
                        transport: TransportMode::LowLatency,
                        reason: "device does not report a fixed buffer range".to_string(),
                    });
                }
            },
        };

        Ok(NegotiatedStream {
            direction: request.direction,
            device_id: request.device_id,
            sample_rate,
            channels: request.channels,
            transport: request.transport,
            frames_per_burst,
            buffer_size_frames: frames_per_burst,
            reported_latency_ms: None,
        })
    }

    fn build_capture(
        &mut self,
        stream: &NegotiatedStream,
        mut data: CaptureCallback,
        mut faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError> {
        let device = self.resolve_device(Direction::Capture, stream.device_id)?;
        let config = Self::stream_config(stream);

        let stream = device
            .build_input_stream(
                &config,
                move |samples: &[f32], _: &cpal::InputCallbackInfo| data(samples),
                move |err| faults(fault_from_cpal(&err)),
                None,
            )
            .map_err(|e| BackendError::Build(e.to_string()))?;

        Ok(Box::new(CpalStream { stream }))
    }

    fn build_render(
        &mut self,
        stream: &NegotiatedStream,
        mut data: RenderCallback,
        mut faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError> {
        let device = self.resolve_device(Direction::Render, stream.device_id)?;
        let config = Self::stream_config(stream);

        let stream = device
            .build_output_stream(
                &config,
                move |samples: &mut [f32], _: &cpal::OutputCallbackInfo| data(samples),
                move |err| faults(fault_from_cpal(&err)),
                None,
            )
            .map_err(|e| BackendError::Build(e.to_string()))?;

        Ok(Box::new(CpalStream { stream }))
    }
}

/// Inclusive rate ranges for configs with `channels` channels. Hosts that
/// remap channels may list none with that count; then every config counts.
fn rate_ranges(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    channels: u16,
) -> Vec<(u32, u32)> {
    let configs: Vec<SupportedStreamConfigRange> = configs.collect();
    let matching = configs.iter().any(|config| config.channels() == channels);
    configs
        .iter()
        .filter(|config| !matching || config.channels() == channels)
        .map(|config| (config.min_sample_rate().0, config.max_sample_rate().0))
        .collect()
}

/// Rate a stream should run at, or `None` if `requested` isn't supported.
///
/// No request means the device's native rate. `ranges` holds the inclusive
/// rate ranges the device lists; an empty list means it didn't say, and any
/// request is taken at face value.
pub fn pick_sample_rate(requested: Option<u32>, native: u32, ranges: &[(u32, u32)]) -> Option<u32> {
    match requested {
        None => Some(native),
        Some(rate) if ranges.is_empty() => Some(rate),
        Some(rate) => ranges
            .iter()
            .any(|&(min, max)| (min..=max).contains(&rate))
            .then_some(rate),
    }
}

fn fault_from_cpal(err: &cpal::StreamError) -> StreamFault {
    match err {
        cpal::StreamError::DeviceNotAvailable => StreamFault::Disconnected,
        _ => StreamFault::Other,
    }
}

struct CpalStream {
    stream: Stream,
}

impl PlatformStream for CpalStream {
    fn start(&mut self) -> Result<(), BackendError> {
        self.stream.play().map_err(|e| BackendError::Start(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.stream.pause().map_err(|e| BackendError::Stop(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(transport: TransportMode, burst: Option<u32>) -> NegotiatedStream {
        NegotiatedStream {
            direction: Direction::Render,
            device_id: None,
            sample_rate: 48_000,
            channels: 2,
            transport,
            frames_per_burst: burst,
            buffer_size_frames: burst,
            reported_latency_ms: None,
        }
    }

    #[test]
    fn test_stream_config_uses_fixed_buffer_only_on_fast_path() {
        let fast = CpalBackend::stream_config(&negotiated(TransportMode::LowLatency, Some(192)));
        assert_eq!(fast.buffer_size, BufferSize::Fixed(192));
        assert_eq!(fast.sample_rate, SampleRate(48_000));
        assert_eq!(fast.channels, 2);

        let legacy = CpalBackend::stream_config(&negotiated(TransportMode::Legacy, None));
        assert_eq!(legacy.buffer_size, BufferSize::Default);
    }

    #[test]
    fn test_pick_sample_rate() {
        let mic = [(44_100, 44_100)];
        assert_eq!(pick_sample_rate(None, 44_100, &mic), Some(44_100));
        assert_eq!(pick_sample_rate(Some(44_100), 44_100, &mic), Some(44_100));
        assert_eq!(pick_sample_rate(Some(48_000), 44_100, &mic), None);

        let interface = [(8_000, 48_000), (88_200, 96_000)];
        assert_eq!(pick_sample_rate(Some(48_000), 44_100, &interface), Some(48_000));
        assert_eq!(pick_sample_rate(Some(64_000), 44_100, &interface), None);
        assert_eq!(pick_sample_rate(Some(96_000), 44_100, &interface), Some(96_000));

        // Nothing listed: trust the request
        assert_eq!(pick_sample_rate(Some(48_000), 44_100, &[]), Some(48_000));
    }

    #[test]
    fn test_cpal_faults_map_disconnects() {
        assert_eq!(
            fault_from_cpal(&cpal::StreamError::DeviceNotAvailable),
            StreamFault::Disconnected
        );
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_enumerate_output_devices() {
        let backend = CpalBackend::new();
        for device in backend.output_devices() {
            println!("{}", device);
        }
    }
}
