//! In-process audio backend with no hardware behind it.
//!
//! Streams built here never run on their own. A [`MockHandle`] drives them:
//! it pushes capture quanta and pulls render quanta on whatever thread the
//! caller likes, which makes the engine fully deterministic under test.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::device_router::{AudioDevice, DeviceKind, DeviceProvider};
use crate::error::BackendError;
use crate::platform::{
    pick_sample_rate, AudioBackend, CaptureCallback, FaultCallback, NegotiatedStream,
    PlatformStream, RenderCallback, StreamFault, StreamRequest,
};
use crate::stream::{Direction, TransportMode};

pub const MOCK_SAMPLE_RATE: u32 = 48_000;
/// 2ms at 48kHz
pub const MOCK_FAST_BURST_FRAMES: u32 = 96;
/// 20ms at 48kHz
pub const MOCK_LEGACY_BURST_FRAMES: u32 = 960;

struct Slot<F> {
    id: u64,
    stream: NegotiatedStream,
    running: bool,
    data: F,
    faults: FaultCallback,
}

#[derive(Default)]
struct Shared {
    next_id: u64,
    capture: Option<Slot<CaptureCallback>>,
    render: Option<Slot<RenderCallback>>,
    requests: Vec<StreamRequest>,
    builds: usize,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable [`AudioBackend`]
pub struct MockBackend {
    devices: Vec<AudioDevice>,
    sample_rate: u32,
    capture_rate: Option<u32>,
    fast_burst_frames: u32,
    refused: Vec<Direction>,
    broken_fast_build: Vec<Direction>,
    broken_start: Vec<Direction>,
    unavailable: Vec<Direction>,
    shared: Arc<Mutex<Shared>>,
}

impl MockBackend {
    /// One built-in speaker at id 0, everything else works
    pub fn new() -> Self {
        Self {
            devices: vec![AudioDevice::new(0, "Mock Speaker", DeviceKind::BuiltIn)],
            sample_rate: MOCK_SAMPLE_RATE,
            capture_rate: None,
            fast_burst_frames: MOCK_FAST_BURST_FRAMES,
            refused: Vec::new(),
            broken_fast_build: Vec::new(),
            broken_start: Vec::new(),
            unavailable: Vec::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn with_devices(mut self, devices: Vec<AudioDevice>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Capture device that only runs at `sample_rate`
    pub fn with_capture_rate(mut self, sample_rate: u32) -> Self {
        self.capture_rate = Some(sample_rate);
        self
    }

    /// Burst granted on the low-latency transport
    pub fn with_fast_burst(mut self, frames: u32) -> Self {
        self.fast_burst_frames = frames;
        self
    }

    /// Refuse the low-latency transport at negotiation
    pub fn refuse_low_latency(mut self, direction: Direction) -> Self {
        self.refused.push(direction);
        self
    }

    /// Negotiate the low-latency transport but fail to build it
    pub fn break_low_latency_build(mut self, direction: Direction) -> Self {
        self.broken_fast_build.push(direction);
        self
    }

    /// Build streams in `direction` that refuse to start
    pub fn break_start(mut self, direction: Direction) -> Self {
        self.broken_start.push(direction);
        self
    }

    /// No device at all in this direction
    pub fn without(mut self, direction: Direction) -> Self {
        self.unavailable.push(direction);
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle { shared: self.shared.clone() }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for MockBackend {
    fn output_devices(&self) -> Vec<AudioDevice> {
        self.devices.clone()
    }
}

impl AudioBackend for MockBackend {
    fn negotiate(&mut self, request: &StreamRequest) -> Result<NegotiatedStream, BackendError> {
        lock(&self.shared).requests.push(request.clone());

        if self.unavailable.contains(&request.direction) {
            return Err(BackendError::NoDevice(request.direction));
        }
        if let Some(id) = request.device_id {
            if !self.devices.iter().any(|device| device.id == id) {
                return Err(BackendError::DeviceNotFound(id));
            }
        }
        let fast = request.transport == TransportMode::LowLatency;
        if fast && self.refused.contains(&request.direction) {
            return Err(BackendError::TransportRefused {
                transport: TransportMode::LowLatency,
                reason: "exclusive mode unavailable".to_string(),
            });
        }

        let sample_rate = match (request.direction, self.capture_rate) {
            (Direction::Capture, Some(native)) => {
                pick_sample_rate(request.sample_rate, native, &[(native, native)]).ok_or(
                    BackendError::UnsupportedSampleRate {
                        direction: request.direction,
                        requested: request.sample_rate.unwrap_or(native),
                        native,
                    },
                )?
            }
            _ => request.sample_rate.unwrap_or(self.sample_rate),
        };

        let (burst, buffer) = match request.transport {
            TransportMode::LowLatency => (self.fast_burst_frames, self.fast_burst_frames),
            TransportMode::Legacy => (MOCK_LEGACY_BURST_FRAMES, MOCK_LEGACY_BURST_FRAMES * 2),
        };

        Ok(NegotiatedStream {
            direction: request.direction,
            device_id: request.device_id,
            sample_rate,
            channels: request.channels,
            transport: request.transport,
            frames_per_burst: Some(burst),
            buffer_size_frames: Some(buffer),
            reported_latency_ms: None,
        })
    }

    fn build_capture(
        &mut self,
        stream: &NegotiatedStream,
        data: CaptureCallback,
        faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError> {
        self.check_build(stream)?;
        let mut shared = lock(&self.shared);
        let id = shared.allocate_id();
        shared.capture = Some(Slot { id, stream: stream.clone(), running: false, data, faults });
        Ok(self.stream_handle(Direction::Capture, id))
    }

    fn build_render(
        &mut self,
        stream: &NegotiatedStream,
        data: RenderCallback,
        faults: FaultCallback,
    ) -> Result<Box<dyn PlatformStream>, BackendError> {
        self.check_build(stream)?;
        let mut shared = lock(&self.shared);
        let id = shared.allocate_id();
        shared.render = Some(Slot { id, stream: stream.clone(), running: false, data, faults });
        Ok(self.stream_handle(Direction::Render, id))
    }
}

impl MockBackend {
    fn stream_handle(&self, direction: Direction, id: u64) -> Box<dyn PlatformStream> {
        Box::new(MockStream {
            shared: self.shared.clone(),
            direction,
            id,
            start_fails: self.broken_start.contains(&direction),
        })
    }

    fn check_build(&self, stream: &NegotiatedStream) -> Result<(), BackendError> {
        let fast = stream.transport == TransportMode::LowLatency;
        if fast && self.broken_fast_build.contains(&stream.direction) {
            return Err(BackendError::Build("low-latency stream rejected by mock".to_string()));
        }
        Ok(())
    }
}

impl Shared {
    fn allocate_id(&mut self) -> u64 {
        self.builds += 1;
        self.next_id += 1;
        self.next_id
    }

    fn set_running(&mut self, direction: Direction, id: u64, running: bool) -> bool {
        let slot_running = match direction {
            Direction::Capture => {
                self.capture.as_mut().filter(|slot| slot.id == id).map(|slot| &mut slot.running)
            }
            Direction::Render => {
                self.render.as_mut().filter(|slot| slot.id == id).map(|slot| &mut slot.running)
            }
        };
        match slot_running {
            Some(flag) => {
                *flag = running;
                true
            }
            None => false,
        }
    }

    fn release(&mut self, direction: Direction, id: u64) {
        match direction {
            Direction::Capture if self.capture.as_ref().is_some_and(|slot| slot.id == id) => {
                self.capture = None
            }
            Direction::Render if self.render.as_ref().is_some_and(|slot| slot.id == id) => {
                self.render = None
            }
            _ => {}
        }
    }
}

struct MockStream {
    shared: Arc<Mutex<Shared>>,
    direction: Direction,
    id: u64,
    start_fails: bool,
}

impl PlatformStream for MockStream {
    fn start(&mut self) -> Result<(), BackendError> {
        if self.start_fails {
            return Err(BackendError::Start("start rejected by mock".to_string()));
        }
        if lock(&self.shared).set_running(self.direction, self.id, true) {
            Ok(())
        } else {
            Err(BackendError::Start("stream released".to_string()))
        }
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        if lock(&self.shared).set_running(self.direction, self.id, false) {
            Ok(())
        } else {
            Err(BackendError::Stop("stream released".to_string()))
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        lock(&self.shared).release(self.direction, self.id);
    }
}

/// Drives the streams of a [`MockBackend`]. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    /// Deliver one capture quantum. Returns false if no capture stream is running.
    pub fn push_capture(&self, samples: &[f32]) -> bool {
        let mut shared = lock(&self.shared);
        match shared.capture.as_mut() {
            Some(slot) if slot.running => {
                (slot.data)(samples);
                true
            }
            _ => false,
        }
    }

    /// Request one render quantum of `frames` frames, interleaved.
    /// `None` if no render stream is running.
    pub fn pull_render(&self, frames: usize) -> Option<Vec<f32>> {
        let mut shared = lock(&self.shared);
        match shared.render.as_mut() {
            Some(slot) if slot.running => {
                let mut out = vec![0.0; frames * usize::from(slot.stream.channels)];
                (slot.data)(&mut out);
                Some(out)
            }
            _ => None,
        }
    }

    /// Report a fault on the stream in `direction`, as a platform would from
    /// its error callback. Returns false if there is no such stream.
    pub fn inject_fault(&self, direction: Direction, fault: StreamFault) -> bool {
        let mut shared = lock(&self.shared);
        let faults = match direction {
            Direction::Capture => shared.capture.as_mut().map(|slot| &mut slot.faults),
            Direction::Render => shared.render.as_mut().map(|slot| &mut slot.faults),
        };
        match faults {
            Some(faults) => {
                faults(fault);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, direction: Direction) -> bool {
        let shared = lock(&self.shared);
        match direction {
            Direction::Capture => shared.capture.as_ref().is_some_and(|slot| slot.running),
            Direction::Render => shared.render.as_ref().is_some_and(|slot| slot.running),
        }
    }

    /// Whether a stream in `direction` is built and not yet released
    pub fn is_built(&self, direction: Direction) -> bool {
        let shared = lock(&self.shared);
        match direction {
            Direction::Capture => shared.capture.is_some(),
            Direction::Render => shared.render.is_some(),
        }
    }

    /// Parameters the live stream in `direction` was built with
    pub fn stream(&self, direction: Direction) -> Option<NegotiatedStream> {
        let shared = lock(&self.shared);
        match direction {
            Direction::Capture => shared.capture.as_ref().map(|slot| slot.stream.clone()),
            Direction::Render => shared.render.as_ref().map(|slot| slot.stream.clone()),
        }
    }

    /// Every negotiation request seen so far, oldest first
    pub fn requests(&self) -> Vec<StreamRequest> {
        lock(&self.shared).requests.clone()
    }

    /// Number of streams built so far
    pub fn builds(&self) -> usize {
        lock(&self.shared).builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(direction: Direction, transport: TransportMode) -> StreamRequest {
        StreamRequest {
            direction,
            device_id: None,
            sample_rate: None,
            channels: 1,
            transport,
            burst_frames: 192,
        }
    }

    #[test]
    fn test_negotiation_rules() {
        let mut backend = MockBackend::new().refuse_low_latency(Direction::Capture);

        let render =
            backend.negotiate(&request(Direction::Render, TransportMode::LowLatency)).unwrap();
        assert_eq!(render.frames_per_burst, Some(MOCK_FAST_BURST_FRAMES));
        assert_eq!(render.sample_rate, MOCK_SAMPLE_RATE);

        assert!(matches!(
            backend.negotiate(&request(Direction::Capture, TransportMode::LowLatency)),
            Err(BackendError::TransportRefused { .. })
        ));
        let legacy =
            backend.negotiate(&request(Direction::Capture, TransportMode::Legacy)).unwrap();
        assert_eq!(legacy.buffer_size_frames, Some(MOCK_LEGACY_BURST_FRAMES * 2));

        let mut missing = request(Direction::Render, TransportMode::Legacy);
        missing.device_id = Some(42);
        assert_eq!(backend.negotiate(&missing), Err(BackendError::DeviceNotFound(42)));
        assert_eq!(backend.handle().requests().len(), 4);
    }

    #[test]
    fn test_streams_only_run_between_start_and_stop() {
        let mut backend = MockBackend::new();
        let handle = backend.handle();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let negotiated =
            backend.negotiate(&request(Direction::Capture, TransportMode::Legacy)).unwrap();
        let mut stream = backend
            .build_capture(
                &negotiated,
                Box::new(move |samples: &[f32]| {
                    counter.fetch_add(samples.len(), Ordering::Relaxed);
                }),
                Box::new(|_| {}),
            )
            .unwrap();

        assert!(!handle.push_capture(&[0.0; 8]));
        stream.start().unwrap();
        assert!(handle.push_capture(&[0.0; 8]));
        stream.stop().unwrap();
        assert!(!handle.push_capture(&[0.0; 8]));
        assert_eq!(seen.load(Ordering::Relaxed), 8);

        drop(stream);
        assert!(!handle.is_built(Direction::Capture));
    }
}
