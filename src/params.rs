use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

/// Lowest gain the control path may set
pub const MIN_GAIN: f32 = 3.0;
/// Highest gain the control path may set
pub const MAX_GAIN: f32 = 12.0;
/// Line-level instruments need boosting before most outputs are useful
pub const DEFAULT_GAIN: f32 = 8.0;
/// Upper bound for the drain target; 0 disables drain control
pub const MAX_TARGET_BUFFER_MS: i32 = 100;
pub const MIN_DRAIN_RATE: f32 = 0.0;
pub const MAX_DRAIN_RATE: f32 = 1.0;

const NO_DEVICE: i64 = i64::MIN;

/// Parameters shared between the control path and the audio callbacks.
///
/// Every field is its own lock-free cell. Writers (the control path) and
/// readers (the callbacks, once per quantum) never take a lock and never
/// see a torn value, but no consistency across fields is promised.
#[derive(Debug)]
pub struct EngineParameters {
    gain: AtomicCell<f32>,
    target_buffer_ms: AtomicI32,
    drain_rate: AtomicCell<f32>,
    output_device_id: AtomicI64,
    effect_on: AtomicBool,
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN, 0, 0.0)
    }
}

impl EngineParameters {
    /// Create parameters, clamping every value into its legal range
    pub fn new(gain: f32, target_buffer_ms: i32, drain_rate: f32) -> Self {
        Self {
            gain: AtomicCell::new(clamp_gain(gain)),
            target_buffer_ms: AtomicI32::new(clamp_target_buffer_ms(target_buffer_ms)),
            drain_rate: AtomicCell::new(clamp_drain_rate(drain_rate)),
            output_device_id: AtomicI64::new(NO_DEVICE),
            effect_on: AtomicBool::new(false),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Store the gain, clamped to [`MIN_GAIN`, `MAX_GAIN`]. Returns the stored value.
    pub fn set_gain(&self, gain: f32) -> f32 {
        let gain = clamp_gain(gain);
        self.gain.store(gain);
        gain
    }

    pub fn target_buffer_ms(&self) -> i32 {
        self.target_buffer_ms.load(Ordering::Relaxed)
    }

    /// Store the drain target, clamped to [0, `MAX_TARGET_BUFFER_MS`]. Returns the stored value.
    pub fn set_target_buffer_ms(&self, ms: i32) -> i32 {
        let ms = clamp_target_buffer_ms(ms);
        self.target_buffer_ms.store(ms, Ordering::Relaxed);
        ms
    }

    pub fn drain_rate(&self) -> f32 {
        self.drain_rate.load()
    }

    /// Store the drain rate, clamped to [0, 1]. Returns the stored value.
    pub fn set_drain_rate(&self, rate: f32) -> f32 {
        let rate = clamp_drain_rate(rate);
        self.drain_rate.store(rate);
        rate
    }

    pub fn output_device_id(&self) -> Option<i32> {
        match self.output_device_id.load(Ordering::Relaxed) {
            NO_DEVICE => None,
            id => Some(id as i32),
        }
    }

    pub fn set_output_device_id(&self, device_id: Option<i32>) {
        let raw = device_id.map(i64::from).unwrap_or(NO_DEVICE);
        self.output_device_id.store(raw, Ordering::Relaxed);
    }

    /// Whether the signal path is unmuted (engine `Running`)
    pub fn effect_on(&self) -> bool {
        self.effect_on.load(Ordering::Acquire)
    }

    pub(crate) fn set_effect_on(&self, on: bool) {
        self.effect_on.store(on, Ordering::Release);
    }
}

/// NaN maps to the quietest legal gain.
pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        return MIN_GAIN;
    }
    gain.clamp(MIN_GAIN, MAX_GAIN)
}

pub fn clamp_target_buffer_ms(ms: i32) -> i32 {
    ms.clamp(0, MAX_TARGET_BUFFER_MS)
}

/// NaN maps to 0 (no correction).
pub fn clamp_drain_rate(rate: f32) -> f32 {
    if rate.is_nan() {
        return MIN_DRAIN_RATE;
    }
    rate.clamp(MIN_DRAIN_RATE, MAX_DRAIN_RATE)
}
