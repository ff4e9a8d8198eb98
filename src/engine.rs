use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::config::{EngineConfig, InterruptionPolicy, LatencyPreset};
use crate::device_router::{select_output_device, AudioDevice};
use crate::params::EngineParameters;
use crate::platform::AudioBackend;
use crate::stream::{StreamEndpoint, StreamPair};
use crate::telemetry::{Telemetry, TelemetrySnapshot};

/// Lifecycle of a [`PassthroughEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No streams
    Uninitialized,
    /// Streams open and running, output muted
    Created,
    /// Streams open, passthrough audible
    Running,
    /// Streams open, muted after having run
    Stopped,
}

impl EngineState {
    /// Whether the stream pair is open
    pub fn is_live(self) -> bool {
        self != EngineState::Uninitialized
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Created => "created",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Audio focus changes reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Another app needs audio briefly (a notification, a call ringing)
    TransientLoss,
    /// Another app took audio for good
    Loss,
    /// Audio is ours again
    Gain,
}

/// Live instrument passthrough: capture on the default input, render on the
/// selected output, with gain and drain control in between.
///
/// Lifecycle calls take `&mut self` and run on the control path. Parameter
/// setters are lock-free and take effect on the next render quantum.
pub struct PassthroughEngine {
    backend: Box<dyn AudioBackend>,
    config: EngineConfig,
    params: Arc<EngineParameters>,
    telemetry: Arc<Telemetry>,
    streams: StreamPair,
    state: EngineState,
    muted_by_interruption: bool,
}

impl PassthroughEngine {
    pub fn new(backend: Box<dyn AudioBackend>, config: EngineConfig) -> Result<Self> {
        config.validate().context("Invalid engine configuration")?;

        let params = Arc::new(config.to_parameters());
        let telemetry = Arc::new(Telemetry::new());
        let streams = StreamPair::new(config.audio.clone(), params.clone(), telemetry.clone());

        Ok(Self {
            backend,
            config,
            params,
            telemetry,
            streams,
            state: EngineState::Uninitialized,
            muted_by_interruption: false,
        })
    }

    /// Open and start both streams, muted.
    ///
    /// Output goes to the configured device id if one is set, else the first
    /// USB output, else the platform default. Returns false if either stream
    /// can't be opened, leaving the engine uninitialized. Calling it again
    /// while streams are open does nothing and returns true.
    pub fn create(&mut self) -> bool {
        if self.state.is_live() {
            debug!("create() while {}; streams already open", self.state);
            return true;
        }

        self.params.set_effect_on(false);
        self.muted_by_interruption = false;

        let output_device = match self.params.output_device_id() {
            Some(id) => {
                info!("Using requested output device {}", id);
                Some(id)
            }
            None => match select_output_device(self.backend.as_ref()) {
                Some(device) => {
                    info!("Routing output to USB device {}", device);
                    Some(device.id)
                }
                None => {
                    info!("No USB output found, using the default output");
                    None
                }
            },
        };

        match self.streams.open(self.backend.as_mut(), output_device) {
            Ok(()) => {
                self.state = EngineState::Created;
                info!("Engine created (muted)");
                true
            }
            Err(e) => {
                error!("Engine could not be created: {}", e);
                false
            }
        }
    }

    /// Stop and release both streams and the ring buffer. Safe to call in any state.
    pub fn delete(&mut self) {
        if !self.state.is_live() {
            return;
        }

        self.params.set_effect_on(false);
        self.streams.close();
        self.state = EngineState::Uninitialized;
        self.muted_by_interruption = false;
        info!("Engine deleted");
    }

    /// Unmute (`true`) or mute (`false`) the passthrough.
    ///
    /// Unmuting is only possible once created; muting only while running.
    /// Anything else is ignored.
    pub fn set_effect_on(&mut self, on: bool) {
        self.muted_by_interruption = false;
        self.apply_effect(on);
    }

    fn apply_effect(&mut self, on: bool) -> bool {
        let next = match (self.state, on) {
            (EngineState::Created | EngineState::Stopped, true) => EngineState::Running,
            (EngineState::Running, false) => EngineState::Stopped,
            (state, _) => {
                debug!("set_effect_on({}) ignored while {}", on, state);
                return false;
            }
        };

        self.params.set_effect_on(on);
        info!("Engine {} -> {}", self.state, next);
        self.state = next;
        true
    }

    pub fn set_gain(&self, gain: f32) {
        let applied = self.params.set_gain(gain);
        debug!("Gain set to {} (requested {})", applied, gain);
    }

    /// Takes effect on the next [`create`](Self::create)
    pub fn set_output_device_id(&self, device_id: Option<i32>) {
        self.params.set_output_device_id(device_id);
        debug!("Output device set to {:?}", device_id);
    }

    /// 0 disables drain control
    pub fn set_target_buffer_ms(&self, ms: i32) {
        let applied = self.params.set_target_buffer_ms(ms);
        debug!("Target buffer set to {}ms (requested {})", applied, ms);
    }

    /// 0 disables correction, 1 corrects the whole excess every quantum
    pub fn set_drain_rate(&self, rate: f32) {
        let applied = self.params.set_drain_rate(rate);
        debug!("Drain rate set to {} (requested {})", applied, rate);
    }

    pub fn apply_preset(&self, preset: LatencyPreset) {
        info!("Applying latency preset '{}'", preset);
        self.set_target_buffer_ms(preset.target_buffer_ms());
        self.set_drain_rate(preset.drain_rate());
    }

    /// React to an audio focus change according to the configured policy
    pub fn handle_interruption(&mut self, interruption: Interruption) {
        if self.config.interruption_policy == InterruptionPolicy::Ignore {
            debug!("Ignoring {:?}", interruption);
            return;
        }

        match interruption {
            Interruption::TransientLoss => {
                if self.state == EngineState::Running {
                    warn!("Audio focus lost temporarily, muting");
                    self.apply_effect(false);
                    self.muted_by_interruption = true;
                }
            }
            Interruption::Gain => {
                if self.muted_by_interruption {
                    info!("Audio focus regained, resuming");
                    self.muted_by_interruption = false;
                    self.apply_effect(true);
                }
            }
            Interruption::Loss => {
                if self.state.is_live() {
                    warn!("Audio focus lost, releasing streams");
                    self.delete();
                }
            }
        }
    }

    /// Reopen the streams if a device dropped out since they were opened.
    ///
    /// Restores the state from before the disconnect: running, stopped (with
    /// any pending resume after an interruption), or created.
    /// Returns true only if the streams were reopened.
    pub fn recover_if_disconnected(&mut self) -> bool {
        if !self.state.is_live() || !self.telemetry.disconnected() {
            return false;
        }

        warn!("Audio device disconnected, reopening streams");
        let previous = self.state;
        let muted_by_interruption = self.muted_by_interruption;

        self.delete();
        if !self.create() {
            error!("Could not reopen streams after disconnect");
            return false;
        }

        match previous {
            EngineState::Running => {
                self.apply_effect(true);
            }
            EngineState::Stopped => {
                // Still muted from create(); only the state label changes
                self.state = EngineState::Stopped;
                self.muted_by_interruption = muted_by_interruption;
            }
            _ => {}
        }
        info!("Streams reopened, engine {}", self.state);
        true
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parameters(&self) -> &Arc<EngineParameters> {
        &self.params
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn output_devices(&self) -> Vec<AudioDevice> {
        self.backend.output_devices()
    }

    pub fn capture_endpoint(&self) -> Option<&StreamEndpoint> {
        self.streams.capture_endpoint()
    }

    pub fn render_endpoint(&self) -> Option<&StreamEndpoint> {
        self.streams.render_endpoint()
    }

    pub fn is_input_low_latency(&self) -> bool {
        self.telemetry.is_input_low_latency()
    }

    pub fn is_output_low_latency(&self) -> bool {
        self.telemetry.is_output_low_latency()
    }

    /// -1 when unknown or no stream is open
    pub fn input_latency_ms(&self) -> i32 {
        self.telemetry.input_latency_ms()
    }

    /// -1 when unknown or no stream is open
    pub fn output_latency_ms(&self) -> i32 {
        self.telemetry.output_latency_ms()
    }

    /// Audio queued between capture and render, -1 when no stream is open
    pub fn current_buffer_ms(&self) -> i32 {
        self.telemetry.current_buffer_ms()
    }
}

impl Drop for PassthroughEngine {
    fn drop(&mut self) {
        self.delete();
    }
}
