//! # LineIn Passthrough Engine
//!
//! Real-time instrument monitoring: audio captured from a line input is
//! played back on an output device with as little delay as the platform
//! allows.
//!
//! ## Overview
//!
//! A guitar or keyboard goes into the default input; the engine routes the
//! signal to a USB output when one is present, applies a linear gain with
//! saturation, and keeps the queue between the two streams short with an
//! adaptive drain controller. Both audio callbacks are lock-free and
//! allocation-free; the control path talks to them only through atomics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use linein::{CpalBackend, EngineConfig, PassthroughEngine};
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let backend = Box::new(CpalBackend::new());
//!     let mut engine = PassthroughEngine::new(backend, EngineConfig::default())?;
//!
//!     if engine.create() {
//!         engine.set_target_buffer_ms(50);
//!         engine.set_drain_rate(0.5);
//!         engine.set_effect_on(true);
//!         println!("output latency: {}ms", engine.output_latency_ms());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`]: lifecycle state machine and the public control surface
//! - [`stream`]: opening the capture/render pair with transport fallback
//! - [`realtime_audio`]: the work done inside the two audio callbacks
//! - [`ring_buffer`]: frame-aligned SPSC queue between the callbacks
//! - [`drain`]: adaptive drain control
//! - [`gain`]: gain and saturation
//! - [`device_router`]: output device selection
//! - [`platform`]: the backend seam and the CPAL backend
//! - [`mock_backend`]: a manually pumped backend for tests and demos
//! - [`params`]: lock-free parameter block
//! - [`telemetry`]: stream status and session counters
//! - [`config`]: persistent configuration and latency presets
//!
//! ## Signal Path
//!
//! 1. **Capture**: each input quantum is queued; frames that don't fit are dropped
//! 2. **Drain**: queued audio above the target is partly discarded
//! 3. **Gain**: samples are scaled and saturated to [-1.0, 1.0]
//! 4. **Channel mapping**: mono input is copied to every output channel
//! 5. **Render**: underruns are filled with silence

/// Output device selection
pub mod device_router;

/// Frame-aligned lock-free ring buffer
pub mod ring_buffer;

/// Gain and saturation
pub mod gain;

/// Adaptive drain control
pub mod drain;

/// Lock-free parameters shared with the audio callbacks
pub mod params;

/// Stream status and session statistics
pub mod telemetry;

/// Error types
pub mod error;

/// Platform backend seam and the CPAL backend
pub mod platform;

/// Manually pumped backend for tests and demos
pub mod mock_backend;

/// Real-time capture and render processing
pub mod realtime_audio;

/// Capture/render stream pair
pub mod stream;

/// Engine lifecycle and control surface
pub mod engine;

/// Configuration management with persistence and validation
pub mod config;

#[cfg(test)]
pub mod tests;

// Re-export main types for convenience
pub use config::{ConfigManager, EngineConfig, InterruptionPolicy, LatencyPreset};
pub use engine::{EngineState, Interruption, PassthroughEngine};
pub use error::{BackendError, OpenError};
pub use mock_backend::{MockBackend, MockHandle};
pub use platform::{AudioBackend, CpalBackend};
pub use telemetry::{SessionStats, Telemetry, TelemetrySnapshot};
