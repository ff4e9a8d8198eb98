//! Error types.
//!
//! Only one failure ever reaches the host: a stream pair that cannot be
//! opened at all. Transport downgrades, underruns and out-of-range
//! parameters are absorbed by the engine and show up in telemetry instead.

use crate::stream::{Direction, TransportMode};

/// Failures reported by an [`AudioBackend`](crate::platform::AudioBackend)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Nothing to open in this direction (no default device)
    #[error("no {0} device available")]
    NoDevice(Direction),

    /// The requested output device id does not resolve to a device
    #[error("output device {0} not found")]
    DeviceNotFound(i32),

    /// The platform will not grant the requested transport
    #[error("{transport} transport refused: {reason}")]
    TransportRefused {
        transport: TransportMode,
        reason: String,
    },

    /// The device can't run at the rate the other direction settled on
    #[error("{direction} device does not support {requested} Hz (native rate {native} Hz)")]
    UnsupportedSampleRate {
        direction: Direction,
        requested: u32,
        native: u32,
    },

    /// The device went away while the stream was open
    #[error("device disconnected")]
    Disconnected,

    #[error("failed to build stream: {0}")]
    Build(String),

    #[error("failed to start stream: {0}")]
    Start(String),

    #[error("failed to stop stream: {0}")]
    Stop(String),

    /// Anything else the platform reports
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Failure to open the capture/render stream pair
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// A direction could not be opened on any transport
    #[error("{direction} stream unavailable: {source}")]
    DeviceUnavailable {
        direction: Direction,
        #[source]
        source: BackendError,
    },
}

impl OpenError {
    pub fn direction(&self) -> Direction {
        match self {
            OpenError::DeviceUnavailable { direction, .. } => *direction,
        }
    }
}
