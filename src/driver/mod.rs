//! Driver core
//!
//! Two loops share one [`SharedState`]:
//!
//! 1. [`device_loop`] - dedicated thread, polls the device and applies force
//! 2. [`publish_loop`] - fixed-rate task, publishes samples and decays force
//! 3. [`force_intake`] - called by the transport for every inbound command
//! 4. [`driver_handle`] - lifecycle and ownership of the device connection
//!
//! # Architecture
//!
//! ```text
//! HapticDevice ◄──► DeviceLoop ──sample──► SharedState ──sample──► PublishLoop ──► Publisher
//!                        ▲                    ▲    │
//!                        └──── command ───────┘    └── decay
//!                                             ▲
//!                              ForceIntake ───┘
//! ```
//!
//! Shutdown is cooperative through the run token: the publish loop finishes its
//! cycle, the device thread is joined, and only then is the device closed.

pub mod connection;
pub mod device_loop;
pub mod driver_handle;
pub mod force_intake;
pub mod publish_loop;
pub mod state;

pub use connection::DeviceConnection;
pub use device_loop::{DeviceLoop, DeviceLoopExit, DeviceLoopReport, FaultPolicy};
pub use driver_handle::{DriverState, HapticDriver, Initializing, Ready, RunReport, Stopped};
pub use force_intake::{ForceIntake, IntakeError};
pub use publish_loop::{build_messages, PublishLoop, PublishStats, StateMessages};
pub use state::{DeviceSample, ForceCommand, HealthStatus, SharedState};

use std::time::Duration;

use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("No haptic device found at index {0}")]
    DeviceAbsent(usize),

    #[error("Could not open connection to device {index}: {source}")]
    DeviceOpen {
        index: usize,
        #[source]
        source: DeviceError,
    },

    #[error("Device calibration failed: {0}")]
    Calibration(#[source] DeviceError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Device faulted after {consecutive_failures} consecutive failures: {last_error}")]
    DeviceFault {
        consecutive_failures: u32,
        last_error: DeviceError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to spawn device loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Device loop did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Device loop thread panicked")]
    DeviceLoopPanicked,

    #[error("Driver lifecycle error: {0}")]
    Lifecycle(&'static str),
}

impl DriverError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::DeviceAbsent(_) => 1,
            DriverError::DeviceOpen { .. } | DriverError::Calibration(_) => 2,
            DriverError::Config(_) => 3,
            DriverError::ShutdownTimeout(_) => 4,
            DriverError::DeviceFault { .. } => 5,
            _ => 6,
        }
    }
}
