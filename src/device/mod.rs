//! Device SDK surface
//!
//! The driver talks to hardware only through [`DeviceHandler`] (enumeration and
//! handle acquisition) and [`HapticDevice`] (a single opened device). All calls
//! are synchronous and may block for the duration of one hardware transfer.
//!
//! [`simulated`] provides a spring-damper device used by the binary when no
//! hardware backend is available, and by the tests.

pub mod simulated;
pub mod vector;

pub use simulated::{SimulatedDevice, SimulatedHandler, SimulationProbe, SimulationSettings};
pub use vector::Vector3;

use std::fmt;

/// Number of user switches sampled on every device iteration
pub const BUTTON_COUNT: usize = 4;

/// Manufacturer and model reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSpecifications {
    pub manufacturer: String,
    pub model: String,
}

impl fmt::Display for DeviceSpecifications {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("Device is not connected")]
    NotConnected,

    #[error("Device I/O failed: {0}")]
    Io(String),

    #[error("User switch {0} does not exist")]
    InvalidSwitch(usize),

    #[error("Calibration failed: {0}")]
    Calibration(String),
}

/// An opened (or openable) force-feedback device.
///
/// Implementations must be `Send`: the handle is moved onto the device loop
/// thread for the duration of a run and handed back afterwards.
pub trait HapticDevice: Send {
    fn open(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    fn calibrate(&mut self) -> Result<(), DeviceError>;

    /// Current end-effector position in the device frame
    fn position(&mut self) -> Result<Vector3, DeviceError>;

    /// Current end-effector linear velocity in the device frame
    fn linear_velocity(&mut self) -> Result<Vector3, DeviceError>;

    fn user_switch(&mut self, index: usize) -> Result<bool, DeviceError>;

    /// Writes a force in the device frame
    fn set_force(&mut self, force: Vector3) -> Result<(), DeviceError>;

    fn specifications(&self) -> DeviceSpecifications;
}

/// Enumerates attached devices and hands out handles to them
pub trait DeviceHandler {
    fn device_count(&self) -> usize;

    /// Returns an unopened handle for the device at `index`, if one exists
    fn device(&mut self, index: usize) -> Option<Box<dyn HapticDevice>>;
}
