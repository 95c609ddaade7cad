use tracing::{info, warn};

use crate::device::{DeviceError, DeviceSpecifications, HapticDevice};

/// Scoped ownership of an opened device.
///
/// The handle can be lent out (to the device loop thread) and restored. Closing
/// happens at most once: explicitly through [`DeviceConnection::close`], or on
/// drop if the handle is still held.
pub struct DeviceConnection {
    device: Option<Box<dyn HapticDevice>>,
    specifications: DeviceSpecifications,
}

impl DeviceConnection {
    /// Wraps a device that has already been opened
    pub fn new(device: Box<dyn HapticDevice>) -> Self {
        let specifications = device.specifications();
        Self {
            device: Some(device),
            specifications,
        }
    }

    pub fn specifications(&self) -> &DeviceSpecifications {
        &self.specifications
    }

    pub fn is_held(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_mut(&mut self) -> Option<&mut (dyn HapticDevice + 'static)> {
        self.device.as_deref_mut()
    }

    /// Hands the device out; the connection no longer closes it
    pub fn lend(&mut self) -> Option<Box<dyn HapticDevice>> {
        self.device.take()
    }

    pub fn restore(&mut self, device: Box<dyn HapticDevice>) {
        self.device = Some(device);
    }

    /// Closes the device if it is still held
    pub fn close(&mut self) -> Result<(), DeviceError> {
        match self.device.take() {
            Some(mut device) => {
                device.close()?;
                info!("Closed connection to {}", self.specifications);
                Ok(())
            }
            None => Err(DeviceError::NotConnected),
        }
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            warn!("Device connection dropped while open, closing");
            if let Err(e) = device.close() {
                warn!("Failed to close device: {}", e);
            }
        }
    }
}
