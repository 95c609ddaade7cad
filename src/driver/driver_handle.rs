//! Driver lifecycle with statum state machine
//!
//! ```text
//! Initializing ──connect──► Ready ──run──► Stopped ──release──► RunReport
//! ```
//!
//! `connect` acquires and calibrates the device, `run` lends it to the device
//! loop thread while the publish loop runs on the caller's task, and `release`
//! closes it once the thread has handed it back.

use std::sync::Arc;
use std::time::Duration;

use statum::{machine, state};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::connection::DeviceConnection;
use super::device_loop::{DeviceLoop, DeviceLoopExit, DeviceLoopHandle, DeviceLoopReport};
use super::force_intake::ForceIntake;
use super::publish_loop::{PublishLoop, PublishStats};
use super::state::{HealthStatus, SharedState};
use super::DriverError;
use crate::config::DriverConfig;
use crate::device::{DeviceHandler, DeviceSpecifications, HapticDevice};
use crate::transport::Publisher;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one run, available once the driver has stopped
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub publish: PublishStats,
    pub device: DeviceLoopReport,
    pub health: HealthStatus,
}

impl RunReport {
    /// Turns a device fault into an error
    pub fn check(&self) -> Result<(), DriverError> {
        match &self.device.exit {
            DeviceLoopExit::Stopped => Ok(()),
            DeviceLoopExit::Faulted {
                consecutive_failures,
                last_error,
            } => Err(DriverError::DeviceFault {
                consecutive_failures: *consecutive_failures,
                last_error: last_error.clone(),
            }),
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Initializing,
    Ready,
    Stopped(RunReport),
}

#[machine]
pub struct HapticDriver<S: DriverState> {
    config: DriverConfig,
    shared: Arc<SharedState>,
    connection: Option<DeviceConnection>,
}

impl<S: DriverState> HapticDriver<S> {
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn shared(&self) -> Arc<SharedState> {
        self.shared.clone()
    }
}

impl HapticDriver<Initializing> {
    pub fn create(config: DriverConfig) -> Self {
        debug!("Creating haptic driver {}", config.node_name);
        Self::new(config, Arc::new(SharedState::new()), None)
    }

    /// Validates the config, then acquires, opens and calibrates the
    /// configured device
    pub fn connect(
        mut self,
        handler: &mut dyn DeviceHandler,
    ) -> Result<HapticDriver<Ready>, DriverError> {
        self.config.validate()?;
        let index = self.config.device_index;
        info!(
            "Looking for haptic device {} ({} attached)",
            index,
            handler.device_count()
        );

        let mut device = handler.device(index).ok_or_else(|| {
            error!("No haptic device found at index {}", index);
            DriverError::DeviceAbsent(index)
        })?;

        if let Err(source) = device.open() {
            error!("Could not open connection to device {}: {}", index, source);
            return Err(DriverError::DeviceOpen { index, source });
        }

        // From here on the connection closes the device if anything fails
        let mut connection = DeviceConnection::new(device);
        if let Some(device) = connection.device_mut() {
            device.calibrate().map_err(DriverError::Calibration)?;
        }

        info!("Connected to: {}", connection.specifications());
        self.connection = Some(connection);
        Ok(self.transition())
    }
}

impl HapticDriver<Ready> {
    /// Intake for inbound force commands, to be handed to the transport
    pub fn intake(&self) -> ForceIntake {
        ForceIntake::new(self.shared.clone(), self.config.max_force)
    }

    /// Cancelling this token stops both loops
    pub fn run_token(&self) -> CancellationToken {
        self.shared.run_token()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthStatus> {
        self.shared.subscribe_health()
    }

    pub fn specifications(&self) -> Option<&DeviceSpecifications> {
        self.connection.as_ref().map(|c| c.specifications())
    }

    /// Runs the device loop on its own thread and the publish loop on the
    /// current task until the run token is cancelled.
    ///
    /// Returns once the device thread has stopped and handed the device back,
    /// or with [`DriverError::ShutdownTimeout`] if it does not stop in time.
    pub async fn run<P: Publisher>(
        mut self,
        publisher: P,
    ) -> Result<HapticDriver<Stopped>, DriverError> {
        let device = self
            .connection
            .as_mut()
            .and_then(|connection| connection.lend())
            .ok_or(DriverError::Lifecycle("device connection is not held"))?;

        let device_loop = DeviceLoop::new(
            device,
            self.shared.clone(),
            self.config.force_output,
            self.config.fault.clone(),
        );
        let handle = device_loop.spawn().map_err(DriverError::Spawn)?;
        info!("Device loop thread started");

        let publish_loop = PublishLoop::new(
            publisher,
            self.shared.clone(),
            self.config.node_name.clone(),
            self.config.topics.clone(),
            self.config.publish_period(),
        );
        let publish = publish_loop.run().await;

        // Already cancelled unless the publish loop ended some other way
        self.shared.request_shutdown();
        let (device, device_report) =
            join_device_loop(handle, self.config.shutdown_timeout()).await?;

        if let Some(connection) = self.connection.as_mut() {
            connection.restore(device);
        }

        let report = RunReport {
            publish,
            device: device_report,
            health: self.shared.health(),
        };
        info!("Driver stopped: {:?}", report.device.exit);
        Ok(self.transition_with(report))
    }
}

impl HapticDriver<Stopped> {
    pub fn report(&self) -> Option<&RunReport> {
        self.get_state_data()
    }

    /// Closes the device and returns the run report
    pub fn release(mut self) -> Result<RunReport, DriverError> {
        let report = self
            .get_state_data()
            .cloned()
            .ok_or(DriverError::Lifecycle("stopped driver has no run report"))?;

        let mut connection = self
            .connection
            .take()
            .ok_or(DriverError::Lifecycle("device connection is not held"))?;
        connection.close()?;

        info!("Device connection released");
        Ok(report)
    }
}

async fn join_device_loop(
    handle: DeviceLoopHandle,
    timeout: Duration,
) -> Result<(Box<dyn HapticDevice>, DeviceLoopReport), DriverError> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!("Device loop did not stop within {:?}, abandoning it", timeout);
            return Err(DriverError::ShutdownTimeout(timeout));
        }
        tokio::time::sleep(JOIN_POLL_INTERVAL).await;
    }
    handle.join().map_err(|_| DriverError::DeviceLoopPanicked)
}
