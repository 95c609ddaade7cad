//! Simulated haptic device
//!
//! Models a unit-mass end effector held by a spring-damper on each axis. Every
//! `set_force` call blocks for one I/O period, the same way a USB device blocks on
//! its transfer, and then integrates the applied force over that period.
//!
//! [`SimulationProbe`] is shared between the handler, the device and whoever
//! created them. It records what reached the device and lets the owner press
//! switches or inject failures from outside the device loop thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    DeviceError, DeviceHandler, DeviceSpecifications, HapticDevice, Vector3, BUTTON_COUNT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Duration of one simulated hardware transfer; 0 disables the delay
    pub io_period_us: u64,
    /// Spring constant pulling the end effector back to the origin
    pub stiffness: f64,
    pub damping: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            io_period_us: 1000, // roughly the 1 kHz rate of a USB haptic device
            stiffness: 50.0,
            damping: 2.0,
        }
    }
}

impl SimulationSettings {
    pub fn io_period(&self) -> Duration {
        Duration::from_micros(self.io_period_us)
    }
}

/// Observation and fault-injection handle for simulated devices
#[derive(Debug)]
pub struct SimulationProbe {
    absent: AtomicBool,
    refuse_open: AtomicBool,
    open_count: AtomicU32,
    close_count: AtomicU32,
    calibrate_count: AtomicU32,
    applied_forces: AtomicU64,
    last_force: ArcSwap<Vector3>,
    buttons: [AtomicBool; BUTTON_COUNT],
    failures_remaining: AtomicU32,
    fail_always: AtomicBool,
    stalled: AtomicBool,
}

impl Default for SimulationProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationProbe {
    pub fn new() -> Self {
        Self {
            absent: AtomicBool::new(false),
            refuse_open: AtomicBool::new(false),
            open_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            calibrate_count: AtomicU32::new(0),
            applied_forces: AtomicU64::new(0),
            last_force: ArcSwap::from_pointee(Vector3::ZERO),
            buttons: Default::default(),
            failures_remaining: AtomicU32::new(0),
            fail_always: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        }
    }

    /// Makes the handler report no attached device
    pub fn set_absent(&self, absent: bool) {
        self.absent.store(absent, Ordering::Release);
    }

    /// Makes every subsequent `open` call fail
    pub fn set_refuse_open(&self, refuse: bool) {
        self.refuse_open.store(refuse, Ordering::Release);
    }

    pub fn set_button(&self, index: usize, pressed: bool) {
        if let Some(button) = self.buttons.get(index) {
            button.store(pressed, Ordering::Release);
        }
    }

    /// Fails the next `count` device calls
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    /// Fails every device call until cleared
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::Release);
    }

    /// Blocks `set_force` until cleared, emulating a hung transfer
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::Acquire)
    }

    pub fn calibrate_count(&self) -> u32 {
        self.calibrate_count.load(Ordering::Acquire)
    }

    /// Number of forces written to the device so far
    pub fn applied_forces(&self) -> u64 {
        self.applied_forces.load(Ordering::Acquire)
    }

    /// Last force written to the device, in the device frame
    pub fn last_force(&self) -> Vector3 {
        **self.last_force.load()
    }

    fn button(&self, index: usize) -> bool {
        self.buttons
            .get(index)
            .is_some_and(|button| button.load(Ordering::Acquire))
    }

    fn check_failure(&self) -> Result<(), DeviceError> {
        if self.fail_always.load(Ordering::Acquire) {
            return Err(DeviceError::Io("injected failure".to_string()));
        }
        let consumed = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if consumed {
            Err(DeviceError::Io("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn wait_while_stalled(&self) {
        while self.stalled.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn record_force(&self, force: Vector3) {
        self.last_force.store(Arc::new(force));
        self.applied_forces.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct SimulatedDevice {
    settings: SimulationSettings,
    probe: Arc<SimulationProbe>,
    connected: bool,
    position: Vector3,
    velocity: Vector3,
}

impl SimulatedDevice {
    pub fn new(settings: SimulationSettings, probe: Arc<SimulationProbe>) -> Self {
        Self {
            settings,
            probe,
            connected: false,
            position: Vector3::ZERO,
            velocity: Vector3::ZERO,
        }
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.connected {
            self.probe.check_failure()
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    // Semi-implicit Euler step over one I/O period
    fn integrate(&mut self, force: Vector3) {
        let dt = self.settings.io_period().as_secs_f64();
        if dt == 0.0 {
            return;
        }
        let acceleration = force
            - self.position * self.settings.stiffness
            - self.velocity * self.settings.damping;
        self.velocity = self.velocity + acceleration * dt;
        self.position = self.position + self.velocity * dt;
    }
}

impl HapticDevice for SimulatedDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        if self.probe.refuse_open.load(Ordering::Acquire) {
            return Err(DeviceError::Io("connection refused".to_string()));
        }
        self.connected = true;
        self.probe.open_count.fetch_add(1, Ordering::AcqRel);
        debug!("Simulated device opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.connected = false;
        self.probe.close_count.fetch_add(1, Ordering::AcqRel);
        debug!("Simulated device closed");
        Ok(())
    }

    fn calibrate(&mut self) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.position = Vector3::ZERO;
        self.velocity = Vector3::ZERO;
        self.probe.calibrate_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn position(&mut self) -> Result<Vector3, DeviceError> {
        self.ensure_connected()?;
        Ok(self.position)
    }

    fn linear_velocity(&mut self) -> Result<Vector3, DeviceError> {
        self.ensure_connected()?;
        Ok(self.velocity)
    }

    fn user_switch(&mut self, index: usize) -> Result<bool, DeviceError> {
        self.ensure_connected()?;
        if index >= BUTTON_COUNT {
            return Err(DeviceError::InvalidSwitch(index));
        }
        Ok(self.probe.button(index))
    }

    fn set_force(&mut self, force: Vector3) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.probe.wait_while_stalled();
        self.probe.check_failure()?;

        let period = self.settings.io_period();
        if !period.is_zero() {
            thread::sleep(period);
        }
        self.integrate(force);
        self.probe.record_force(force);
        Ok(())
    }

    fn specifications(&self) -> DeviceSpecifications {
        DeviceSpecifications {
            manufacturer: "haptic-bridge".to_string(),
            model: "Simulated 3-DOF".to_string(),
        }
    }
}

/// Enumerates a single simulated device unless the probe marks it absent
pub struct SimulatedHandler {
    settings: SimulationSettings,
    probe: Arc<SimulationProbe>,
}

impl SimulatedHandler {
    pub fn new(settings: SimulationSettings, probe: Arc<SimulationProbe>) -> Self {
        info!("Using simulated haptic device ({:?} I/O period)", settings.io_period());
        Self { settings, probe }
    }

    pub fn probe(&self) -> Arc<SimulationProbe> {
        self.probe.clone()
    }
}

impl DeviceHandler for SimulatedHandler {
    fn device_count(&self) -> usize {
        if self.probe.absent.load(Ordering::Acquire) {
            0
        } else {
            1
        }
    }

    fn device(&mut self, index: usize) -> Option<Box<dyn HapticDevice>> {
        if index >= self.device_count() {
            return None;
        }
        Some(Box::new(SimulatedDevice::new(
            self.settings.clone(),
            self.probe.clone(),
        )))
    }
}
