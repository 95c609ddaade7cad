//! Device loop
//!
//! Runs on a dedicated OS thread and spins as fast as the device allows: read
//! the pose and switches, publish them as the latest sample, then write either
//! the commanded force or zero. The thread owns the device handle for the whole
//! run and hands it back through its join handle.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::state::{DeviceSample, HealthStatus, SharedState};
use crate::device::{DeviceError, HapticDevice, Vector3, BUTTON_COUNT};

/// How the device loop reacts to failing device I/O
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicy {
    /// Consecutive failed iterations after which the device is declared faulted
    pub max_consecutive_failures: u32,
    /// Backoff per consecutive failure, in milliseconds
    pub backoff_ms: u64,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 50,
            backoff_ms: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceLoopExit {
    /// Shutdown was requested
    Stopped,
    /// Device I/O kept failing; the loop requested shutdown itself
    Faulted {
        consecutive_failures: u32,
        last_error: DeviceError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLoopReport {
    pub iterations: u64,
    pub failures: u64,
    pub exit: DeviceLoopExit,
}

pub type DeviceLoopHandle = JoinHandle<(Box<dyn HapticDevice>, DeviceLoopReport)>;

pub struct DeviceLoop {
    device: Box<dyn HapticDevice>,
    shared: Arc<SharedState>,
    force_output: bool,
    fault_policy: FaultPolicy,
}

impl DeviceLoop {
    pub fn new(
        device: Box<dyn HapticDevice>,
        shared: Arc<SharedState>,
        force_output: bool,
        fault_policy: FaultPolicy,
    ) -> Self {
        Self {
            device,
            shared,
            force_output,
            fault_policy,
        }
    }

    pub fn spawn(self) -> io::Result<DeviceLoopHandle> {
        thread::Builder::new()
            .name("haptic-device".to_string())
            .spawn(move || self.run())
    }

    /// One device iteration: sample, publish, apply force.
    ///
    /// On any device error the force is zeroed (best effort) before the error
    /// is returned, so a failure streak never holds the last commanded force.
    pub fn step(&mut self) -> Result<(), DeviceError> {
        let result = self.sample_and_apply();
        if result.is_err() {
            if let Err(e) = self.device.set_force(Vector3::ZERO) {
                debug!("Failed to zero force after device error: {}", e);
            }
        }
        result
    }

    fn sample_and_apply(&mut self) -> Result<(), DeviceError> {
        let position = self.device.position()?;
        let velocity = self.device.linear_velocity()?;
        let mut buttons = [false; BUTTON_COUNT];
        for (index, pressed) in buttons.iter_mut().enumerate() {
            *pressed = self.device.user_switch(index)?;
        }

        self.shared.publish_sample(DeviceSample {
            position,
            velocity,
            buttons,
        });

        if self.force_output {
            let command = self.shared.command();
            self.device.set_force(command.force)?;
            self.shared.mark_applied(command.seq);
        } else {
            self.device.set_force(Vector3::ZERO)?;
        }
        Ok(())
    }

    /// Loops until the run flag is cleared or the fault budget is exhausted,
    /// then returns the device handle.
    pub fn run(mut self) -> (Box<dyn HapticDevice>, DeviceLoopReport) {
        info!(
            "Starting device loop (force output {})",
            if self.force_output { "enabled" } else { "disabled" }
        );

        let run = self.shared.run_token();
        let mut iterations: u64 = 0;
        let mut failures: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut healthy = false;
        let mut exit = DeviceLoopExit::Stopped;

        let mut window_iterations: u64 = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !run.is_cancelled() {
            iterations += 1;
            match self.step() {
                Ok(()) => {
                    window_iterations += 1;
                    if consecutive_failures > 0 {
                        info!(
                            "Device recovered after {} failed iterations",
                            consecutive_failures
                        );
                        consecutive_failures = 0;
                    }
                    if !healthy {
                        self.shared.report_health(HealthStatus::Healthy);
                        healthy = true;
                    }
                }
                Err(e) => {
                    failures += 1;
                    consecutive_failures += 1;
                    healthy = false;

                    if consecutive_failures >= self.fault_policy.max_consecutive_failures {
                        error!(
                            "Device faulted after {} consecutive failures: {}",
                            consecutive_failures, e
                        );
                        self.shared.report_health(HealthStatus::Faulted);
                        self.shared.request_shutdown();
                        exit = DeviceLoopExit::Faulted {
                            consecutive_failures,
                            last_error: e,
                        };
                        break;
                    }

                    warn!(
                        "Device iteration failed ({}/{}): {}",
                        consecutive_failures, self.fault_policy.max_consecutive_failures, e
                    );
                    self.shared.report_health(HealthStatus::Degraded);
                    let backoff = Duration::from_millis(
                        self.fault_policy.backoff_ms * u64::from(consecutive_failures),
                    );
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Device loop stats: {} iterations in last {} seconds (avg {:.1}/sec)",
                    window_iterations,
                    log_interval.num_seconds(),
                    window_iterations as f64 / log_interval.num_seconds() as f64
                );
                window_iterations = 0;
                last_log_time = now;
            }
        }

        // Never leave the last commanded force on the handle
        if let Err(e) = self.device.set_force(Vector3::ZERO) {
            warn!("Failed to zero device force on exit: {}", e);
        }

        debug!(
            "Device loop finished after {} iterations ({} failed)",
            iterations, failures
        );
        info!("Device loop stopped: {:?}", exit);

        let report = DeviceLoopReport {
            iterations,
            failures,
            exit,
        };
        (self.device, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDevice, SimulationProbe, SimulationSettings};

    fn opened_device(probe: &Arc<SimulationProbe>) -> Box<dyn HapticDevice> {
        let settings = SimulationSettings {
            io_period_us: 0,
            ..Default::default()
        };
        let mut device = SimulatedDevice::new(settings, probe.clone());
        device.open().unwrap();
        Box::new(device)
    }

    #[test]
    fn step_publishes_sample_and_applies_command() {
        let probe = Arc::new(SimulationProbe::new());
        probe.set_button(1, true);
        let shared = Arc::new(SharedState::new());
        let mut device_loop =
            DeviceLoop::new(opened_device(&probe), shared.clone(), true, FaultPolicy::default());

        let seq = shared.store_command(Vector3::new(0.5, 0.0, 0.0));
        device_loop.step().unwrap();

        assert_eq!(shared.sample().buttons, [false, true, false, false]);
        assert_eq!(probe.last_force(), Vector3::new(0.5, 0.0, 0.0));
        assert!(shared.is_consumed());
        assert_eq!(shared.applied_seq(), seq);
    }

    #[test]
    fn disabled_force_output_writes_zero_and_keeps_flag() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let mut device_loop =
            DeviceLoop::new(opened_device(&probe), shared.clone(), false, FaultPolicy::default());

        shared.store_command(Vector3::new(1.0, 1.0, 1.0));
        device_loop.step().unwrap();

        assert_eq!(probe.last_force(), Vector3::ZERO);
        assert!(!shared.is_consumed());
        assert_eq!(shared.applied_seq(), 0);
    }

    #[test]
    fn repeated_failures_fault_the_loop_and_stop_the_driver() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let policy = FaultPolicy {
            max_consecutive_failures: 3,
            backoff_ms: 0,
        };
        let device_loop = DeviceLoop::new(opened_device(&probe), shared.clone(), true, policy);

        probe.set_fail_always(true);
        let (_device, report) = device_loop.run();

        assert!(matches!(
            report.exit,
            DeviceLoopExit::Faulted {
                consecutive_failures: 3,
                ..
            }
        ));
        assert_eq!(report.failures, 3);
        assert_eq!(shared.health(), HealthStatus::Faulted);
        assert!(!shared.is_running());
    }

    #[test]
    fn transient_failures_recover() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let policy = FaultPolicy {
            max_consecutive_failures: 5,
            backoff_ms: 0,
        };
        let mut device_loop = DeviceLoop::new(opened_device(&probe), shared.clone(), true, policy);

        // First step loses both the read and the zeroing write
        probe.fail_next(3);
        assert!(device_loop.step().is_err());
        assert!(device_loop.step().is_err());
        assert!(device_loop.step().is_ok());
    }

    #[test]
    fn failed_read_zeroes_force_left_on_the_device() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let mut device_loop =
            DeviceLoop::new(opened_device(&probe), shared.clone(), true, FaultPolicy::default());

        shared.store_command(Vector3::new(1.0, 0.0, 0.0));
        device_loop.step().unwrap();
        assert!(shared.decay_if_consumed());
        assert_eq!(probe.last_force(), Vector3::new(1.0, 0.0, 0.0));

        probe.fail_next(1);
        assert_eq!(
            device_loop.step(),
            Err(DeviceError::Io("injected failure".to_string()))
        );
        assert_eq!(probe.last_force(), Vector3::ZERO);
    }

    #[test]
    fn failure_streak_does_not_hold_commanded_force() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let mut device_loop =
            DeviceLoop::new(opened_device(&probe), shared.clone(), true, FaultPolicy::default());

        shared.store_command(Vector3::new(0.0, 2.0, 0.0));
        device_loop.step().unwrap();

        // Pending command is still nonzero, but a failing read must not keep it applied
        probe.fail_next(1);
        assert!(device_loop.step().is_err());
        assert_eq!(probe.last_force(), Vector3::ZERO);
        assert_eq!(shared.command().force, Vector3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn cancelled_loop_exits_and_zeroes_force() {
        let probe = Arc::new(SimulationProbe::new());
        let shared = Arc::new(SharedState::new());
        let device_loop =
            DeviceLoop::new(opened_device(&probe), shared.clone(), true, FaultPolicy::default());

        shared.store_command(Vector3::new(1.0, 0.0, 0.0));
        shared.request_shutdown();
        let (_device, report) = device_loop.run();

        assert_eq!(report.exit, DeviceLoopExit::Stopped);
        assert_eq!(report.iterations, 0);
        assert_eq!(probe.last_force(), Vector3::ZERO);
    }
}
