//! Shared state between the device loop, the publish loop and the force intake
//!
//! Composite values sit behind `ArcSwap` so every reader gets a whole snapshot
//! through one atomic pointer load, and scalar flags are plain atomics. Nothing
//! on the hot path takes a lock.
//!
//! # Force handoff
//!
//! ```text
//! ForceIntake ──store_command──► command (seq n), consumed = false
//! DeviceLoop  ──mark_applied(n)─► applied_seq = n, consumed = true
//! PublishLoop ──decay_if_consumed─► command = 0 if consumed and seq <= applied_seq
//! ```
//!
//! Decay swaps in the zero command with a compare-and-swap against the exact
//! snapshot it inspected, so a command stored between the check and the write is
//! never erased.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::device::{Vector3, BUTTON_COUNT};

/// Latest reading from the device, in the device frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceSample {
    pub position: Vector3,
    pub velocity: Vector3,
    pub buttons: [bool; BUTTON_COUNT],
}

/// Force the device should apply, in the device frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ForceCommand {
    pub force: Vector3,
    /// Sequence number of the intake call that produced this force, 0 for the
    /// initial command
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// Device loop has not completed an iteration yet
    #[default]
    Starting,
    Healthy,
    /// Device I/O is failing but the failure budget is not exhausted
    Degraded,
    /// Device I/O failed too often; the driver is shutting down
    Faulted,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "Starting"),
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Faulted => write!(f, "Faulted"),
        }
    }
}

pub struct SharedState {
    sample: ArcSwap<DeviceSample>,
    command: ArcSwap<ForceCommand>,
    /// true while no stored command is waiting to reach the device
    consumed: AtomicBool,
    applied_seq: AtomicU64,
    decays: AtomicU64,
    run: CancellationToken,
    health: watch::Sender<HealthStatus>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        let (health, _) = watch::channel(HealthStatus::Starting);
        Self {
            sample: ArcSwap::from_pointee(DeviceSample::default()),
            command: ArcSwap::from_pointee(ForceCommand::default()),
            consumed: AtomicBool::new(true),
            applied_seq: AtomicU64::new(0),
            decays: AtomicU64::new(0),
            run: CancellationToken::new(),
            health,
        }
    }

    pub fn publish_sample(&self, sample: DeviceSample) {
        self.sample.store(Arc::new(sample));
    }

    pub fn sample(&self) -> DeviceSample {
        **self.sample.load()
    }

    /// Stores a new device-frame force and returns its sequence number.
    ///
    /// Marks the command as not yet consumed.
    pub fn store_command(&self, force: Vector3) -> u64 {
        let previous = self.command.rcu(|current| ForceCommand {
            force,
            seq: current.seq + 1,
        });
        self.consumed.store(false, Ordering::Release);
        previous.seq + 1
    }

    pub fn command(&self) -> ForceCommand {
        **self.command.load()
    }

    /// Records that the command with `seq` was written to the device
    pub fn mark_applied(&self, seq: u64) {
        self.applied_seq.fetch_max(seq, Ordering::AcqRel);
        self.consumed.store(true, Ordering::Release);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied_seq.load(Ordering::Acquire)
    }

    /// Resets the commanded force to zero if the current command already
    /// reached the device and nothing newer arrived since.
    ///
    /// Returns true when a nonzero force was actually reset.
    pub fn decay_if_consumed(&self) -> bool {
        if !self.is_consumed() {
            return false;
        }

        let current = self.command.load_full();
        if current.seq > self.applied_seq() || current.force == Vector3::ZERO {
            return false;
        }

        let zeroed = Arc::new(ForceCommand {
            force: Vector3::ZERO,
            seq: current.seq,
        });
        let previous = self.command.compare_and_swap(&current, zeroed);
        let swapped = Arc::ptr_eq(&*previous, &current);
        if swapped {
            self.decays.fetch_add(1, Ordering::Relaxed);
            debug!("Force command {} decayed to zero", current.seq);
        }
        swapped
    }

    /// Number of times a nonzero force was reset by decay
    pub fn decay_count(&self) -> u64 {
        self.decays.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.run.is_cancelled()
    }

    pub fn request_shutdown(&self) {
        self.run.cancel();
    }

    pub fn run_token(&self) -> CancellationToken {
        self.run.clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<HealthStatus> {
        self.health.subscribe()
    }

    pub fn health(&self) -> HealthStatus {
        *self.health.borrow()
    }

    pub fn report_health(&self, status: HealthStatus) {
        self.health.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
