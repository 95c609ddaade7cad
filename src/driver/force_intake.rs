use std::sync::Arc;

use tracing::debug;

use super::state::SharedState;
use crate::device::Vector3;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Force command {0} has a non-finite axis")]
    NonFinite(Vector3),

    #[error("Malformed force payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Entry point for inbound force commands.
///
/// Cheap to clone; every clone writes into the same shared state.
#[derive(Clone)]
pub struct ForceIntake {
    shared: Arc<SharedState>,
    max_force: f64,
}

impl ForceIntake {
    pub fn new(shared: Arc<SharedState>, max_force: f64) -> Self {
        Self { shared, max_force }
    }

    pub fn max_force(&self) -> f64 {
        self.max_force
    }

    /// Clamps a commander-frame force, maps it onto the device axes and stores
    /// it as the pending command. Returns the command's sequence number.
    ///
    /// Commands with a NaN or infinite axis are rejected as a whole and leave
    /// the current command untouched.
    pub fn handle(&self, command: Vector3) -> Result<u64, IntakeError> {
        if !command.is_finite() {
            return Err(IntakeError::NonFinite(command));
        }

        let force = command.clamp_axes(self.max_force).command_to_device();
        let seq = self.shared.store_command(force);
        debug!("Stored force command {}: {} -> device {}", seq, command, force);
        Ok(seq)
    }

    /// Decodes a JSON `{"x", "y", "z"}` payload and handles it
    pub fn handle_payload(&self, payload: &[u8]) -> Result<u64, IntakeError> {
        let command: Vector3 = serde_json::from_slice(payload)?;
        self.handle(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(max_force: f64) -> (ForceIntake, Arc<SharedState>) {
        let shared = Arc::new(SharedState::new());
        (ForceIntake::new(shared.clone(), max_force), shared)
    }

    #[test]
    fn oversized_command_is_clamped_then_permuted() {
        let (intake, shared) = intake(2.0);
        let seq = intake.handle(Vector3::new(50.0, -5.0, 3.0)).unwrap();

        let command = shared.command();
        assert_eq!(seq, 1);
        assert_eq!(command.seq, 1);
        // (2, -2, 2) in the command frame, z/x/y on the device
        assert_eq!(command.force, Vector3::new(2.0, 2.0, -2.0));
        assert!(!shared.is_consumed());
    }

    #[test]
    fn command_within_bounds_passes_through() {
        let (intake, shared) = intake(5.0);
        intake.handle(Vector3::new(1.0, -2.0, 3.0)).unwrap();
        assert_eq!(shared.command().force, Vector3::new(3.0, 1.0, -2.0));
    }

    #[test]
    fn non_finite_command_is_rejected_without_side_effects() {
        let (intake, shared) = intake(5.0);
        intake.handle(Vector3::new(1.0, 1.0, 1.0)).unwrap();
        shared.mark_applied(1);

        let result = intake.handle(Vector3::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(result, Err(IntakeError::NonFinite(_))));
        assert!(shared.is_consumed());
        assert_eq!(shared.command().seq, 1);
    }

    #[test]
    fn payload_is_decoded_from_json() {
        let (intake, shared) = intake(5.0);
        intake.handle_payload(br#"{"x": 0.5, "y": 0.0, "z": -1.0}"#).unwrap();
        assert_eq!(shared.command().force, Vector3::new(-1.0, 0.5, 0.0));

        assert!(matches!(
            intake.handle_payload(b"not json"),
            Err(IntakeError::Decode(_))
        ));
    }
}
