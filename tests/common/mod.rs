#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use haptic_bridge::config::DriverConfig;
use haptic_bridge::device::{HapticDevice, SimulatedDevice, SimulationProbe, SimulationSettings};
use haptic_bridge::driver::FaultPolicy;
use haptic_bridge::transport::{OutboundMessage, Publisher, TransportError};

/// Publisher that keeps every message it is given
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    sent: Arc<Mutex<Vec<(String, OutboundMessage)>>>,
}

impl RecordingPublisher {
    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, message: &OutboundMessage) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), message.clone()));
        Ok(())
    }
}

pub fn instant_settings() -> SimulationSettings {
    SimulationSettings {
        io_period_us: 0,
        ..Default::default()
    }
}

/// Config with a fast device and a short shutdown timeout
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        node_name: "test_bridge".to_string(),
        publish_rate_hz: 500.0,
        shutdown_timeout_ms: 500,
        fault: FaultPolicy {
            max_consecutive_failures: 5,
            backoff_ms: 0,
        },
        simulation: SimulationSettings {
            io_period_us: 200,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn opened_device(probe: &Arc<SimulationProbe>) -> Box<dyn HapticDevice> {
    let mut device = SimulatedDevice::new(instant_settings(), probe.clone());
    device.open().unwrap();
    Box::new(device)
}

/// Polls `condition` every millisecond until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
