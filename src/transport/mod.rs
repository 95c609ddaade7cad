//! # Messaging transport
//!
//! Outbound state leaves the driver through the [`Publisher`] trait; inbound
//! force commands arrive through the [`mqtt_handler::ForceDispatcher`], which
//! decodes them and hands them to the driver's force intake.
//!
//! ```text
//! transport/
//! ├── config.rs        - topic names and broker settings
//! ├── messages.rs      - outbound message shapes and their JSON encoding
//! └── mqtt_handler.rs  - rumqttc publisher and inbound dispatch task
//! ```
//!
//! Payloads are JSON. Position and velocity are published as
//! [`messages::Vector3Stamped`], switches as [`messages::ButtonArray`], and the
//! inbound force topic carries a bare `{"x": .., "y": .., "z": ..}` object.

pub mod config;
pub mod messages;
pub mod mqtt_handler;

pub use config::{MqttSettings, TopicConfig};
pub use messages::{ButtonArray, Header, OutboundMessage, Vector3Stamped};
pub use mqtt_handler::{ConnectionState, DispatchStats, ForceDispatcher, MqttPublisher, MqttTransport};

use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Publish on {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Sink for outbound driver messages
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
