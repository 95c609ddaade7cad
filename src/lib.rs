//! # haptic-bridge
//!
//! Bridges a force-feedback device to an MQTT broker. Device pose, velocity and
//! switch state are sampled at device rate and republished at a fixed control
//! rate, while inbound force commands are clamped and handed to the device.
//!
//! ```text
//!                ┌──────────────── SharedState ────────────────┐
//! HapticDevice ◄─┤ DeviceLoop (thread)      PublishLoop (tokio) ├─► Publisher
//!                │        ▲                                     │
//!                │        └──── ForceCommand ◄── ForceIntake ◄──┼── ForceDispatcher
//!                └──────────────────────────────────────────────┘
//! ```
//!
//! - [`device`] - device SDK surface and a simulated backend
//! - [`driver`] - the two loops, the intake handler and the driver lifecycle
//! - [`transport`] - outbound messages and the MQTT client
//! - [`config`] - TOML configuration

pub mod config;
pub mod device;
pub mod driver;
pub mod transport;
