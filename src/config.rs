//! Driver configuration
//!
//! Everything is fixed at construction. The file is TOML; every key is
//! optional and falls back to the defaults below.
//!
//! ```toml
//! node_name = "haptic_bridge"
//! publish_rate_hz = 1000.0
//! force_output = true
//! max_force = 5.0
//!
//! [topics]
//! force = "haptic/force"
//!
//! [mqtt]
//! host = "localhost"
//! port = 1883
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::device::SimulationSettings;
use crate::driver::FaultPolicy;
use crate::transport::{MqttSettings, TopicConfig};

const DEFAULT_PUBLISH_PERIOD: Duration = Duration::from_millis(1);

/// `None` when the period overflows `Duration` or rounds down to zero
fn period_for_rate(rate_hz: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Identity of this driver; used as frame id and MQTT client id
    pub node_name: String,
    pub publish_rate_hz: f64,
    /// When false the device always receives zero force
    pub force_output: bool,
    /// Per-axis clamp bound for inbound force commands, in newtons
    pub max_force: f64,
    pub device_index: usize,
    pub shutdown_timeout_ms: u64,
    pub topics: TopicConfig,
    pub mqtt: MqttSettings,
    pub fault: FaultPolicy,
    pub simulation: SimulationSettings,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_name: "haptic_bridge".to_string(),
            publish_rate_hz: 1000.0,
            force_output: true,
            max_force: 5.0,
            device_index: 0,
            shutdown_timeout_ms: 2000,
            topics: TopicConfig::default(),
            mqtt: MqttSettings::default(),
            fault: FaultPolicy::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl DriverConfig {
    /// `<config dir>/haptic-bridge/config.toml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("haptic-bridge").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads an explicitly given file, otherwise the file at the default
    /// location if it exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No configuration file found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.publish_rate_hz.is_finite() || self.publish_rate_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "publish_rate_hz must be positive, got {}",
                self.publish_rate_hz
            )));
        }
        if period_for_rate(self.publish_rate_hz).is_none() {
            return Err(ConfigError::Invalid(format!(
                "publish_rate_hz {} does not give a representable non-zero period",
                self.publish_rate_hz
            )));
        }
        if !self.max_force.is_finite() || self.max_force <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_force must be positive, got {}",
                self.max_force
            )));
        }
        if self.node_name.is_empty() {
            return Err(ConfigError::Invalid("node_name must not be empty".to_string()));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.fault.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "fault.max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        let topics = self.topics.all();
        if topics.iter().any(|topic| topic.is_empty()) {
            return Err(ConfigError::Invalid("topic names must not be empty".to_string()));
        }
        let unique: HashSet<&str> = topics.iter().copied().collect();
        if unique.len() != topics.len() {
            return Err(ConfigError::Invalid("topic names must be distinct".to_string()));
        }
        Ok(())
    }

    /// Period of the publish loop. Falls back to the default rate for a
    /// config that was never validated.
    pub fn publish_period(&self) -> Duration {
        period_for_rate(self.publish_rate_hz).unwrap_or(DEFAULT_PUBLISH_PERIOD)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = DriverConfig::default();
        config.validate().unwrap();
        assert_eq!(config.publish_period(), Duration::from_millis(1));
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = DriverConfig::from_toml(
            r#"
            publish_rate_hz = 250.0
            force_output = false

            [topics]
            force = "falcon/force"

            [mqtt]
            host = "broker.local"
            "#,
        )
        .unwrap();

        assert_eq!(config.publish_period(), Duration::from_millis(4));
        assert!(!config.force_output);
        assert_eq!(config.topics.force, "falcon/force");
        assert_eq!(config.topics.position, "haptic/position");
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.max_force, 5.0);
    }

    #[test]
    fn non_positive_bounds_are_rejected() {
        assert!(matches!(
            DriverConfig::from_toml("publish_rate_hz = 0.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            DriverConfig::from_toml("max_force = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rates_without_a_usable_period_are_rejected() {
        // Period overflows Duration
        assert!(matches!(
            DriverConfig::from_toml("publish_rate_hz = 1.0e-30"),
            Err(ConfigError::Invalid(_))
        ));
        // Period rounds down to zero
        assert!(matches!(
            DriverConfig::from_toml("publish_rate_hz = 1.0e12"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(DriverConfig::from_toml("publish_rate_hz = 0.001").is_ok());
    }

    #[test]
    fn unvalidated_rate_never_yields_a_zero_period() {
        let config = DriverConfig {
            publish_rate_hz: 1.0e12,
            ..Default::default()
        };
        assert!(!config.publish_period().is_zero());
        assert!(config.validate().is_err());
    }

    #[test]
    fn shared_topic_names_are_rejected() {
        let result = DriverConfig::from_toml(
            r#"
            [topics]
            position = "haptic/state"
            velocity = "haptic/state"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DriverConfig::from_toml("publish_rate_hz = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_name = \"falcon\"\nmax_force = 2.0").unwrap();

        let config = DriverConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.node_name, "falcon");
        assert_eq!(config.max_force, 2.0);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DriverConfig::load_or_default(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
