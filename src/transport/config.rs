use serde::{Deserialize, Serialize};

/// Names of the three outbound topics and the inbound force topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub position: String,
    pub velocity: String,
    pub buttons: String,
    pub force: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            position: "haptic/position".to_string(),
            velocity: "haptic/velocity".to_string(),
            buttons: "haptic/buttons".to_string(),
            force: "haptic/force".to_string(),
        }
    }
}

impl TopicConfig {
    pub fn all(&self) -> [&str; 4] {
        [&self.position, &self.velocity, &self.buttons, &self.force]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Capacity of the client request channel
    pub channel_capacity: usize,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 5,
            channel_capacity: 100,
            user: None,
            password: None,
        }
    }
}
