use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{Vector3, BUTTON_COUNT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

/// Position or velocity sample in the message frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector3Stamped {
    pub header: Header,
    pub vector: Vector3,
}

/// Switch states in switch-index order, 1 for pressed and 0 for released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonArray {
    pub data: [i8; BUTTON_COUNT],
}

impl ButtonArray {
    pub fn from_switches(switches: [bool; BUTTON_COUNT]) -> Self {
        Self {
            data: switches.map(i8::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Stamped(Vector3Stamped),
    Buttons(ButtonArray),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            OutboundMessage::Stamped(message) => serde_json::to_vec(message),
            OutboundMessage::Buttons(message) => serde_json::to_vec(message),
        }
    }
}
