use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ACK_TIMEOUT, DEFAULT_BELT_NAME, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_JOIN_TIMEOUT};
use crate::error::{BeltError, Result};
use crate::orientation::Orientation;
use crate::transport::BeltAddress;

/// Settings of a [`BeltController`](crate::BeltController).
///
/// Loaded from JSON, with every field optional:
///
/// ```json
/// { "vibromotor_offset": 2, "invert_signal": false, "ack_timeout_ms": 500,
///   "address": { "type": "serial", "path": "/dev/rfcomm0" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeltConfig {
    pub vibromotor_offset: i32,
    pub invert_signal: bool,
    #[serde(rename = "ack_timeout_ms", with = "millis")]
    pub ack_timeout: Duration,
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,
    #[serde(rename = "join_timeout_ms", with = "millis")]
    pub join_timeout: Duration,
    /// Name fragment used by discovery
    pub belt_name: String,
    pub address: Option<BeltAddress>,
}

impl Default for BeltConfig {
    fn default() -> Self {
        Self {
            vibromotor_offset: 0,
            invert_signal: false,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            belt_name: DEFAULT_BELT_NAME.to_string(),
            address: None,
        }
    }
}

impl BeltConfig {
    pub fn orientation(&self) -> Orientation {
        Orientation::new(self.vibromotor_offset, self.invert_signal)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BeltError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| BeltError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
