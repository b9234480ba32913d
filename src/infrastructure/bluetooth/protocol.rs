//! Provisioning Protocol
//!
//! UUIDs of the provisioning service, decoding of command writes and
//! encoding of the payloads pushed over the status characteristic.

use crate::domain::errors::{DecodeError, NetworkError};
use crate::domain::models::{CharacteristicId, Command, ConnectionOutcome, NetworkEntry};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Provisioning service UUID (primary)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef1);

/// Command characteristic UUID - read + write-without-response
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// Status characteristic UUID - notify
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef2);

/// Default advertised local name
pub const DEVICE_NAME: &str = "RaspiBLE";

/// Literal write that triggers a Wi-Fi scan
pub const SCAN_TOKEN: &str = "SCAN_WIFI";

/// Error code sent when a write cannot be decoded
pub const MALFORMED_COMMAND: &str = "malformed_command";

/// Static description of the service exposed to BlueZ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_uuid: Uuid,
    pub command_uuid: Uuid,
    pub status_uuid: Uuid,
    pub device_name: String,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self::with_device_name(DEVICE_NAME)
    }
}

impl ServiceDescriptor {
    pub fn with_device_name(name: &str) -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            command_uuid: COMMAND_CHAR_UUID,
            status_uuid: STATUS_CHAR_UUID,
            device_name: name.to_string(),
        }
    }

    /// Map a characteristic UUID back to its role in the service
    pub fn characteristic(&self, uuid: Uuid) -> Option<CharacteristicId> {
        if uuid == self.command_uuid {
            Some(CharacteristicId::Command)
        } else if uuid == self.status_uuid {
            Some(CharacteristicId::Status)
        } else {
            None
        }
    }
}

/// Decode the bytes written to the command characteristic.
///
/// Accepts either the literal [`SCAN_TOKEN`] or a JSON object with
/// string fields `ssid` and `password`. Everything else, including arrays
/// and empty credentials, is rejected with [`DecodeError::Malformed`].
pub fn decode(bytes: &[u8]) -> Result<Command, DecodeError> {
    let malformed = || DecodeError::Malformed { len: bytes.len() };

    let text = std::str::from_utf8(bytes).map_err(|_| malformed())?;
    if text == SCAN_TOKEN {
        return Ok(Command::Scan);
    }

    let object: Map<String, Value> = serde_json::from_str(text).map_err(|_| malformed())?;
    let field = |name: &str| match object.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    match (field("ssid"), field("password")) {
        (Some(ssid), Some(password)) => Ok(Command::Connect { ssid, password }),
        _ => Err(malformed()),
    }
}

/// Everything the status characteristic can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusPayload {
    Networks(Vec<NetworkEntry>),
    Connection(ConnectionOutcome),
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl StatusPayload {
    pub fn malformed_command() -> Self {
        Self::Error {
            error: MALFORMED_COMMAND.to_string(),
            detail: None,
        }
    }

    pub fn network_error(err: &NetworkError) -> Self {
        Self::Error {
            error: err.code().to_string(),
            detail: Some(err.reason().to_string()),
        }
    }

    /// UTF-8 JSON bytes as sent over the air
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
