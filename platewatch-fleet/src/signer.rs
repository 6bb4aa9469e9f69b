//! HMAC signing for outbound device commands.
//!
//! The device recomputes the signature over the exact serialized `data`
//! bytes and rejects mismatches. Inbound messages are not verified here;
//! devices are trusted once their session is authenticated.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use uuid::Uuid;

use platewatch_core::models::CameraId;

use crate::error::{Error, Result};
use crate::protocol::TYPE_COMMAND;

type HmacSha256 = Hmac<Sha256>;

/// A command addressed to one camera on a device.
///
/// `payload` carries command-specific fields (duration, presets, ...)
/// flattened next to the routing fields, matching the device firmware's
/// expected `data` shape.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCommand {
    #[serde(rename = "commandType")]
    pub command_type: String,
    pub camera_id: CameraId,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl OutboundCommand {
    /// Build a command, accepting any JSON object (or null) as payload
    pub fn new(command_type: impl Into<String>, camera_id: CameraId, payload: Value) -> Result<Self> {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(Error::Protocol(format!(
                    "command payload must be a JSON object, got {other}"
                )))
            }
        };
        Ok(Self {
            command_type: command_type.into(),
            camera_id,
            payload,
        })
    }
}

/// Signs outbound command payloads with HMAC-SHA256.
///
/// Construction fails on an empty key; signing itself never fails.
#[derive(Debug)]
pub struct CommandSigner {
    mac: HmacSha256,
}

impl CommandSigner {
    /// Create a signer from the configured shared key
    pub fn new(key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Configuration(
                "command signing key must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid signing key: {e}")))?;
        Ok(Self { mac })
    }

    /// Serialize the command data, sign the exact bytes, and wrap both in
    /// a `command` envelope ready for framing.
    pub fn sign(&self, command: &OutboundCommand) -> Result<String> {
        let data = serde_json::to_value(command)?;
        let data_str = serde_json::to_string(&data)?;
        let signature = self.signature_hex(data_str.as_bytes());

        let envelope = serde_json::json!({
            "messageId": Uuid::new_v4().to_string(),
            "messageType": TYPE_COMMAND,
            "messageBody": {
                "data": data,
                "hmac": signature,
            }
        });
        Ok(envelope.to_string())
    }

    fn signature_hex(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        hex::encode(mac.finalize().into_bytes())
    }
}
