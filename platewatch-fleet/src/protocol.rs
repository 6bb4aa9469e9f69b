//! Wire protocol envelope and message classification.
//!
//! Every frame carries a JSON envelope
//! `{"messageId": <uuid>, "messageType": <string>, "messageBody": {...}}`.
//! Inbound envelopes are classified into [`InboundMessage`] variants;
//! unrecognized types land in `Unknown` and are never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use platewatch_core::models::{CameraId, CarDetection, LiveFrame, PlateEvent};

use crate::error::{Error, Result};

/// Message type sent by the core to authenticate a session
pub const TYPE_AUTHENTICATION: &str = "authentication";
/// Message type sent by the core to deliver a signed command
pub const TYPE_COMMAND: &str = "command";

/// JSON envelope shared by every frame in both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_body: Value,
}

impl Envelope {
    /// Parse an envelope out of a raw frame body
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame)
            .map_err(|e| Error::Protocol(format!("malformed envelope: {e}")))
    }

    /// Build the authentication envelope for the handshake.
    ///
    /// Returns the serialized frame together with the correlation id the
    /// session must match against the acknowledgment's `replyTo`.
    pub fn authentication(token: &str) -> Result<(String, String)> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = Self {
            message_id: message_id.clone(),
            message_type: TYPE_AUTHENTICATION.to_string(),
            message_body: serde_json::json!({ "token": token }),
        };
        let frame = serde_json::to_string(&envelope)?;
        Ok((frame, message_id))
    }
}

/// Inbound messages, classified by the envelope's `messageType`.
///
/// Immutable once parsed; consumed exactly once by the session dispatch.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Reply to an authentication message or a command
    Acknowledge {
        reply_to: Option<String>,
        role: Option<String>,
    },
    /// Device-side result of an earlier command; currently only logged
    CommandResponse { body: Value },
    /// A batch of plate detections for one camera
    PlatesData(PlateEvent),
    /// One live-view frame
    Live(LiveFrame),
    /// Anything else; counted and dropped with a warning
    Unknown { message_type: String },
}

impl InboundMessage {
    /// Classify a parsed envelope.
    ///
    /// Body fields the device omits take the documented defaults; only a
    /// body whose shape contradicts its declared type is an error.
    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        match envelope.message_type.as_str() {
            "acknowledge" => {
                let body: AcknowledgeBody = serde_json::from_value(envelope.message_body)
                    .map_err(|e| Error::Protocol(format!("malformed acknowledge body: {e}")))?;
                Ok(Self::Acknowledge {
                    reply_to: body.reply_to,
                    role: body.role,
                })
            }
            "command_response" => Ok(Self::CommandResponse {
                body: envelope.message_body,
            }),
            "plates_data" => {
                let body: RawPlatesBody = serde_json::from_value(envelope.message_body)
                    .map_err(|e| Error::Protocol(format!("malformed plates_data body: {e}")))?;
                Ok(Self::PlatesData(body.into()))
            }
            "live" => {
                let frame: LiveFrame = serde_json::from_value(envelope.message_body)
                    .map_err(|e| Error::Protocol(format!("malformed live body: {e}")))?;
                Ok(Self::Live(frame))
            }
            other => Ok(Self::Unknown {
                message_type: other.to_string(),
            }),
        }
    }

    /// Short description for logging
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Acknowledge { .. } => "acknowledge",
            Self::CommandResponse { .. } => "command_response",
            Self::PlatesData(_) => "plates_data",
            Self::Live(_) => "live",
            Self::Unknown { message_type } => message_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody {
    reply_to: Option<String>,
    role: Option<String>,
}

/// Raw `plates_data` body as the device sends it. Reshaped into the
/// stable [`PlateEvent`] schema before leaving this module.
#[derive(Debug, Deserialize)]
struct RawPlatesBody {
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    camera_id: CameraId,
    full_image: Option<String>,
    #[serde(default)]
    cars: Vec<RawCar>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCar {
    #[serde(default)]
    plate: RawPlate,
    #[serde(default)]
    ocr_accuracy: Value,
    #[serde(default)]
    vision_speed: f64,
    #[serde(default)]
    vehicle_class: Value,
    #[serde(default)]
    vehicle_type: Value,
    #[serde(default)]
    vehicle_color: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawPlate {
    plate: Option<String>,
    plate_image: Option<String>,
}

impl From<RawPlatesBody> for PlateEvent {
    fn from(body: RawPlatesBody) -> Self {
        Self {
            timestamp: body.timestamp,
            camera_id: body.camera_id,
            full_image: body.full_image,
            cars: body.cars.into_iter().map(CarDetection::from).collect(),
        }
    }
}

impl From<RawCar> for CarDetection {
    fn from(car: RawCar) -> Self {
        Self {
            plate_number: car
                .plate
                .plate
                .unwrap_or_else(|| "Unknown".to_string()),
            plate_image: car.plate.plate_image.unwrap_or_default(),
            ocr_accuracy: car.ocr_accuracy,
            vision_speed: car.vision_speed,
            vehicle_class: car.vehicle_class,
            vehicle_type: car.vehicle_type,
            vehicle_color: car.vehicle_color,
        }
    }
}
