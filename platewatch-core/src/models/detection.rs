use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::CameraId;

/// One detected vehicle within a plates event, reshaped into the stable
/// schema the dashboard layer consumes.
///
/// Devices omit fields freely; the reshaping substitutes the documented
/// defaults instead of failing the whole event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarDetection {
    /// Recognized plate text ("Unknown" when the device omits it)
    pub plate_number: String,
    /// Base64 crop of the plate region (empty when omitted)
    pub plate_image: String,
    /// OCR confidence as reported by the device
    #[serde(default)]
    pub ocr_accuracy: Value,
    /// Estimated speed from the vision pipeline
    pub vision_speed: f64,
    /// Device-specific vehicle classification maps, passed through verbatim
    #[serde(default)]
    pub vehicle_class: Value,
    #[serde(default)]
    pub vehicle_type: Value,
    #[serde(default)]
    pub vehicle_color: Value,
}

/// A plate detection event for one camera, carrying every vehicle the
/// device saw in the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateEvent {
    /// Device-reported capture timestamp, passed through verbatim
    #[serde(default)]
    pub timestamp: Value,
    pub camera_id: CameraId,
    /// Optional base64 full-frame image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_image: Option<String>,
    pub cars: Vec<CarDetection>,
}

/// A single sampled live-view frame from one camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFrame {
    /// Base64 frame image
    #[serde(default)]
    pub live_image: String,
    #[serde(default)]
    pub camera_id: CameraId,
}
