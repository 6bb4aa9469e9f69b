//! Events delivered to dashboard sessions through the relay hub.

use serde::Serialize;

use platewatch_core::models::{CameraId, LiveFrame, PlateEvent, StreamKind};

/// An event pushed to a dashboard session's channel. The web layer
/// forwards these to the client socket verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "messageType", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Plate detections for one camera
    #[serde(rename = "plates_data")]
    Plates(PlateEvent),

    /// One sampled live-view frame
    Live(LiveFrame),

    /// Subscription request accepted
    RequestAcknowledged {
        status: String,
        data_type: StreamKind,
    },

    /// Request rejected or delivery problem, addressed to one session
    Error { message: String },
}

impl RelayEvent {
    /// Acknowledgment for a successful subscription request
    #[must_use]
    pub fn subscribed(kind: StreamKind) -> Self {
        Self::RequestAcknowledged {
            status: "subscribed".to_string(),
            data_type: kind,
        }
    }

    /// Camera this event belongs to, when it carries one
    #[must_use]
    pub fn camera_id(&self) -> Option<&CameraId> {
        match self {
            Self::Plates(event) => Some(&event.camera_id),
            Self::Live(frame) => Some(&frame.camera_id),
            Self::RequestAcknowledged { .. } | Self::Error { .. } => None,
        }
    }

    /// Short description of the event type
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Plates(_) => "plates_data",
            Self::Live(_) => "live",
            Self::RequestAcknowledged { .. } => "request_acknowledged",
            Self::Error { .. } => "error",
        }
    }
}
