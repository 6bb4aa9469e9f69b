use serde::{Deserialize, Serialize};

/// Kind of real-time stream a dashboard client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Sampled live-view frames
    Live,
    /// Plate detection events
    #[serde(rename = "plates_data")]
    Plates,
}

impl StreamKind {
    /// Wire/event name of the stream kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Plates => "plates_data",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role associated with a dashboard session.
///
/// Live view is restricted to admins; plate data is available to admins
/// and operators. Viewers may hold a session but subscribe to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    /// Whether this role may subscribe to the given stream kind
    #[must_use]
    pub const fn can_subscribe(self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Live => matches!(self, Self::Admin),
            StreamKind::Plates => matches!(self, Self::Admin | Self::Operator),
        }
    }
}
