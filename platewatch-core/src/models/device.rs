use serde::{Deserialize, Serialize};

use super::id::DeviceId;

/// One physical LPR unit reachable over TCP/TLS.
///
/// Created by the device registration layer; read-only to the fleet
/// subsystem. The `auth_token` is the shared secret presented during the
/// application-level handshake after the TLS connection is established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub id: DeviceId,
    pub host: String,
    pub port: u16,
    pub auth_token: String,
}

impl DeviceEndpoint {
    /// Socket address string for connecting (`host:port`)
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
