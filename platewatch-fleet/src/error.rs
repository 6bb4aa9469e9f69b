//! Error types for the fleet subsystem

use platewatch_core::models::DeviceId;
use thiserror::Error;

/// Fleet error types
#[derive(Debug, Error)]
pub enum Error {
    /// Connect, read, write or TLS handshake failure. Never fatal to the
    /// process; feeds the reconnection backoff path.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame or unexpected message shape. The offending frame
    /// is discarded; the connection stays up.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The authentication acknowledgment did not arrive in time
    #[error("Handshake timed out for device {0}")]
    HandshakeTimeout(DeviceId),

    /// A command was sent to a device with no authenticated session
    #[error("Device {0} is not connected")]
    NotConnected(DeviceId),

    /// Missing or invalid startup material (signing key, TLS files).
    /// Fatal for the affected device only.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A dashboard session attempted an operation its role does not permit
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fleet operations
pub type Result<T> = std::result::Result<T, Error>;
