//! Device connection and real-time relay subsystem.
//!
//! Maintains one reconnecting TLS session per registered LPR device,
//! frames and dispatches the wire protocol, and fans decoded detection
//! events out to subscribed dashboard sessions.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod service;
pub mod session;
pub mod signer;
pub mod supervisor;
pub mod tls;

pub use error::{Error, Result};
pub use registry::ConnectionRegistry;
pub use relay::{RelayEvent, RelayHub};
pub use service::FleetService;
pub use session::{DeviceSession, SessionHandle, SessionState};
pub use signer::CommandSigner;
pub use supervisor::DeviceSupervisor;
