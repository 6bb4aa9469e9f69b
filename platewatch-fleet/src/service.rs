//! Operational facade over the fleet subsystem.
//!
//! The web layer talks to devices exclusively through this service:
//! register/remove devices, send signed commands, and hand dashboard
//! sessions to the relay hub.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};

use platewatch_core::config::FleetConfig;
use platewatch_core::models::{CameraId, DeviceEndpoint, DeviceId};

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::relay::RelayHub;
use crate::signer::{CommandSigner, OutboundCommand};
use crate::supervisor::{DeviceSupervisor, SupervisorContext};
use crate::tls;

/// Entry point for the device connection and relay subsystem
pub struct FleetService {
    context: Arc<SupervisorContext>,
    supervisors: DashMap<DeviceId, DeviceSupervisor>,
}

impl std::fmt::Debug for FleetService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetService")
            .field("device_count", &self.supervisors.len())
            .finish_non_exhaustive()
    }
}

impl FleetService {
    /// Build the service from configuration.
    ///
    /// Fails only on invalid signing material; TLS material is checked
    /// per device at registration so one misconfigured device cannot
    /// block the rest.
    pub fn new(config: &FleetConfig) -> Result<Self> {
        let signer = Arc::new(CommandSigner::new(&config.signing.hmac_key)?);
        let context = Arc::new(SupervisorContext {
            registry: Arc::new(ConnectionRegistry::new()),
            hub: Arc::new(RelayHub::new(config.relay.live_emit_interval())),
            signer,
            tls: config.tls.clone(),
            reconnect: config.reconnect.clone(),
            handshake_timeout: config.session.handshake_timeout(),
        });
        Ok(Self {
            context,
            supervisors: DashMap::new(),
        })
    }

    /// Relay hub for the dashboard-facing layer
    #[must_use]
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.context.hub
    }

    /// Registry of live device sessions
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    /// Start supervising a device.
    ///
    /// Validates this device's TLS material up front; a failure here is
    /// fatal for this device only. Registering an id again replaces the
    /// existing supervisor after stopping it.
    pub async fn register_device(&self, endpoint: DeviceEndpoint) -> Result<()> {
        // Surface unusable TLS material at registration instead of
        // burying it in the retry loop.
        tls::build_connector(&self.context.tls)?;
        tls::server_name(&endpoint.host)?;

        let device_id = endpoint.id.clone();
        if let Some((_, previous)) = self.supervisors.remove(&device_id) {
            warn!(device_id = %device_id, "Device re-registered, replacing supervisor");
            previous.stop().await;
        }

        let supervisor = DeviceSupervisor::start(endpoint, self.context.clone());
        self.supervisors.insert(device_id.clone(), supervisor);
        info!(device_id = %device_id, "Device registered");
        Ok(())
    }

    /// Stop supervising a device: cancels pending retries, closes the
    /// live session, clears the registry entry. Removing an unknown
    /// device is a no-op.
    pub async fn remove_device(&self, device_id: &DeviceId) {
        if let Some((_, supervisor)) = self.supervisors.remove(device_id) {
            supervisor.stop().await;
            info!(device_id = %device_id, "Device removed");
        }
    }

    /// Sign and send a command to a device.
    ///
    /// Fails with `NotConnected` when the device has no `Ready` session;
    /// the caller decides whether to retry.
    pub fn send_command(
        &self,
        device_id: &DeviceId,
        command_type: impl Into<String>,
        camera_id: CameraId,
        payload: Value,
    ) -> Result<()> {
        let Some(handle) = self.context.registry.get(device_id) else {
            return Err(Error::NotConnected(device_id.clone()));
        };
        let command = OutboundCommand::new(command_type, camera_id, payload)?;
        handle.send_command(&command)
    }

    /// Devices with a registered supervisor
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.supervisors.len()
    }

    /// Devices whose session is currently `Ready`
    #[must_use]
    pub fn connected_devices(&self) -> Vec<DeviceId> {
        self.context
            .registry
            .all()
            .into_iter()
            .filter(|(_, handle)| handle.is_ready())
            .map(|(id, _)| id)
            .collect()
    }

    /// Stop every supervisor and close every session
    pub async fn shutdown(&self) {
        let device_ids: Vec<DeviceId> = self
            .supervisors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for device_id in device_ids {
            self.remove_device(&device_id).await;
        }
        info!("Fleet service shut down");
    }
}
