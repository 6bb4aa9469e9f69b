//! Process-wide table of live device sessions.
//!
//! The single source of truth for "is device X currently reachable".
//! At most one live session per device: inserting for an id replaces the
//! previous handle, and supervisors only insert after the prior session
//! for that device has terminated.

use dashmap::DashMap;

use platewatch_core::models::DeviceId;

use crate::session::SessionHandle;

/// Thread-safe device-id → session-handle table
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<DeviceId, SessionHandle>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the live session for a device. Returns the
    /// handle that was replaced, if any.
    pub fn insert(&self, device_id: DeviceId, handle: SessionHandle) -> Option<SessionHandle> {
        let previous = self.sessions.insert(device_id.clone(), handle);
        if previous.is_some() {
            tracing::debug!(device_id = %device_id, "Replaced registry entry for device");
        }
        previous
    }

    pub fn remove(&self, device_id: &DeviceId) -> Option<SessionHandle> {
        self.sessions.remove(device_id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> Option<SessionHandle> {
        self.sessions.get(device_id).map(|entry| entry.clone())
    }

    /// Snapshot of every registered device and its session handle
    #[must_use]
    pub fn all(&self) -> Vec<(DeviceId, SessionHandle)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
