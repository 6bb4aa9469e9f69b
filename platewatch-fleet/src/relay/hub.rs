//! In-memory hub routing device events to subscribed dashboard sessions.
//!
//! Subscriptions are keyed by (stream kind, camera id) per dashboard
//! session. Plate events always reach every matching subscriber; live
//! frames are sampled against a single global interval clock and dropped,
//! not queued, when they arrive faster.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use platewatch_core::models::{CameraId, DashboardSessionId, Role, StreamKind};

use crate::error::{Error, Result};

use super::events::RelayEvent;

/// One registered dashboard session
#[derive(Debug)]
struct DashboardSession {
    role: Role,
    sender: mpsc::UnboundedSender<RelayEvent>,
}

/// Subscription-based fan-out broadcaster for device events
pub struct RelayHub {
    /// Registered dashboard sessions by id
    sessions: DashMap<DashboardSessionId, DashboardSession>,

    /// Per stream kind: which cameras each session asked for
    live_requests: DashMap<DashboardSessionId, HashSet<CameraId>>,
    plates_requests: DashMap<DashboardSessionId, HashSet<CameraId>>,

    /// Minimum interval between live deliveries (one clock for the whole
    /// live stream, matching the device-relay behavior)
    live_emit_interval: Duration,
    last_live_emit: Mutex<Option<Instant>>,
}

impl RelayHub {
    #[must_use]
    pub fn new(live_emit_interval: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            live_requests: DashMap::new(),
            plates_requests: DashMap::new(),
            live_emit_interval,
            last_live_emit: Mutex::new(None),
        }
    }

    const fn requests(&self, kind: StreamKind) -> &DashMap<DashboardSessionId, HashSet<CameraId>> {
        match kind {
            StreamKind::Live => &self.live_requests,
            StreamKind::Plates => &self.plates_requests,
        }
    }

    /// Register a dashboard session and return its event receiver.
    ///
    /// Re-registering an id replaces the previous channel (the old
    /// receiver sees the stream end).
    pub fn register_session(
        &self,
        session_id: DashboardSessionId,
        role: Role,
    ) -> mpsc::UnboundedReceiver<RelayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .insert(session_id.clone(), DashboardSession { role, sender: tx });
        info!(session_id = %session_id, role = ?role, "Dashboard session registered");
        rx
    }

    /// Subscribe a session to one camera on one stream kind.
    ///
    /// Role-gated: unauthorized requests receive an explicit error event
    /// on their channel and an `Err` here. Adding an existing
    /// subscription is a no-op.
    pub fn subscribe(
        &self,
        session_id: &DashboardSessionId,
        kind: StreamKind,
        camera_id: CameraId,
    ) -> Result<()> {
        let Some(session) = self.sessions.get(session_id) else {
            return Err(Error::Unauthorized(format!(
                "unknown dashboard session {session_id}"
            )));
        };

        if !session.role.can_subscribe(kind) {
            let _ = session.sender.send(RelayEvent::Error {
                message: "Unauthorized to access this data".to_string(),
            });
            warn!(
                session_id = %session_id,
                stream = %kind,
                role = ?session.role,
                "Unauthorized subscription attempt rejected"
            );
            return Err(Error::Unauthorized(format!(
                "role {:?} may not subscribe to {kind}",
                session.role
            )));
        }

        let _ = session.sender.send(RelayEvent::subscribed(kind));
        drop(session);

        self.requests(kind)
            .entry(session_id.clone())
            .or_default()
            .insert(camera_id.clone());

        info!(
            session_id = %session_id,
            stream = %kind,
            camera_id = %camera_id,
            "Dashboard session subscribed"
        );
        Ok(())
    }

    /// Remove one subscription. Removing a non-existent subscription is a
    /// no-op; the session's entry disappears once its camera set drains.
    pub fn unsubscribe(
        &self,
        session_id: &DashboardSessionId,
        kind: StreamKind,
        camera_id: &CameraId,
    ) {
        let requests = self.requests(kind);
        if let Some(mut cameras) = requests.get_mut(session_id) {
            cameras.remove(camera_id);
            if cameras.is_empty() {
                drop(cameras);
                requests.remove(session_id);
            }
            debug!(
                session_id = %session_id,
                stream = %kind,
                camera_id = %camera_id,
                "Dashboard session unsubscribed"
            );
        }
    }

    /// Remove a session from every stream kind (dashboard disconnect)
    pub fn drop_session(&self, session_id: &DashboardSessionId) {
        self.live_requests.remove(session_id);
        self.plates_requests.remove(session_id);
        if self.sessions.remove(session_id).is_some() {
            info!(session_id = %session_id, "Dashboard session dropped");
        }
    }

    /// Route an event to every matching subscriber.
    ///
    /// Plate events are delivered unconditionally. Live frames are
    /// delivered only when the global emit interval has elapsed;
    /// early frames are dropped, never queued. Returns the number of
    /// sessions the event was delivered to.
    pub fn publish(&self, kind: StreamKind, event: RelayEvent) -> usize {
        if kind == StreamKind::Live && !self.live_interval_elapsed() {
            return 0;
        }

        let Some(camera_id) = event.camera_id().cloned() else {
            debug!(stream = %kind, "Event without camera id, not routed");
            return 0;
        };

        let mut sent = 0usize;
        let mut failed = Vec::new();

        for entry in self.requests(kind).iter() {
            if !entry.value().contains(&camera_id) {
                continue;
            }
            let session_id = entry.key();
            match self.sessions.get(session_id) {
                Some(session) => {
                    if session.sender.send(event.clone()).is_ok() {
                        sent += 1;
                    } else {
                        warn!(
                            session_id = %session_id,
                            stream = %kind,
                            "Dashboard channel closed, marking for cleanup"
                        );
                        failed.push(session_id.clone());
                    }
                }
                None => failed.push(session_id.clone()),
            }
        }

        for session_id in failed {
            self.drop_session(&session_id);
        }

        if sent > 0 {
            debug!(
                stream = %kind,
                camera_id = %camera_id,
                sent = sent,
                "Event broadcast complete"
            );
        }
        sent
    }

    /// Check the global live-stream clock and advance it when the
    /// interval has elapsed.
    fn live_interval_elapsed(&self) -> bool {
        let mut last = self.last_live_emit.lock();
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.live_emit_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Number of registered dashboard sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of sessions holding at least one subscription for a kind
    #[must_use]
    pub fn subscriber_count(&self, kind: StreamKind) -> usize {
        self.requests(kind).len()
    }
}
