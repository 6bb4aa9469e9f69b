//! One authenticated session over one device connection.
//!
//! State machine: `Connecting -> Authenticating -> Ready -> Closed`.
//! Immediately after the transport is up the session sends an
//! authentication message and waits (bounded) for the matching
//! acknowledgment; frames arriving before that point are logged, never
//! routed. While `Ready`, decoded frames dispatch by message type to the
//! relay hub. Commands are only written on a `Ready` session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use platewatch_core::models::{DeviceId, StreamKind};

use crate::codec::DelimitedCodec;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, InboundMessage};
use crate::relay::{RelayEvent, RelayHub};
use crate::signer::{CommandSigner, OutboundCommand};

/// Device session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    Closed,
}

/// Shared view of a running session: state inspection and command entry
/// point. Stored in the connection registry; cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    device_id: DeviceId,
    state: Arc<Mutex<SessionState>>,
    outbound: mpsc::UnboundedSender<String>,
    signer: Arc<CommandSigner>,
}

impl SessionHandle {
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Sign and queue a command for this device.
    ///
    /// Only permitted while `Ready`; otherwise surfaces `NotConnected`
    /// without touching the transport.
    pub fn send_command(&self, command: &OutboundCommand) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotConnected(self.device_id.clone()));
        }
        let frame = self.signer.sign(command)?;
        self.outbound
            .send(frame)
            .map_err(|_| Error::NotConnected(self.device_id.clone()))
    }
}

/// Drives one device connection to completion.
///
/// Generic over the transport so tests can run it over an in-memory
/// duplex pipe instead of a TLS stream.
pub struct DeviceSession {
    device_id: DeviceId,
    auth_token: String,
    state: Arc<Mutex<SessionState>>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    hub: Arc<RelayHub>,
    handshake_timeout: std::time::Duration,
    unknown_messages: AtomicU64,
}

impl DeviceSession {
    /// Create a session for a freshly connected transport.
    ///
    /// Returns the session (to be driven with [`DeviceSession::run`]) and
    /// the handle for the registry.
    #[must_use]
    pub fn new(
        device_id: DeviceId,
        auth_token: String,
        signer: Arc<CommandSigner>,
        hub: Arc<RelayHub>,
        handshake_timeout: std::time::Duration,
    ) -> (Self, SessionHandle) {
        let state = Arc::new(Mutex::new(SessionState::Connecting));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let handle = SessionHandle {
            device_id: device_id.clone(),
            state: state.clone(),
            outbound: outbound_tx,
            signer,
        };
        let session = Self {
            device_id,
            auth_token,
            state,
            outbound_rx,
            hub,
            handshake_timeout,
            unknown_messages: AtomicU64::new(0),
        };
        (session, handle)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock() = next;
    }

    /// Run the session until the transport fails, the handshake times
    /// out, or the connection is closed. The state is `Closed` on return;
    /// the owning supervisor observes the return exactly once.
    pub async fn run<T>(mut self, transport: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = self.drive(transport).await;
        self.set_state(SessionState::Closed);
        let dropped = self.unknown_messages.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!(
                device_id = %self.device_id,
                unknown_messages = dropped,
                "Session dropped unknown messages"
            );
        }
        result
    }

    async fn drive<T>(&mut self, transport: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut framed = Framed::new(transport, DelimitedCodec::new());

        // Transport is up: authenticate before anything else.
        self.set_state(SessionState::Authenticating);
        let (auth_frame, auth_id) = Envelope::authentication(&self.auth_token)?;
        framed
            .send(auth_frame)
            .await
            .map_err(|e| Error::Transport(format!("authentication send failed: {e}")))?;
        info!(
            device_id = %self.device_id,
            correlation_id = %auth_id,
            "Authentication message sent"
        );

        let handshake_deadline = tokio::time::sleep(self.handshake_timeout);
        tokio::pin!(handshake_deadline);

        loop {
            let authenticated = self.state() == SessionState::Ready;
            tokio::select! {
                frame = framed.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(&frame, &auth_id),
                    Some(Err(e)) => {
                        return Err(Error::Transport(format!("read failed: {e}")));
                    }
                    None => {
                        return Err(Error::Transport("connection closed by peer".to_string()));
                    }
                },
                Some(outgoing) = self.outbound_rx.recv() => {
                    framed
                        .send(outgoing)
                        .await
                        .map_err(|e| Error::Transport(format!("write failed: {e}")))?;
                }
                () = &mut handshake_deadline, if !authenticated => {
                    return Err(Error::HandshakeTimeout(self.device_id.clone()));
                }
            }
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Decode and dispatch one frame. Malformed frames are logged and
    /// discarded; they never tear the connection down.
    fn handle_frame(&self, frame: &[u8], auth_id: &str) {
        let message = Envelope::from_frame(frame).and_then(InboundMessage::from_envelope);
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Discarding malformed frame");
                return;
            }
        };

        match self.state() {
            SessionState::Ready => self.dispatch(message),
            SessionState::Authenticating => self.handle_handshake(message, auth_id),
            state => {
                debug!(
                    device_id = %self.device_id,
                    state = ?state,
                    kind = %message.kind(),
                    "Frame received outside active states, ignoring"
                );
            }
        }
    }

    /// Handshake phase: only the acknowledgment matching our own
    /// correlation id authenticates the session. Everything else is
    /// logged and withheld from dispatch.
    fn handle_handshake(&self, message: InboundMessage, auth_id: &str) {
        match message {
            InboundMessage::Acknowledge { reply_to, role } => {
                if reply_to.as_deref() == Some(auth_id) {
                    self.set_state(SessionState::Ready);
                    info!(
                        device_id = %self.device_id,
                        role = role.as_deref().unwrap_or("unspecified"),
                        "Authentication successful"
                    );
                } else {
                    info!(
                        device_id = %self.device_id,
                        reply_to = reply_to.as_deref().unwrap_or("none"),
                        "Acknowledgment for unrelated message during handshake, ignoring"
                    );
                }
            }
            other => {
                debug!(
                    device_id = %self.device_id,
                    kind = %other.kind(),
                    "Frame received before authentication completed, not dispatched"
                );
            }
        }
    }

    /// Ready phase: route decoded messages to the relay hub
    fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::PlatesData(event) => {
                debug!(
                    device_id = %self.device_id,
                    camera_id = %event.camera_id,
                    cars = event.cars.len(),
                    "Plates event received"
                );
                self.hub.publish(StreamKind::Plates, RelayEvent::Plates(event));
            }
            InboundMessage::Live(frame) => {
                self.hub.publish(StreamKind::Live, RelayEvent::Live(frame));
            }
            InboundMessage::Acknowledge { reply_to, .. } => {
                debug!(
                    device_id = %self.device_id,
                    reply_to = reply_to.as_deref().unwrap_or("none"),
                    "Acknowledgment received"
                );
            }
            InboundMessage::CommandResponse { body } => {
                info!(
                    device_id = %self.device_id,
                    body = %body,
                    "Command response received"
                );
            }
            InboundMessage::Unknown { message_type } => {
                self.unknown_messages.fetch_add(1, Ordering::Relaxed);
                warn!(
                    device_id = %self.device_id,
                    message_type = %message_type,
                    "Unknown message type, dropping"
                );
            }
        }
    }
}
