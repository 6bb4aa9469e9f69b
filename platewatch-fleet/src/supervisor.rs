//! Per-device reconnection supervisor.
//!
//! Owns the lifecycle of one device's sessions: connect immediately on
//! construction, rebuild the TLS context and session from scratch on
//! every attempt, and retry forever with jittered exponential backoff.
//! The only way out is explicit device removal.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use platewatch_core::config::{ReconnectConfig, TlsConfig};
use platewatch_core::models::{DeviceEndpoint, DeviceId};

use crate::error::{Error, Result};
use crate::registry::ConnectionRegistry;
use crate::relay::RelayHub;
use crate::session::DeviceSession;
use crate::signer::CommandSigner;
use crate::tls;

/// Backoff state for one device. Owned exclusively by its supervisor
/// task; never touched concurrently.
#[derive(Debug)]
pub(crate) struct ReconnectState {
    current_delay: Duration,
    config: ReconnectConfig,
    is_reconnecting: bool,
}

impl ReconnectState {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay(),
            config,
            is_reconnecting: false,
        }
    }

    /// Claim the right to schedule one reconnect. Returns the delay to
    /// wait, or `None` when a reconnect is already scheduled; concurrent
    /// loss and failure signals for the same attempt collapse into one.
    pub(crate) fn try_schedule(&mut self) -> Option<Duration> {
        if self.is_reconnecting {
            return None;
        }
        self.is_reconnecting = true;

        self.current_delay = Duration::from_secs_f64(
            (self.current_delay.as_secs_f64() * self.config.backoff_factor)
                .min(self.config.max_delay().as_secs_f64()),
        );
        Some(self.with_jitter(self.current_delay))
    }

    /// The scheduled attempt is starting; further losses may schedule
    /// again.
    pub(crate) fn attempt_started(&mut self) {
        self.is_reconnecting = false;
    }

    /// A connection was established: back to the initial delay.
    pub(crate) fn on_connected(&mut self) {
        self.current_delay = self.config.initial_delay();
        self.is_reconnecting = false;
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(0.0..self.config.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Everything a supervisor needs to build sessions, shared across devices
pub(crate) struct SupervisorContext {
    pub registry: Arc<ConnectionRegistry>,
    pub hub: Arc<RelayHub>,
    pub signer: Arc<CommandSigner>,
    pub tls: TlsConfig,
    pub reconnect: ReconnectConfig,
    pub handshake_timeout: Duration,
}

/// Handle to one running supervisor task
pub struct DeviceSupervisor {
    device_id: DeviceId,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl DeviceSupervisor {
    /// Start supervising a device: connects immediately and keeps the
    /// device connected until [`DeviceSupervisor::stop`].
    pub(crate) fn start(endpoint: DeviceEndpoint, context: Arc<SupervisorContext>) -> Self {
        let device_id = endpoint.id.clone();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(endpoint, context, cancel.clone()));
        Self {
            device_id,
            cancel,
            task,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Stop supervising: cancels any pending retry, closes the live
    /// session and clears the registry entry.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(device_id = %self.device_id, error = %e, "Supervisor task panicked");
            }
        }
    }

    async fn run(
        endpoint: DeviceEndpoint,
        context: Arc<SupervisorContext>,
        cancel: CancellationToken,
    ) {
        let mut backoff = ReconnectState::new(context.reconnect.clone());

        loop {
            backoff.attempt_started();
            match Self::attempt(&endpoint, &context, &cancel, &mut backoff).await {
                Ok(()) => {
                    // Deliberate close via cancellation
                    break;
                }
                Err(e) => {
                    warn!(device_id = %endpoint.id, error = %e, "Connection lost");
                }
            }

            let Some(delay) = backoff.try_schedule() else {
                continue;
            };
            debug!(
                device_id = %endpoint.id,
                delay_ms = delay.as_millis() as u64,
                "Reconnect scheduled"
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        context.registry.remove(&endpoint.id);
        info!(device_id = %endpoint.id, "Supervisor stopped");
    }

    /// One connection attempt: fresh TLS context, fresh session, run to
    /// completion.
    async fn attempt(
        endpoint: &DeviceEndpoint,
        context: &SupervisorContext,
        cancel: &CancellationToken,
        backoff: &mut ReconnectState,
    ) -> Result<()> {
        // Reload TLS material every attempt; stale contexts are never
        // reused.
        let connector = tls::build_connector(&context.tls)?;
        let server_name = tls::server_name(&endpoint.host)?;

        let tcp = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            connected = TcpStream::connect(endpoint.address()) => connected
                .map_err(|e| Error::Transport(format!("connect to {} failed: {e}", endpoint.address())))?,
        };
        let stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            handshake = connector.connect(server_name, tcp) => handshake
                .map_err(|e| Error::Transport(format!("TLS handshake with {} failed: {e}", endpoint.address())))?,
        };

        info!(device_id = %endpoint.id, address = %endpoint.address(), "Device connected");
        backoff.on_connected();

        let (session, handle) = DeviceSession::new(
            endpoint.id.clone(),
            endpoint.auth_token.clone(),
            context.signer.clone(),
            context.hub.clone(),
            context.handshake_timeout,
        );
        context.registry.insert(endpoint.id.clone(), handle);

        tokio::select! {
            () = cancel.cancelled() => Ok(()),
            result = session.run(stream) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_secs: 2,
            max_delay_secs: 10,
            backoff_factor: 1.5,
            jitter: 0.1,
        }
    }

    /// Delay after N consecutive failures must be
    /// min(initial * factor^N, max), within jitter tolerance.
    #[test]
    fn test_backoff_schedule() {
        let cfg = config();
        let mut state = ReconnectState::new(cfg.clone());

        for failures in 1..=6u32 {
            state.attempt_started();
            let delay = state.try_schedule().expect("schedule");

            let base = (cfg.initial_delay_secs as f64 * cfg.backoff_factor.powi(failures as i32))
                .min(cfg.max_delay_secs as f64);
            let delay_secs = delay.as_secs_f64();
            assert!(
                delay_secs >= base - 1e-9 && delay_secs <= base * (1.0 + cfg.jitter) + 1e-9,
                "failure {failures}: delay {delay_secs} outside [{base}, {}]",
                base * (1.0 + cfg.jitter)
            );
        }
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let mut state = ReconnectState::new(config());
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            state.attempt_started();
            last = state.try_schedule().expect("schedule");
        }
        assert!(last.as_secs_f64() <= 10.0 * 1.1 + 1e-9);
    }

    /// Concurrent loss and failure notifications for the same attempt
    /// must produce exactly one scheduled reconnect.
    #[test]
    fn test_duplicate_signals_schedule_once() {
        let mut state = ReconnectState::new(config());

        assert!(state.try_schedule().is_some());
        assert!(state.try_schedule().is_none());
        assert!(state.try_schedule().is_none());

        state.attempt_started();
        assert!(state.try_schedule().is_some());
    }

    #[test]
    fn test_success_resets_delay() {
        let cfg = config();
        let mut state = ReconnectState::new(cfg.clone());

        for _ in 0..5 {
            state.attempt_started();
            state.try_schedule();
        }
        state.on_connected();

        let delay = state.try_schedule().expect("schedule");
        let base = cfg.initial_delay_secs as f64 * cfg.backoff_factor;
        assert!(delay.as_secs_f64() <= base * (1.0 + cfg.jitter) + 1e-9);
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let mut state = ReconnectState::new(ReconnectConfig {
            jitter: 0.0,
            ..config()
        });
        let delay = state.try_schedule().expect("schedule");
        assert!((delay.as_secs_f64() - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_retries_until_stopped() {
        // Unloadable TLS material: every attempt fails before any I/O,
        // exercising the retry loop without a network.
        let context = Arc::new(SupervisorContext {
            registry: Arc::new(ConnectionRegistry::new()),
            hub: Arc::new(RelayHub::new(Duration::from_secs(1))),
            signer: Arc::new(CommandSigner::new("key").expect("signer")),
            tls: TlsConfig {
                cert_path: "/nonexistent/client.crt".to_string(),
                key_path: "/nonexistent/client.key".to_string(),
                ca_path: "/nonexistent/ca.crt".to_string(),
                verify_hostname: false,
            },
            reconnect: config(),
            handshake_timeout: Duration::from_secs(10),
        });

        let endpoint = DeviceEndpoint {
            id: DeviceId::from("lpr-1"),
            host: "127.0.0.1".to_string(),
            port: 1,
            auth_token: "tok".to_string(),
        };
        let supervisor = DeviceSupervisor::start(endpoint, context.clone());

        // Let several backoff cycles elapse; the task must still be alive
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!supervisor.task.is_finished());

        supervisor.stop().await;
        assert!(context.registry.get(&DeviceId::from("lpr-1")).is_none());
    }
}
