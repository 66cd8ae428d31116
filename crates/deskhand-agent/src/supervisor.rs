//! Connection lifecycle: connect, authenticate, serve, reconnect.
//!
//! ```text
//!              ┌──────────────── delay ────────────────┐
//!              v                                       │
//! Disconnected ─> Connecting ─> Authenticating ─> Connected
//!                     │               │               │
//!                     └── failure ────┴── drop ───────┘
//!
//! any state ── shutdown ──> ShuttingDown (terminal)
//! ```
//!
//! The supervisor is the only writer on the socket. Task results arrive
//! through the outbox and are written while `Connected`; anything produced
//! while disconnected waits in the outbox for the next connection.

use crate::handshake::{authenticate, AuthError};
use crate::outbox::OutboxReceiver;
use crate::policy::{ReconnectPolicy, RetryCause};
use crate::router::Router;
use crate::transport::{Connector, Transport, TransportError};
use deskhand_types::{Credentials, Envelope};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub credentials: Credentials,
    pub policy: ReconnectPolicy,
    /// Wait for the handshake response.
    pub auth_timeout: Duration,
    /// How long shutdown waits before stopping tasks that have not begun
    /// acting. Tasks already acting are always waited for.
    pub drain_timeout: Duration,
}

impl SupervisorConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            policy: ReconnectPolicy::default(),
            auth_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a connection attempt did not reach `Connected`.
#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Connect(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("interrupted by shutdown")]
    Interrupted,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

pub struct Supervisor<C> {
    connector: C,
    config: SupervisorConfig,
    router: Router,
    outbox: OutboxReceiver,
    shutdown: CancellationToken,
    state: watch::Sender<ConnectionState>,
    /// An envelope whose write failed; written first on the next connection.
    held: Option<Envelope>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        config: SupervisorConfig,
        router: Router,
        outbox: OutboxReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            router,
            outbox,
            shutdown,
            state,
            held: None,
        }
    }

    /// Observes lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Runs until the shutdown token is cancelled.
    pub async fn run(mut self) {
        let mut attempt: u64 = 0;
        let mut failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            attempt += 1;

            let cause = match self.open(attempt).await {
                Ok(mut transport) => {
                    failures = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(attempt, "connected to hub");

                    match self.serve(transport.as_mut()).await {
                        SessionEnd::Shutdown => {
                            self.set_state(ConnectionState::ShuttingDown);
                            self.drain(Some(transport.as_mut())).await;
                            transport.close().await;
                            info!("connection closed, agent stopped");
                            return;
                        }
                        SessionEnd::Dropped => {
                            transport.close().await;
                            RetryCause::Disconnect
                        }
                    }
                }
                Err(AttemptError::Interrupted) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(attempt, consecutive_failures = failures, error = %e, "connection attempt failed");
                    RetryCause::Failure {
                        consecutive: failures,
                    }
                }
            };

            self.set_state(ConnectionState::Disconnected);
            let delay = self.config.policy.delay(cause);
            info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::ShuttingDown);
        self.drain(None).await;
        info!("agent stopped");
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "connection state changed");
        }
    }

    /// Connects and authenticates. Shutdown interrupts either step.
    async fn open(&self, attempt: u64) -> Result<Box<dyn Transport>, AttemptError> {
        self.set_state(ConnectionState::Connecting);
        debug!(attempt, "connecting");

        let connected = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(AttemptError::Interrupted),
            result = self.connector.connect() => result,
        };
        let mut transport = connected?;

        self.set_state(ConnectionState::Authenticating);
        let verdict = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(AttemptError::Interrupted),
            result = authenticate(
                transport.as_mut(),
                &self.config.credentials,
                self.config.auth_timeout,
            ) => result.map_err(AttemptError::from),
        };

        match verdict {
            Ok(()) => Ok(transport),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn serve(&mut self, transport: &mut dyn Transport) -> SessionEnd {
        if let Some(envelope) = self.held.take() {
            debug!(message_id = %envelope.message_id, "resending held envelope");
            if let Err(e) = self.write(transport, envelope).await {
                warn!(error = %e, "connection lost while resending");
                return SessionEnd::Dropped;
            }
        }

        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                Some(envelope) = self.outbox.recv() => {
                    if let Err(e) = self.write(transport, envelope).await {
                        warn!(error = %e, "connection lost while sending");
                        return SessionEnd::Dropped;
                    }
                }
                frame = transport.recv() => match frame {
                    Ok(Some(text)) => {
                        if let Some(reply) = self.router.route(&text) {
                            if let Err(e) = send_reply(transport, &reply).await {
                                warn!(error = %e, "connection lost while replying");
                                return SessionEnd::Dropped;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("hub closed the connection");
                        return SessionEnd::Dropped;
                    }
                    Err(e) => {
                        warn!(error = %e, "connection lost");
                        return SessionEnd::Dropped;
                    }
                },
            }
        }
    }

    /// Writes one queued envelope. On failure the envelope is held for the
    /// next connection.
    async fn write(
        &mut self,
        transport: &mut dyn Transport,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = %envelope.kind, error = %e, "dropping unencodable envelope");
                return Ok(());
            }
        };

        match transport.send(frame).await {
            Ok(()) => {
                debug!(kind = %envelope.kind, message_id = %envelope.message_id, "envelope sent");
                Ok(())
            }
            Err(e) => {
                self.held = Some(envelope);
                Err(e)
            }
        }
    }

    /// Stops taking tasks and waits for in-flight ones. After the drain
    /// timeout, tasks that have not started acting are stopped; tasks in the
    /// middle of their actions are always waited for. Results are written
    /// if a connection is still open.
    async fn drain(&mut self, mut transport: Option<&mut (dyn Transport + 'static)>) {
        self.router.close();

        let in_flight = self.router.in_flight();
        if in_flight > 0 {
            info!(
                in_flight,
                timeout_secs = self.config.drain_timeout.as_secs(),
                "waiting for in-flight tasks"
            );
        }

        let deadline = tokio::time::sleep(self.config.drain_timeout);
        tokio::pin!(deadline);
        let mut stopped = false;

        loop {
            tokio::select! {
                biased;
                _ = self.router.idle() => break,
                _ = &mut deadline, if !stopped => {
                    warn!(
                        in_flight = self.router.in_flight(),
                        "drain timeout elapsed, stopping tasks that have not started acting"
                    );
                    self.router.stop_pending();
                    stopped = true;
                }
                Some(envelope) = self.outbox.recv(), if transport.is_some() => {
                    if let Some(t) = transport.as_deref_mut() {
                        if let Err(e) = self.write(t, envelope).await {
                            warn!(error = %e, "connection lost while draining");
                            transport = None;
                        }
                    }
                }
                frame = recv_or_pending(transport.as_deref_mut()) => match frame {
                    // Keep answering while lingering; new tasks are refused by the router.
                    Ok(Some(text)) => {
                        if let (Some(reply), Some(t)) = (self.router.route(&text), transport.as_deref_mut()) {
                            if send_reply(t, &reply).await.is_err() {
                                transport = None;
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        info!("connection ended while draining");
                        transport = None;
                    }
                },
            }
        }

        if let Some(t) = transport.as_deref_mut() {
            if let Some(envelope) = self.held.take() {
                if self.write(t, envelope).await.is_err() {
                    transport = None;
                }
            }
        }
        if let Some(t) = transport {
            while let Some(envelope) = self.outbox.try_recv() {
                if let Err(e) = self.write(t, envelope).await {
                    warn!(error = %e, "connection lost while flushing");
                    break;
                }
            }
        }

        let mut dropped = usize::from(self.held.take().is_some());
        while self.outbox.try_recv().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "no connection available, dropping undelivered envelopes");
        }
    }
}

async fn send_reply(transport: &mut dyn Transport, reply: &Envelope) -> Result<(), TransportError> {
    match reply.to_json() {
        Ok(frame) => transport.send(frame).await,
        Err(e) => {
            error!(kind = %reply.kind, error = %e, "dropping unencodable reply");
            Ok(())
        }
    }
}

async fn recv_or_pending(
    transport: Option<&mut (dyn Transport + 'static)>,
) -> Result<Option<String>, TransportError> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}
