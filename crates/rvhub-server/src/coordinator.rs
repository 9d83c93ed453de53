//! The coordinator: wiring and programmatic surface of the core.
//!
//! [`Coordinator`] owns the registry, the event bus, and the cancellation
//! scope, and drives the four concurrent activities: the UDP discovery
//! responder, the TCP session server, one task per controller session, and
//! the liveness monitor.
//!
//! ```text
//! Coordinator::start()
//!  ├─ probe::primary_ipv4()          once, cached for the service lifetime
//!  ├─ bind()                         per-component, failures are local
//!  └─ run()
//!       ├─ discovery responder       (UDP)
//!       ├─ session server            (TCP accept + session tasks)
//!       └─ liveness monitor          (timer)
//! ```
//!
//! `stop()` cancels the scope: every loop returns, every session observes a
//! cancelled read and tears down, and `start()` returns once all of them
//! have stopped.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use rvhub_core::domain::inventory::DeviceEntry;
use rvhub_core::protocol::codec::{encode_frame, FrameError};
use rvhub_core::protocol::messages::{CommandData, ServerFrame};
use rvhub_core::{DeviceKind, RelayState};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::events::{CoordinatorEvent, EventBus};
use crate::application::registry::DeviceRegistry;
use crate::config::CoordinatorConfig;
use crate::infrastructure::network::{discovery, liveness, probe, session};

/// Error type for command dispatch.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No session is bound for the target; nothing was sent.
    #[error("controller {0:?} is not connected")]
    NotConnected(String),

    /// The state value is outside the vocabulary for the device kind.
    #[error("invalid state {state:?} for {device_type} command")]
    InvalidState {
        device_type: DeviceKind,
        state: String,
    },

    /// The frame could not be serialized.
    #[error(transparent)]
    Encode(#[from] FrameError),

    /// Writing to the peer failed. The session reader will observe the dead
    /// socket and evict the record through normal EOF handling.
    #[error("failed to write command: {0}")]
    Io(#[from] std::io::Error),
}

/// Sockets produced by [`Coordinator::bind`].
///
/// Each component binds independently: a port squatting on UDP 5000 must not
/// take the TCP session server down with it, and vice versa. A component
/// whose bind failed is simply absent.
pub struct BoundSockets {
    pub udp: Option<UdpSocket>,
    pub tcp: Option<TcpListener>,
    /// The probed primary IPv4, advertised in discovery acks.
    pub server_ip: Ipv4Addr,
}

impl BoundSockets {
    /// Actual discovery socket address, once bound (useful with port 0).
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Actual session listener address, once bound (useful with port 0).
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// The network coordinator.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(DeviceRegistry::new()),
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribes to the coordinator's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Triggers graceful shutdown: all activities stop and [`start`] returns.
    ///
    /// [`start`]: Coordinator::start
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Point-in-time copy of every connected controller's inventory.
    pub async fn devices(&self) -> HashMap<String, Vec<DeviceEntry>> {
        self.registry.snapshot().await
    }

    /// Sends a `command` frame to the controller bound as `target_id`.
    ///
    /// The call returns once the frame is written; it never waits for the
    /// controller, which acknowledges by sending a later `status_update`.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotConnected`] when no session is bound (no side
    /// effect), [`CommandError::InvalidState`] for an out-of-vocabulary relay
    /// state, [`CommandError::Io`] when the write fails.
    pub async fn send_command(
        &self,
        target_id: &str,
        device_type: DeviceKind,
        label: &str,
        state: &str,
    ) -> Result<(), CommandError> {
        if device_type == DeviceKind::Relay && state.parse::<RelayState>().is_err() {
            return Err(CommandError::InvalidState {
                device_type,
                state: state.to_string(),
            });
        }

        let writer = self
            .registry
            .writer_for(target_id)
            .await
            .ok_or_else(|| CommandError::NotConnected(target_id.to_string()))?;

        let frame = encode_frame(&ServerFrame::Command {
            target_id: target_id.to_string(),
            data: CommandData {
                device_type,
                label: label.to_string(),
                state: state.to_string(),
            },
        })?;

        let mut writer = writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Probes the primary address and binds each component's socket.
    ///
    /// Bind failures are fatal only for the affected component: they are
    /// logged with a remediation hint and the component is left absent from
    /// the result.
    pub async fn bind(&self) -> BoundSockets {
        let server_ip = probe::primary_ipv4();
        info!("primary address: {server_ip}");

        let udp_addr = SocketAddr::new(self.config.bind_addr, self.config.udp_port);
        let udp = match discovery::bind_discovery_socket(udp_addr) {
            Ok(socket) => Some(socket),
            Err(e) => {
                error!(
                    "{e}; controllers will not be discovered \
                     (is another coordinator instance running on this port?)"
                );
                None
            }
        };

        let tcp_addr = SocketAddr::new(self.config.bind_addr, self.config.tcp_port);
        let tcp = match session::bind_session_listener(tcp_addr) {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!(
                    "{e}; controller sessions cannot be accepted \
                     (is another coordinator instance running on this port?)"
                );
                None
            }
        };

        BoundSockets { udp, tcp, server_ip }
    }

    /// Runs every bound activity until the cancellation scope fires.
    ///
    /// The discovery ack advertises the session listener's actual port, so
    /// ephemeral ports (tests) work end to end.
    pub async fn run(&self, sockets: BoundSockets) {
        let BoundSockets { udp, tcp, server_ip } = sockets;
        let advertised_tcp_port = tcp
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
            .unwrap_or(self.config.tcp_port);

        let mut tasks = tokio::task::JoinSet::new();

        if let Some(udp) = udp {
            tasks.spawn(discovery::run_discovery_responder(
                udp,
                server_ip,
                advertised_tcp_port,
                self.cancel.clone(),
            ));
        }

        if let Some(listener) = tcp {
            let ctx = Arc::new(session::SessionContext::new(
                Arc::clone(&self.registry),
                self.events.clone(),
                self.cancel.clone(),
                &self.config,
            ));
            tasks.spawn(session::run_session_server(listener, ctx));
        }

        tasks.spawn(liveness::run_liveness_monitor(
            Arc::clone(&self.registry),
            self.events.clone(),
            self.config.heartbeat_timeout,
            self.config.heartbeat_scan_interval,
            self.cancel.clone(),
        ));

        while tasks.join_next().await.is_some() {}
        info!("coordinator stopped");
    }

    /// Begins all activities; returns when all have stopped.
    pub async fn start(&self) {
        let sockets = self.bind().await;
        self.run(sockets).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
