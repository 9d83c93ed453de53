//! TCP session server: accept loop and per-session reader tasks.
//!
//! Each accepted connection gets its own Tokio task so one slow controller
//! never blocks another. A session starts unbound; the first valid
//! `device_info` frame binds it to a `target_id` and creates its device
//! record. From then on every inbound frame refreshes the record's liveness
//! instant.
//!
//! # Frame flow
//!
//! ```text
//! socket read ─ FrameSplitter ─ parse_object
//!      │                            │
//!      │                 publish MessageReceived   (before any mutation)
//!      │                            │
//!      │                 classify_client_frame
//!      │                            │
//!      │        ┌─ device_info  → bind record, displace previous session
//!      │        ├─ heartbeat    → refresh last_heartbeat
//!      │        ├─ status_update→ update one entry's state
//!      │        └─ status       → update a batch of entries
//!      └─ EOF / error / cancellation → unbind, close, DeviceDisconnected
//! ```
//!
//! Frames on one connection are processed strictly in arrival order; the
//! reader never hands frames to another task.
//!
//! # Failure semantics
//!
//! Per-frame problems (malformed JSON, unknown `type`, missing fields, an
//! out-of-range relay state) are logged and the session continues. Socket
//! errors end the session: the record is removed and `DeviceDisconnected`
//! fires once if the session had been bound.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rvhub_core::domain::inventory::{
    DeviceEntry, DeviceInventory, EntrySelector, RelayState,
};
use rvhub_core::protocol::codec::{classify_client_frame, parse_object, FrameError, FrameSplitter};
use rvhub_core::protocol::messages::{ClientFrame, EntryDecl};
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::events::{CoordinatorEvent, EventBus};
use crate::application::registry::{DeviceRecord, DeviceRegistry, SessionHandle, SharedWriter};
use crate::config::CoordinatorConfig;

/// A peer that never terminates a frame gets this much buffer before the
/// session is dropped as misbehaving.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Session ids are process-unique so two sessions racing for one `target_id`
/// can be told apart.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Error type for session server operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TCP listener could not be bound.
    #[error("failed to bind session listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Shared dependencies handed to every session task.
pub struct SessionContext {
    pub registry: Arc<DeviceRegistry>,
    pub events: EventBus,
    /// Root cancellation scope; per-session tokens are children of this.
    pub cancel: CancellationToken,
    pub keepalive_idle: Duration,
    pub keepalive_interval: Duration,
}

impl SessionContext {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        events: EventBus,
        cancel: CancellationToken,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            events,
            cancel,
            keepalive_idle: config.tcp_keepalive_idle,
            keepalive_interval: config.tcp_keepalive_interval,
        }
    }
}

/// Binds the session listener with `SO_REUSEADDR`.
///
/// # Errors
///
/// Returns [`SessionError::BindFailed`] if the listener cannot be bound.
pub fn bind_session_listener(addr: SocketAddr) -> Result<TcpListener, SessionError> {
    let bind_err = |source| SessionError::BindFailed { addr, source };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4().map_err(bind_err)?,
        SocketAddr::V6(_) => TcpSocket::new_v6().map_err(bind_err)?,
    };
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(64).map_err(bind_err)
}

/// Runs the accept loop until the context's cancellation scope fires, then
/// waits for every session task to finish tearing down.
pub async fn run_session_server(listener: TcpListener, ctx: Arc<SessionContext>) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!("session server listening on TCP {local}");

    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("accepted controller connection from {peer_addr}");
                    let ctx = Arc::clone(&ctx);
                    sessions.spawn(async move {
                        handle_session(stream, peer_addr, ctx).await;
                    });
                }
                Err(e) => {
                    // Transient accept failures (fd exhaustion, aborted
                    // handshakes) must not stop the server.
                    warn!("accept error: {e}");
                }
            },
        }
    }

    // The listener drops here; cancellation has already propagated to every
    // session's child token, so draining is quick.
    drop(listener);
    while sessions.join_next().await.is_some() {}
    info!("session server stopped");
}

// ── Per-session handling ──────────────────────────────────────────────────────

/// Identity a session acquires when its `device_info` is processed.
struct Binding {
    target_id: String,
    session_id: u64,
}

/// Runs one controller session from accept to teardown.
async fn handle_session(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<SessionContext>) {
    if let Err(e) = configure_keepalive(&stream, ctx.keepalive_idle, ctx.keepalive_interval) {
        // Keepalive is a liveness optimization; the application heartbeat
        // still catches dead peers.
        warn!("session {peer_addr}: failed to enable TCP keepalive: {e}");
    }

    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let session_cancel = ctx.cancel.child_token();
    let (reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));

    let mut binding: Option<Binding> = None;
    read_session(
        reader,
        peer_addr,
        session_id,
        &writer,
        &session_cancel,
        &ctx,
        &mut binding,
    )
    .await;

    // Teardown order matters for observers: close the socket, remove the
    // record, then announce the disconnect.
    {
        let mut w = writer.lock().await;
        let _ = w.shutdown().await;
    }

    if let Some(binding) = binding {
        if let Some(record) = ctx
            .registry
            .unbind(&binding.target_id, binding.session_id)
            .await
        {
            info!(
                "session {peer_addr}: controller {} disconnected",
                record.target_id
            );
            ctx.events.publish(CoordinatorEvent::DeviceDisconnected {
                target_id: record.target_id,
            });
        }
        // None: this session was displaced or evicted; whoever removed the
        // record already announced the disconnect.
    }
    debug!("session {peer_addr}: closed");
}

/// Drives the read loop until EOF, a socket error, or cancellation.
async fn read_session(
    mut reader: OwnedReadHalf,
    peer_addr: SocketAddr,
    session_id: u64,
    writer: &SharedWriter,
    session_cancel: &CancellationToken,
    ctx: &SessionContext,
    binding: &mut Option<Binding>,
) {
    let mut splitter = FrameSplitter::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = tokio::select! {
            _ = session_cancel.cancelled() => {
                debug!("session {peer_addr}: cancelled");
                return;
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => {
                    debug!("session {peer_addr}: peer closed the connection");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    // Keepalive probes surface half-open peers here too.
                    warn!("session {peer_addr}: read error: {e}");
                    return;
                }
            },
        };

        splitter.extend(&chunk[..n]);
        while let Some(frame) = splitter.next_frame() {
            if frame.is_empty() {
                continue;
            }
            handle_frame(&frame, peer_addr, session_id, writer, session_cancel, ctx, binding)
                .await;
        }

        if splitter.buffered() > MAX_FRAME_LEN {
            warn!(
                "session {peer_addr}: unterminated frame exceeds {MAX_FRAME_LEN} bytes; closing"
            );
            return;
        }
    }
}

/// Processes one complete frame.
async fn handle_frame(
    frame: &[u8],
    peer_addr: SocketAddr,
    session_id: u64,
    writer: &SharedWriter,
    session_cancel: &CancellationToken,
    ctx: &SessionContext,
    binding: &mut Option<Binding>,
) {
    let (frame_type, raw) = match parse_object(frame) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("session {peer_addr}: dropping frame: {e}");
            return;
        }
    };

    // Subscribers observe the raw protocol flow before any state change.
    ctx.events.publish(CoordinatorEvent::MessageReceived {
        frame_type: frame_type.clone(),
        message: raw.clone(),
    });

    let typed = match classify_client_frame(&frame_type, raw) {
        Ok(typed) => typed,
        Err(FrameError::UnknownType(t)) => {
            warn!("session {peer_addr}: ignoring unknown frame type {t:?}");
            return;
        }
        Err(e) => {
            warn!("session {peer_addr}: ignoring frame: {e}");
            return;
        }
    };

    match typed {
        ClientFrame::DeviceInfo { target_id, relays } => {
            bind_device(
                target_id,
                relays,
                peer_addr,
                session_id,
                writer,
                session_cancel,
                ctx,
                binding,
            )
            .await;
        }

        ClientFrame::Heartbeat { target_id: echoed } => {
            let Some(binding) = binding.as_ref() else {
                debug!("session {peer_addr}: heartbeat before device_info; ignored");
                return;
            };
            if let Some(echoed) = echoed {
                if echoed != binding.target_id {
                    warn!(
                        "session {peer_addr}: heartbeat echoes {echoed:?} but session is bound to {:?}",
                        binding.target_id
                    );
                }
            }
            ctx.registry.touch(&binding.target_id, binding.session_id).await;
        }

        ClientFrame::StatusUpdate { id, label, state } => {
            let Some(binding) = binding.as_ref() else {
                debug!("session {peer_addr}: status_update before device_info; ignored");
                return;
            };
            ctx.registry.touch(&binding.target_id, binding.session_id).await;

            let selector = match (id, label) {
                (Some(id), _) => EntrySelector::ById(id),
                (None, Some(label)) => EntrySelector::ByLabel(label),
                (None, None) => {
                    warn!("session {peer_addr}: status_update with neither id nor label; ignored");
                    return;
                }
            };
            apply_state(ctx, binding, &selector, &state, peer_addr).await;
        }

        ClientFrame::Status { data } => {
            let Some(binding) = binding.as_ref() else {
                debug!("session {peer_addr}: status before device_info; ignored");
                return;
            };
            ctx.registry.touch(&binding.target_id, binding.session_id).await;

            for report in data.devices {
                let selector = EntrySelector::ByLabel(report.label);
                apply_state(ctx, binding, &selector, &report.state, peer_addr).await;
            }
        }
    }
}

/// Validates a wire state string and applies it to the bound record.
async fn apply_state(
    ctx: &SessionContext,
    binding: &Binding,
    selector: &EntrySelector,
    state: &str,
    peer_addr: SocketAddr,
) {
    let state: RelayState = match state.parse() {
        Ok(state) => state,
        Err(e) => {
            warn!("session {peer_addr}: {e}; update ignored");
            return;
        }
    };

    let updated = ctx
        .registry
        .update_state(&binding.target_id, binding.session_id, selector, state)
        .await;
    if updated {
        debug!(
            "session {peer_addr}: {} entry {selector} is now {state}",
            binding.target_id
        );
    } else {
        warn!(
            "session {peer_addr}: no entry matches {selector} on {}; update ignored",
            binding.target_id
        );
    }
}

/// Processes a `device_info`: builds the declared inventory and binds the
/// session, displacing any previous session for the same `target_id`.
#[allow(clippy::too_many_arguments)]
async fn bind_device(
    target_id: String,
    relays: Vec<EntryDecl>,
    peer_addr: SocketAddr,
    session_id: u64,
    writer: &SharedWriter,
    session_cancel: &CancellationToken,
    ctx: &SessionContext,
    binding: &mut Option<Binding>,
) {
    let inventory = build_inventory(relays, peer_addr);

    // A session re-declaring under a different identity abandons its old
    // record; that logical device is gone.
    if let Some(previous) = binding.as_ref() {
        if previous.target_id != target_id {
            warn!(
                "session {peer_addr}: rebinding from {:?} to {target_id:?}",
                previous.target_id
            );
            if let Some(old) = ctx
                .registry
                .unbind(&previous.target_id, previous.session_id)
                .await
            {
                ctx.events.publish(CoordinatorEvent::DeviceDisconnected {
                    target_id: old.target_id,
                });
            }
        }
    }

    let handle = SessionHandle {
        session_id,
        peer_addr,
        writer: Arc::clone(writer),
        cancel: session_cancel.clone(),
    };
    let entry_count = inventory.len();
    let record = DeviceRecord::new(target_id.clone(), inventory, handle);

    if let Some(displaced) = ctx.registry.bind(record).await {
        if displaced.session.session_id == session_id {
            // Same session sent device_info again: a fresh declaration
            // superseding its own, nothing to close.
            debug!("session {peer_addr}: {target_id} re-declared its inventory");
        } else {
            info!(
                "session {peer_addr}: {target_id} re-registered; closing previous session from {}",
                displaced.session.peer_addr
            );
            close_displaced(&displaced).await;
            ctx.events.publish(CoordinatorEvent::DeviceDisconnected {
                target_id: displaced.target_id,
            });
        }
    } else {
        info!("session {peer_addr}: registered {target_id} with {entry_count} entries");
    }

    *binding = Some(Binding { target_id, session_id });
}

/// Closes a displaced session's socket: cancel wakes its reader, the write
/// shutdown makes the close visible to the peer immediately.
async fn close_displaced(displaced: &DeviceRecord) {
    displaced.session.close();
    let mut w = displaced.session.writer.lock().await;
    let _ = w.shutdown().await;
}

/// Materializes declared entries, defaulting absent or unparseable initial
/// states to `"off"`.
fn build_inventory(relays: Vec<EntryDecl>, peer_addr: SocketAddr) -> DeviceInventory {
    let mut entries = Vec::with_capacity(relays.len());
    for decl in relays {
        let state = match decl.initial_state.as_deref() {
            None => RelayState::Off,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("session {peer_addr}: entry {:?}: {e}; defaulting to off", decl.id);
                RelayState::Off
            }),
        };
        entries.push(DeviceEntry {
            id: decl.id,
            label: decl.label,
            device_type: decl.device_type,
            state,
        });
    }
    DeviceInventory::new(entries)
}

/// Enables TCP keepalive on an accepted socket so half-open connections
/// surface as read errors within roughly one minute.
fn configure_keepalive(
    stream: &TcpStream,
    idle: Duration,
    interval: Duration,
) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle).with_interval(interval);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rvhub_core::domain::inventory::DeviceKind;

    fn decl(id: &str, label: &str, initial: Option<&str>) -> EntryDecl {
        EntryDecl {
            id: id.to_string(),
            label: label.to_string(),
            device_type: DeviceKind::Relay,
            initial_state: initial.map(str::to_string),
        }
    }

    fn peer() -> SocketAddr {
        "192.168.1.50:50000".parse().unwrap()
    }

    #[test]
    fn test_build_inventory_uses_declared_initial_state() {
        let inv = build_inventory(vec![decl("r1", "Pump", Some("on"))], peer());
        assert_eq!(inv.get("r1").unwrap().state, RelayState::On);
    }

    #[test]
    fn test_build_inventory_defaults_missing_initial_state_to_off() {
        let inv = build_inventory(vec![decl("r1", "Pump", None)], peer());
        assert_eq!(inv.get("r1").unwrap().state, RelayState::Off);
    }

    #[test]
    fn test_build_inventory_defaults_invalid_initial_state_to_off() {
        let inv = build_inventory(vec![decl("r1", "Pump", Some("energized"))], peer());
        assert_eq!(inv.get("r1").unwrap().state, RelayState::Off);
    }

    #[tokio::test]
    async fn test_bind_session_listener_on_ephemeral_port() {
        let listener = bind_session_listener("127.0.0.1:0".parse().unwrap())
            .expect("ephemeral bind must succeed");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_keepalive_can_be_applied_to_a_live_socket() {
        let listener = bind_session_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (stream, _) = listener.accept().await.unwrap();

        configure_keepalive(&stream, Duration::from_secs(30), Duration::from_secs(10))
            .expect("keepalive must apply to an accepted socket");
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let a = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let b = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        assert_ne!(a, b);
    }
}
