//! UDP discovery responder.
//!
//! Controllers that just joined the network broadcast an `announce` datagram
//! on the discovery port. The responder replies to the sender's endpoint
//! with an `ack` carrying the coordinator's IPv4 and the TCP session port;
//! the controller then opens its session there.
//!
//! The responder holds no per-peer state and is idempotent: the reference
//! firmware broadcasts up to five times and stops at the first valid ack, so
//! duplicate announces from the same peer are normal and each one is acked.
//! Delivery is best-effort (UDP); the coordinator never retries.
//!
//! A single bad datagram (foreign `type`, malformed JSON, non-UTF-8 noise
//! from some other protocol on the port) is logged and skipped; it must not
//! terminate the receive loop.

use std::net::{Ipv4Addr, SocketAddr};

use rvhub_core::protocol::codec::{decode_discovery, FrameError};
use rvhub_core::protocol::messages::DiscoveryMessage;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for discovery responder operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Binds the discovery socket with broadcast enabled and address reuse
/// permitted.
///
/// Address reuse lets the coordinator restart without waiting out sockets in
/// TIME_WAIT-like states and coexist with diagnostic listeners on the same
/// port.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn bind_discovery_socket(addr: SocketAddr) -> Result<UdpSocket, DiscoveryError> {
    let bind_err = |source| DiscoveryError::BindFailed { addr, source };

    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_broadcast(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

/// Runs the receive loop until `cancel` fires.
///
/// Every `announce` is answered with an `ack` naming `server_ip` and
/// `tcp_port`; everything else is logged and ignored.
pub async fn run_discovery_responder(
    socket: UdpSocket,
    server_ip: Ipv4Addr,
    tcp_port: u16,
    cancel: CancellationToken,
) {
    let local = socket
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!("discovery responder listening on UDP {local}");

    let mut buf = vec![0u8; 2048];

    loop {
        let (len, src) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(pair) => pair,
                Err(e) => {
                    // Transient receive errors (e.g. ICMP port-unreachable
                    // surfacing on some platforms) must not kill discovery.
                    warn!("discovery recv error: {e}");
                    continue;
                }
            },
        };

        match decode_discovery(&buf[..len]) {
            Ok(DiscoveryMessage::Announce { target_id, ip }) => {
                debug!("announce from {src}: target_id={target_id}, ip={ip}");
                send_ack(&socket, src, server_ip, tcp_port, &cancel).await;
            }
            Ok(other) => {
                warn!("unexpected discovery message from {src}: {other:?}");
            }
            Err(FrameError::UnknownType(t)) => {
                warn!("unknown discovery type {t:?} from {src}");
            }
            Err(e) => {
                debug!("undecodable discovery datagram from {src}: {e}");
            }
        }
    }

    info!("discovery responder stopped");
}

/// Sends the `ack` reply to `dest`, best-effort.
async fn send_ack(
    socket: &UdpSocket,
    dest: SocketAddr,
    server_ip: Ipv4Addr,
    tcp_port: u16,
    cancel: &CancellationToken,
) {
    let ack = DiscoveryMessage::Ack {
        server_ip: server_ip.to_string(),
        tcp_port,
    };
    let payload = match rvhub_core::protocol::codec::encode_frame(&ack) {
        Ok(line) => line,
        Err(e) => {
            warn!("failed to encode discovery ack: {e}");
            return;
        }
    };
    // One JSON object per datagram; the line codec's trailing newline is not
    // part of the datagram payload.
    let payload = payload.trim_end();

    if let Err(e) = socket.send_to(payload.as_bytes(), dest).await {
        if cancel.is_cancelled() {
            // The socket was torn down mid-send during shutdown; benign.
            debug!("discovery ack to {dest} aborted by shutdown");
        } else {
            warn!("failed to send discovery ack to {dest}: {e}");
        }
    } else {
        debug!("acked {dest} with server {server_ip}:{tcp_port}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_discovery_socket_on_ephemeral_port() {
        let socket = bind_discovery_socket("127.0.0.1:0".parse().unwrap())
            .expect("ephemeral bind must succeed");
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_two_sockets_can_share_the_port_with_reuse() {
        let first = bind_discovery_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();

        // SO_REUSEADDR permits a second bind of the same port.
        let second = bind_discovery_socket(addr);
        assert!(second.is_ok(), "address reuse must be permitted");
    }

    #[tokio::test]
    async fn test_responder_exits_on_cancellation() {
        let socket = bind_discovery_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_discovery_responder(
            socket,
            Ipv4Addr::LOCALHOST,
            5001,
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("responder must stop promptly after cancellation")
            .unwrap();
    }
}
