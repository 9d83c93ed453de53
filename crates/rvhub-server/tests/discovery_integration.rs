//! Integration tests for the UDP discovery handshake.
//!
//! These exercise the responder through a real socket pair, the way a
//! controller on the LAN would: broadcast an `announce`, expect an `ack`
//! naming the coordinator's address and session port.

use std::net::Ipv4Addr;
use std::time::Duration;

use rvhub_server::infrastructure::network::discovery::{
    bind_discovery_socket, run_discovery_responder,
};
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Spawns a responder on an ephemeral loopback port and returns the peer
/// socket to talk to it, plus the cancel token.
async fn start_responder(
    server_ip: Ipv4Addr,
    tcp_port: u16,
) -> (UdpSocket, std::net::SocketAddr, CancellationToken) {
    let socket = bind_discovery_socket("127.0.0.1:0".parse().unwrap()).expect("bind responder");
    let responder_addr = socket.local_addr().unwrap();
    let cancel = CancellationToken::new();

    tokio::spawn(run_discovery_responder(
        socket,
        server_ip,
        tcp_port,
        cancel.clone(),
    ));

    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
    (peer, responder_addr, cancel)
}

async fn recv_json(peer: &UdpSocket) -> serde_json::Value {
    let mut buf = [0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("expected a datagram within 2s")
        .expect("recv must succeed");
    serde_json::from_slice(&buf[..len]).expect("reply must be JSON")
}

/// The discovery scenario verbatim: an announce is answered with an ack
/// carrying the probed server IPv4 and the session port.
#[tokio::test]
async fn test_announce_is_acked_with_server_endpoint() {
    let server_ip: Ipv4Addr = "192.168.1.10".parse().unwrap();
    let (peer, responder, _cancel) = start_responder(server_ip, 5001).await;

    peer.send_to(
        br#"{"type":"announce","target_id":"PicoW1","ip":"192.168.1.50"}"#,
        responder,
    )
    .await
    .unwrap();

    let reply = recv_json(&peer).await;
    assert_eq!(
        reply,
        json!({"type": "ack", "server_ip": "192.168.1.10", "tcp_port": 5001})
    );
}

/// Discovery is stateless and idempotent: the reference firmware announces
/// several times and every announce gets its own ack.
#[tokio::test]
async fn test_repeated_announces_each_get_an_ack() {
    let (peer, responder, _cancel) = start_responder(Ipv4Addr::LOCALHOST, 5001).await;

    for _ in 0..3 {
        peer.send_to(
            br#"{"type":"announce","target_id":"PicoW1","ip":"192.168.1.50"}"#,
            responder,
        )
        .await
        .unwrap();
        let reply = recv_json(&peer).await;
        assert_eq!(reply["type"], "ack");
    }
}

/// A bad datagram must neither get a reply nor kill the responder.
#[tokio::test]
async fn test_bad_datagrams_are_ignored_and_loop_survives() {
    let (peer, responder, _cancel) = start_responder(Ipv4Addr::LOCALHOST, 5001).await;

    // Malformed JSON, an unknown type, a missing field, and non-UTF-8 noise.
    for bad in [
        b"not json at all".as_slice(),
        br#"{"type":"firmware_update","target_id":"PicoW1"}"#.as_slice(),
        br#"{"type":"announce"}"#.as_slice(),
        &[0xFF, 0xFE, 0x00],
    ] {
        peer.send_to(bad, responder).await.unwrap();
    }

    // None of the above produce a reply...
    let mut buf = [0u8; 256];
    let silence = timeout(Duration::from_millis(300), peer.recv_from(&mut buf)).await;
    assert!(silence.is_err(), "bad datagrams must not be answered");

    // ...and a valid announce afterwards still works.
    peer.send_to(
        br#"{"type":"announce","target_id":"PicoW1","ip":"192.168.1.50"}"#,
        responder,
    )
    .await
    .unwrap();
    let reply = recv_json(&peer).await;
    assert_eq!(reply["type"], "ack");
}

/// Cancelling the scope stops the responder: later announces go unanswered.
#[tokio::test]
async fn test_cancelled_responder_goes_silent() {
    let (peer, responder, cancel) = start_responder(Ipv4Addr::LOCALHOST, 5001).await;

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    peer.send_to(
        br#"{"type":"announce","target_id":"PicoW1","ip":"192.168.1.50"}"#,
        responder,
    )
    .await
    .unwrap();

    let mut buf = [0u8; 256];
    let silence = timeout(Duration::from_millis(300), peer.recv_from(&mut buf)).await;
    assert!(silence.is_err(), "a cancelled responder must not reply");
}
