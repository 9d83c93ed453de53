//! Wire-format conformance tests.
//!
//! These pin the exact JSON shapes controllers produce and consume, using the
//! literal payloads from the reference firmware. If any of these break,
//! deployed controllers stop talking to the coordinator.

use rvhub_core::protocol::codec::{decode_client_frame, decode_discovery, encode_frame, FrameSplitter};
use rvhub_core::protocol::messages::{
    ClientFrame, CommandData, DiscoveryMessage, ServerFrame,
};
use rvhub_core::{DeviceKind, RelayState};
use serde_json::json;

// ── Discovery handshake ───────────────────────────────────────────────────────

#[test]
fn test_announce_payload_from_reference_firmware_decodes() {
    // Byte-for-byte what a Pico W broadcasts after joining the network.
    let datagram = br#"{"type": "announce", "target_id": "PicoW1", "ip": "192.168.1.50"}"#;

    let msg = decode_discovery(datagram).expect("announce must decode");

    assert_eq!(
        msg,
        DiscoveryMessage::Announce {
            target_id: "PicoW1".to_string(),
            ip: "192.168.1.50".to_string(),
        }
    );
}

#[test]
fn test_ack_reply_matches_expected_shape() {
    let ack = DiscoveryMessage::Ack {
        server_ip: "192.168.1.10".to_string(),
        tcp_port: 5001,
    };

    let line = encode_frame(&ack).unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();

    assert_eq!(
        value,
        json!({"type": "ack", "server_ip": "192.168.1.10", "tcp_port": 5001})
    );
}

// ── Session registration ──────────────────────────────────────────────────────

#[test]
fn test_registration_frame_decodes_with_full_entry() {
    let line = br#"{"type":"device_info","target_id":"PicoW1","relays":[{"id":"r1","label":"Pump","device_type":"relay","initial_state":"off"}]}"#;

    let (frame, raw) = decode_client_frame(line).expect("device_info must decode");

    assert_eq!(frame.frame_type(), "device_info");
    assert_eq!(raw["target_id"], "PicoW1");
    match frame {
        ClientFrame::DeviceInfo { target_id, relays } => {
            assert_eq!(target_id, "PicoW1");
            assert_eq!(relays[0].label, "Pump");
            assert_eq!(
                relays[0].initial_state.as_deref().unwrap().parse::<RelayState>(),
                Ok(RelayState::Off)
            );
        }
        other => panic!("expected DeviceInfo, got {other:?}"),
    }
}

// ── Command dispatch ──────────────────────────────────────────────────────────

#[test]
fn test_command_frame_is_exactly_what_controllers_parse() {
    let cmd = ServerFrame::Command {
        target_id: "PicoW1".to_string(),
        data: CommandData {
            device_type: DeviceKind::Relay,
            label: "Pump".to_string(),
            state: "on".to_string(),
        },
    };

    let line = encode_frame(&cmd).unwrap();

    assert!(line.ends_with('\n'), "command frames are newline terminated");
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "command",
            "target_id": "PicoW1",
            "data": {"device_type": "relay", "label": "Pump", "state": "on"}
        })
    );
}

// ── Framing under adversarial chunking ────────────────────────────────────────

#[test]
fn test_frame_sequence_survives_every_chunking() {
    // A realistic session transcript: registration, heartbeat, two updates.
    let transcript: Vec<String> = vec![
        encode_frame(&ClientFrame::DeviceInfo {
            target_id: "PicoW1".to_string(),
            relays: vec![],
        })
        .unwrap(),
        encode_frame(&ClientFrame::Heartbeat {
            target_id: Some("PicoW1".to_string()),
        })
        .unwrap(),
        encode_frame(&ClientFrame::StatusUpdate {
            id: None,
            label: Some("Pump".to_string()),
            state: "on".to_string(),
        })
        .unwrap(),
        encode_frame(&ClientFrame::StatusUpdate {
            id: Some("r1".to_string()),
            label: None,
            state: "off".to_string(),
        })
        .unwrap(),
    ];
    let wire: Vec<u8> = transcript.iter().flat_map(|l| l.bytes()).collect();

    // Every chunk size from pathological (1 byte per read) to a single read.
    for chunk in 1..=wire.len() {
        let mut splitter = FrameSplitter::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            splitter.extend(piece);
            while let Some(frame) = splitter.next_frame() {
                let (typed, _) = decode_client_frame(&frame).expect("frame must decode");
                decoded.push(typed);
            }
        }

        assert_eq!(decoded.len(), transcript.len(), "chunk size {chunk}");
        assert_eq!(decoded[0].frame_type(), "device_info");
        assert_eq!(decoded[1].frame_type(), "heartbeat");
        assert_eq!(decoded[2].frame_type(), "status_update");
        assert_eq!(decoded[3].frame_type(), "status_update");
        assert_eq!(splitter.buffered(), 0, "chunk size {chunk}");
    }
}
