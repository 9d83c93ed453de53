//! All rvhub wire message types.
//!
//! The canonical wire form is plain-keyed JSON, one object per frame. A
//! `version` field found in some controller firmware revisions is reserved:
//! it is ignored on read (serde skips unknown fields) and never emitted.

use serde::{Deserialize, Serialize};

use crate::domain::inventory::DeviceKind;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Default UDP discovery port.
pub const DEFAULT_UDP_PORT: u16 = 5000;

/// Default TCP session port.
pub const DEFAULT_TCP_PORT: u16 = 5001;

// ── Discovery (UDP) ───────────────────────────────────────────────────────────

/// Messages exchanged on the discovery port, one per datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoveryMessage {
    /// Controller broadcast announcing its presence.
    Announce { target_id: String, ip: String },
    /// Coordinator reply telling the controller where to open its session.
    Ack { server_ip: String, tcp_port: u16 },
}

// ── Session frames: controller → coordinator ──────────────────────────────────

/// Inventory entry as declared inside a `device_info` frame.
///
/// Controllers include firmware-local fields (GPIO pin numbers and the like)
/// alongside these; they are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDecl {
    pub id: String,
    pub label: String,
    pub device_type: DeviceKind,
    /// Declared startup state; defaults to `"off"` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
}

/// One entry of the `devices` array in a batch `status` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateReport {
    pub device_type: DeviceKind,
    pub label: String,
    pub state: String,
}

/// Payload of a batch `status` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub devices: Vec<DeviceStateReport>,
}

/// Frames a controller sends on its TCP session.
///
/// `Serialize` is derived as well so test peers can speak the protocol with
/// the same types the coordinator parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Registration handshake; binds the session to `target_id`.
    DeviceInfo {
        target_id: String,
        relays: Vec<EntryDecl>,
    },
    /// Periodic keep-alive. The `target_id` echo some firmware sends is
    /// accepted but the binding established by `device_info` is authoritative.
    Heartbeat {
        #[serde(default)]
        target_id: Option<String>,
    },
    /// Single-entry state change, addressed by entry id or label.
    StatusUpdate {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        label: Option<String>,
        state: String,
    },
    /// Batch state report, sent by the reference firmware at startup and on
    /// local button presses.
    Status { data: StatusData },
}

impl ClientFrame {
    /// Wire name of this frame's `type` field.
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::DeviceInfo { .. } => "device_info",
            ClientFrame::Heartbeat { .. } => "heartbeat",
            ClientFrame::StatusUpdate { .. } => "status_update",
            ClientFrame::Status { .. } => "status",
        }
    }
}

// ── Session frames: coordinator → controller ──────────────────────────────────

/// Payload of a `command` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    pub device_type: DeviceKind,
    pub label: String,
    pub state: String,
}

/// Frames the coordinator sends on a controller session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Command {
        target_id: String,
        data: CommandData,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
