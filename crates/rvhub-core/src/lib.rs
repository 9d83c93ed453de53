//! # rvhub-core
//!
//! Shared library for the rvhub device-automation fabric containing the LAN
//! wire protocol and the device inventory model.
//!
//! This crate is used by the coordinator server and by test peers. It has
//! zero dependencies on sockets, async runtimes, or OS APIs.
//!
//! - **`protocol`** – How bytes travel over the network. Every message is one
//!   compact JSON object; TCP frames are newline-delimited, UDP discovery
//!   messages are one object per datagram.
//!
//! - **`domain`** – The inventory model: the controllable entries a
//!   controller declares at registration and their runtime state.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rvhub_core::ClientFrame` instead of `rvhub_core::protocol::messages::ClientFrame`.
pub use domain::inventory::{DeviceEntry, DeviceInventory, DeviceKind, EntrySelector, RelayState};
pub use protocol::codec::{decode_client_frame, decode_discovery, encode_frame, FrameError, FrameSplitter};
pub use protocol::messages::{ClientFrame, CommandData, DiscoveryMessage, EntryDecl, ServerFrame};
