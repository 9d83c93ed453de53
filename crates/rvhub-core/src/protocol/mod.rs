//! Protocol module containing message types and the line codec.
//!
//! Every message between a controller and the coordinator is one compact
//! UTF-8 JSON object discriminated by a top-level `"type"` field:
//!
//! - On the UDP discovery port, one object per datagram
//!   (`announce` in, `ack` out).
//! - On the TCP session, objects are newline-delimited; the codec's
//!   [`FrameSplitter`] reassembles frames across arbitrarily chunked reads.
//!
//! # Sub-modules
//!
//! - **`messages`** – All message type definitions.
//! - **`codec`**    – Parsing, classification, and frame assembly.

pub mod codec;
pub mod messages;

pub use codec::{
    classify_client_frame, classify_discovery, decode_client_frame, decode_discovery,
    encode_frame, parse_object, FrameError, FrameSplitter,
};
pub use messages::*;
