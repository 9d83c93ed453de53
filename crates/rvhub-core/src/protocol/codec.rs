//! Line codec for the newline-delimited JSON session protocol.
//!
//! Decoding happens in two steps so the caller can observe the raw protocol
//! flow before interpretation:
//!
//! 1. [`parse_object`] checks UTF-8, parses one JSON object, and extracts the
//!    top-level `"type"` string.
//! 2. [`classify_client_frame`] / [`classify_discovery`] turn the parsed
//!    object into a typed message, or report an unknown type or a missing
//!    required field.
//!
//! [`FrameSplitter`] sits below both: it buffers raw bytes from the socket
//! and yields complete newline-terminated frames, keeping any partial
//! trailing bytes for the next read. Concatenating valid frames with `'\n'`
//! and feeding the result in arbitrary chunks yields exactly the original
//! frame sequence.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{ClientFrame, DiscoveryMessage};

/// Errors produced while decoding a frame or datagram.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// The text is not a JSON object.
    #[error("malformed JSON frame: {0}")]
    Malformed(String),

    /// The object has no top-level string `type` field.
    #[error("frame has no string `type` field")]
    MissingType,

    /// The `type` value is not one this endpoint understands.
    #[error("unknown frame type {0:?}")]
    UnknownType(String),

    /// The `type` is known but a required field is missing or mistyped.
    #[error("invalid `{frame_type}` frame: {reason}")]
    InvalidPayload { frame_type: String, reason: String },

    /// A frame could not be serialized for sending.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// ── Parsing and classification ────────────────────────────────────────────────

/// Parses one frame's bytes into its `type` string and the raw JSON object.
///
/// # Errors
///
/// Returns [`FrameError::NotUtf8`] or [`FrameError::Malformed`] when the
/// bytes are not one UTF-8 JSON object, and [`FrameError::MissingType`] when
/// the object lacks a string `type` field.
pub fn parse_object(bytes: &[u8]) -> Result<(String, Value), FrameError> {
    let text = std::str::from_utf8(bytes)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(FrameError::Malformed(format!(
            "expected a JSON object, got {}",
            json_type_name(&value)
        )));
    }
    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_string();
    Ok((frame_type, value))
}

/// Turns a parsed session object into a typed [`ClientFrame`].
///
/// # Errors
///
/// Returns [`FrameError::UnknownType`] for a `type` outside the session
/// vocabulary and [`FrameError::InvalidPayload`] when a known frame is
/// missing required fields.
pub fn classify_client_frame(frame_type: &str, value: Value) -> Result<ClientFrame, FrameError> {
    match frame_type {
        "device_info" | "heartbeat" | "status_update" | "status" => {
            serde_json::from_value(value).map_err(|e| FrameError::InvalidPayload {
                frame_type: frame_type.to_string(),
                reason: e.to_string(),
            })
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

/// Turns a parsed discovery object into a typed [`DiscoveryMessage`].
///
/// # Errors
///
/// Same taxonomy as [`classify_client_frame`].
pub fn classify_discovery(frame_type: &str, value: Value) -> Result<DiscoveryMessage, FrameError> {
    match frame_type {
        "announce" | "ack" => {
            serde_json::from_value(value).map_err(|e| FrameError::InvalidPayload {
                frame_type: frame_type.to_string(),
                reason: e.to_string(),
            })
        }
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

/// Decodes one session frame: [`parse_object`] + [`classify_client_frame`].
///
/// Returns the typed frame together with the raw object so callers can
/// republish the untouched protocol flow.
///
/// # Errors
///
/// Any [`FrameError`] from the two decoding steps.
pub fn decode_client_frame(bytes: &[u8]) -> Result<(ClientFrame, Value), FrameError> {
    let (frame_type, value) = parse_object(bytes)?;
    let frame = classify_client_frame(&frame_type, value.clone())?;
    Ok((frame, value))
}

/// Decodes one discovery datagram.
///
/// # Errors
///
/// Any [`FrameError`] from the two decoding steps.
pub fn decode_discovery(bytes: &[u8]) -> Result<DiscoveryMessage, FrameError> {
    let (frame_type, value) = parse_object(bytes)?;
    classify_discovery(&frame_type, value)
}

/// Encodes a message as one compact JSON object terminated by `'\n'`.
///
/// Compact serialization never emits raw newlines inside the object, so the
/// newline is unambiguous as a frame terminator.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(msg).map_err(|e| FrameError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Frame assembly ────────────────────────────────────────────────────────────

/// Accumulates raw socket bytes and yields complete newline-terminated frames.
///
/// A frame may arrive split across any number of reads, or several frames may
/// arrive in one read; the splitter handles both. The terminating `'\n'` (and
/// a `'\r'` before it, for peers that send CRLF) is stripped from the yielded
/// frame.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, or `None` if no full line is buffered.
    ///
    /// Empty lines are yielded as empty frames; the caller decides whether to
    /// skip them.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut frame: Vec<u8> = self.buf.drain(..=newline).collect();
        frame.pop(); // the '\n'
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        Some(frame)
    }

    /// Number of buffered bytes not yet yielded as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
