//! Network infrastructure for the coordinator.
//!
//! Four cooperating pieces, leaves first:
//!
//! - **`probe`**     – One-shot lookup of the server's primary LAN IPv4.
//! - **`discovery`** – UDP responder answering controller `announce`
//!   broadcasts with an `ack` that carries the probed IPv4 and the session
//!   port.
//! - **`session`**   – TCP listener plus one reader task per controller
//!   session; parses newline-JSON frames and drives the registry.
//! - **`liveness`**  – Periodic registry scan evicting silent sessions.
//!
//! All loops run under one `CancellationToken` scope owned by the
//! coordinator; cancelling it stops every loop and closes every socket.

pub mod discovery;
pub mod liveness;
pub mod probe;
pub mod session;
