//! Infrastructure layer: everything that touches a socket or the host OS.

pub mod network;
