//! rvhub-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/` and
//! the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod config;
pub mod coordinator;
pub mod infrastructure;

pub use application::events::CoordinatorEvent;
pub use config::CoordinatorConfig;
pub use coordinator::{CommandError, Coordinator};
