//! Application layer: the device registry and the event stream.

pub mod events;
pub mod registry;

pub use events::{CoordinatorEvent, EventBus};
pub use registry::{DeviceRecord, DeviceRegistry, SessionHandle};
