//! Pure domain types with no protocol or I/O dependencies.

pub mod inventory;

pub use inventory::{DeviceEntry, DeviceInventory, DeviceKind, EntrySelector, RelayState};
