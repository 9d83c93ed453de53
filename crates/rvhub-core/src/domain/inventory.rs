//! Device inventory model.
//!
//! A controller declares its inventory once, in its `device_info` frame: an
//! ordered list of controllable entries (relays, at minimum). The coordinator
//! keeps that list alive for the duration of the session and mutates only the
//! runtime `state` of each entry as `status_update` frames arrive.
//!
//! [`DeviceInventory`] owns both the ordered entry list and an id-keyed index
//! over it, so lookups by entry id are O(1) while snapshots preserve the
//! declaration order the controller chose.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Device kinds ──────────────────────────────────────────────────────────────

/// The kind of a controllable entry.
///
/// Only `relay` carries defined behavior today. Unrecognized kinds are kept
/// verbatim so a controller running newer firmware can still register; the
/// coordinator stores and forwards them without interpreting their state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceKind {
    Relay,
    Other(String),
}

impl DeviceKind {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceKind::Relay => "relay",
            DeviceKind::Other(s) => s,
        }
    }
}

impl From<String> for DeviceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "relay" => DeviceKind::Relay,
            _ => DeviceKind::Other(s),
        }
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Relay state ───────────────────────────────────────────────────────────────

/// Error returned when a wire string is not a valid relay state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid relay state {0:?}: expected \"on\" or \"off\"")]
pub struct InvalidRelayState(pub String);

/// Runtime state of a relay entry.
///
/// The wire representation is the closed string set `{"on", "off"}`.
/// Anything else is rejected at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    #[default]
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        }
    }
}

impl std::str::FromStr for RelayState {
    type Err = InvalidRelayState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(RelayState::On),
            "off" => Ok(RelayState::Off),
            _ => Err(InvalidRelayState(s.to_string())),
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entries and inventory ─────────────────────────────────────────────────────

/// One controllable entry on a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Identifier unique within the declaring controller.
    pub id: String,
    /// Human-readable name, e.g. "Water Heater".
    pub label: String,
    pub device_type: DeviceKind,
    /// Current runtime value. Starts at the declared initial state.
    pub state: RelayState,
}

/// Which entry a state change addresses.
///
/// Controllers built from the reference firmware address entries by label;
/// the entry id is accepted as the unambiguous alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySelector {
    ById(String),
    ByLabel(String),
}

impl fmt::Display for EntrySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySelector::ById(id) => write!(f, "id={id}"),
            EntrySelector::ByLabel(label) => write!(f, "label={label}"),
        }
    }
}

/// The declared inventory of one controller.
///
/// Invariant: for every entry `e` in declaration order, the id index maps
/// `e.id` back to that same entry. A later declaration reusing an id replaces
/// the earlier entry in place, keeping its original position.
#[derive(Debug, Clone, Default)]
pub struct DeviceInventory {
    entries: Vec<DeviceEntry>,
    by_id: HashMap<String, usize>,
}

impl DeviceInventory {
    pub fn new(declared: Vec<DeviceEntry>) -> Self {
        let mut inv = DeviceInventory {
            entries: Vec::with_capacity(declared.len()),
            by_id: HashMap::with_capacity(declared.len()),
        };
        for entry in declared {
            match inv.by_id.get(&entry.id) {
                Some(&idx) => inv.entries[idx] = entry,
                None => {
                    inv.by_id.insert(entry.id.clone(), inv.entries.len());
                    inv.entries.push(entry);
                }
            }
        }
        inv
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DeviceEntry> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// Linear scan; labels are not required to be unique, the first match wins.
    pub fn get_by_label(&self, label: &str) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    /// Updates the state of the entry addressed by `selector`.
    ///
    /// Returns `false` when no entry matches; the inventory is unchanged.
    pub fn set_state(&mut self, selector: &EntrySelector, state: RelayState) -> bool {
        let entry = match selector {
            EntrySelector::ById(id) => {
                let idx = match self.by_id.get(id) {
                    Some(&idx) => idx,
                    None => return false,
                };
                &mut self.entries[idx]
            }
            EntrySelector::ByLabel(label) => {
                match self.entries.iter_mut().find(|e| e.label == *label) {
                    Some(entry) => entry,
                    None => return false,
                }
            }
        };
        entry.state = state;
        true
    }

    /// Owned copy of the entries, for point-in-time snapshots.
    pub fn snapshot(&self) -> Vec<DeviceEntry> {
        self.entries.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
