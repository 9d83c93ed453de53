//! The device registry: one record per currently bound controller.
//!
//! A single map owns both the device state and the connection handle, so a
//! record is never observable without its session and vice versa. All
//! mutations go through one async `Mutex`; critical sections never await, so
//! the lock is held only for map operations.
//!
//! # Session identity
//!
//! Two sessions can race to bind the same `target_id` (a controller that
//! rebooted reconnects while its old half-open socket is still around).
//! Binding is last-writer-wins: [`DeviceRegistry::bind`] returns the
//! displaced record so the caller can close its socket, and every removal is
//! guarded by the numeric session id so a displaced session's handler cannot
//! tear down the record that replaced it. This is what makes "exactly one
//! `DeviceDisconnected` per bound session" structural: each `(target_id,
//! session_id)` pair leaves the map exactly once, through exactly one of
//! `bind` (displacement), `unbind`, or `evict_stale`, and the caller of that
//! removal fires the event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rvhub_core::domain::inventory::{DeviceEntry, DeviceInventory, EntrySelector, RelayState};
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Write half of a session socket, shared between the session task and
/// command dispatch. Boxed as a trait object so tests can substitute an
/// in-memory duplex stream for a real TCP half.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Handle to one live session, stored inside its device record.
#[derive(Clone)]
pub struct SessionHandle {
    /// Process-unique id distinguishing this session from any other that may
    /// bind the same `target_id`.
    pub session_id: u64,
    pub peer_addr: SocketAddr,
    pub writer: SharedWriter,
    /// Cancelling this token makes the session's reader loop exit and drop
    /// the socket.
    pub cancel: CancellationToken,
}

impl SessionHandle {
    /// Asks the owning session task to shut down.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Everything the coordinator knows about one bound controller.
#[derive(Debug)]
pub struct DeviceRecord {
    pub target_id: String,
    pub inventory: DeviceInventory,
    /// Instant of the most recent frame of any kind from the peer.
    pub last_heartbeat: Instant,
    pub session: SessionHandle,
}

impl DeviceRecord {
    pub fn new(target_id: String, inventory: DeviceInventory, session: SessionHandle) -> Self {
        Self {
            target_id,
            inventory,
            last_heartbeat: Instant::now(),
            session,
        }
    }
}

/// In-memory registry of all bound controllers, keyed by `target_id`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Mutex<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a record, displacing any previous record for the same
    /// `target_id`.
    ///
    /// The displaced record is returned so the caller can close its session
    /// and fire its disconnect event; last writer wins.
    pub async fn bind(&self, record: DeviceRecord) -> Option<DeviceRecord> {
        let mut records = self.records.lock().await;
        records.insert(record.target_id.clone(), record)
    }

    /// Removes the record for `target_id`, but only if it still belongs to
    /// the session identified by `session_id`.
    ///
    /// Returns `None` when the record was already displaced or evicted, in
    /// which case someone else owns (or fired) its teardown.
    pub async fn unbind(&self, target_id: &str, session_id: u64) -> Option<DeviceRecord> {
        let mut records = self.records.lock().await;
        if records.get(target_id)?.session.session_id != session_id {
            return None;
        }
        records.remove(target_id)
    }

    /// Refreshes `last_heartbeat` on the record owned by this session.
    ///
    /// Returns `false` when the session no longer owns a record.
    pub async fn touch(&self, target_id: &str, session_id: u64) -> bool {
        let mut records = self.records.lock().await;
        match records.get_mut(target_id) {
            Some(record) if record.session.session_id == session_id => {
                record.last_heartbeat = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Updates one entry's state on the record owned by this session.
    ///
    /// Returns `false` when the session no longer owns a record or no entry
    /// matches the selector.
    pub async fn update_state(
        &self,
        target_id: &str,
        session_id: u64,
        selector: &EntrySelector,
        state: RelayState,
    ) -> bool {
        let mut records = self.records.lock().await;
        match records.get_mut(target_id) {
            Some(record) if record.session.session_id == session_id => {
                record.inventory.set_state(selector, state)
            }
            _ => false,
        }
    }

    /// Atomically removes and returns every record whose last frame is older
    /// than `timeout`.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<DeviceRecord> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let stale: Vec<String> = records
            .iter()
            .filter(|(_, r)| now.duration_since(r.last_heartbeat) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .iter()
            .filter_map(|id| records.remove(id))
            .collect()
    }

    /// Point-in-time copy of every bound controller's inventory, safe to hand
    /// to external consumers.
    pub async fn snapshot(&self) -> HashMap<String, Vec<DeviceEntry>> {
        let records = self.records.lock().await;
        records
            .iter()
            .map(|(id, r)| (id.clone(), r.inventory.snapshot()))
            .collect()
    }

    /// The shared write half for `target_id`, if a session is bound.
    pub async fn writer_for(&self, target_id: &str) -> Option<SharedWriter> {
        let records = self.records.lock().await;
        records.get(target_id).map(|r| Arc::clone(&r.session.writer))
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
