//! Liveness monitor: periodic eviction of silent sessions.
//!
//! TCP keepalive catches half-open sockets, but a controller can also wedge
//! with its socket intact (firmware stuck in a Wi-Fi reconnect loop, for
//! example). The monitor runs on its own timer, independent of socket
//! activity, so silent peers are detected even on an otherwise idle server.
//!
//! Eviction goes through [`DeviceRegistry::evict_stale`], which removes the
//! expired records in the same critical section that the session server's
//! own teardown uses; a record leaves the registry exactly once, so
//! `DeviceDisconnected` fires exactly once per bound session no matter which
//! path wins the race.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::events::{CoordinatorEvent, EventBus};
use crate::application::registry::DeviceRegistry;

/// Scans the registry every `scan_interval` until `cancel` fires, evicting
/// records whose newest frame is older than `timeout`.
pub async fn run_liveness_monitor(
    registry: Arc<DeviceRegistry>,
    events: EventBus,
    timeout: Duration,
    scan_interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        "liveness monitor running (timeout {}s, scan every {}s)",
        timeout.as_secs(),
        scan_interval.as_secs()
    );

    let mut ticker = tokio::time::interval(scan_interval);
    // The first tick fires immediately; skip it so a controller that
    // registered just before startup is not scanned at t=0.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let evicted = registry.evict_stale(timeout).await;
        for record in evicted {
            warn!(
                "evicting {} (no frame for over {}s)",
                record.target_id,
                timeout.as_secs()
            );
            // Close the socket first, then announce: observers must never see
            // the event while the session could still produce frames.
            record.session.close();
            {
                let mut writer = record.session.writer.lock().await;
                let _ = writer.shutdown().await;
            }
            events.publish(CoordinatorEvent::DeviceDisconnected {
                target_id: record.target_id,
            });
        }
    }

    debug!("liveness monitor stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{DeviceRecord, SessionHandle, SharedWriter};
    use rvhub_core::domain::inventory::DeviceInventory;
    use tokio::sync::Mutex;

    fn silent_record(target_id: &str, session_id: u64) -> (DeviceRecord, CancellationToken) {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(tokio::io::sink())));
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            session_id,
            peer_addr: "127.0.0.1:40000".parse().unwrap(),
            writer,
            cancel: cancel.clone(),
        };
        (
            DeviceRecord::new(target_id.to_string(), DeviceInventory::default(), handle),
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_evicts_silent_record_and_fires_event() {
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();

        let (record, session_cancel) = silent_record("PicoW1", 1);
        registry.bind(record).await;

        let monitor = tokio::spawn(run_liveness_monitor(
            Arc::clone(&registry),
            events.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        // 70 virtual seconds with no traffic: past the timeout and at least
        // one scan tick beyond it.
        tokio::time::advance(Duration::from_secs(70)).await;
        tokio::task::yield_now().await;

        let event = rx.recv().await.unwrap();
        match event {
            CoordinatorEvent::DeviceDisconnected { target_id } => {
                assert_eq!(target_id, "PicoW1")
            }
            other => panic!("expected DeviceDisconnected, got {other:?}"),
        }
        assert!(registry.is_empty().await, "record must be removed");
        assert!(
            session_cancel.is_cancelled(),
            "the session socket must be asked to close"
        );

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_spares_records_within_timeout() {
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventBus::default();
        let cancel = CancellationToken::new();

        let (record, _session_cancel) = silent_record("PicoW1", 1);
        registry.bind(record).await;

        let monitor = tokio::spawn(run_liveness_monitor(
            Arc::clone(&registry),
            events.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        // Several scans happen, but the record is younger than the timeout.
        tokio::time::advance(Duration::from_secs(45)).await;
        tokio::task::yield_now().await;

        assert_eq!(registry.len().await, 1, "young record must survive scans");

        cancel.cancel();
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn test_monitor_exits_on_cancellation() {
        let registry = Arc::new(DeviceRegistry::new());
        let events = EventBus::default();
        let cancel = CancellationToken::new();

        let monitor = tokio::spawn(run_liveness_monitor(
            registry,
            events,
            Duration::from_secs(60),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor must stop promptly after cancellation")
            .unwrap();
    }
}
