//! Coordinator configuration.
//!
//! [`CoordinatorConfig`] is the single source of truth for all runtime
//! settings. It is a plain struct with no global state; the binary entry
//! point populates it from CLI arguments and environment variables, while
//! tests construct it directly (usually with port 0 for ephemeral binds).

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rvhub_core::protocol::messages::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};

/// All runtime configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address both listeners bind to. `0.0.0.0` accepts announcements and
    /// sessions from any interface on the LAN.
    pub bind_addr: IpAddr,

    /// UDP discovery port. Controllers broadcast `announce` datagrams here.
    pub udp_port: u16,

    /// TCP session port, advertised to controllers in the discovery `ack`.
    pub tcp_port: u16,

    /// Age of the newest frame beyond which a session counts as dead.
    ///
    /// Defaults to twice the 30 s heartbeat interval the reference firmware
    /// uses, so one lost heartbeat does not evict a healthy controller.
    pub heartbeat_timeout: Duration,

    /// How often the liveness monitor scans the registry.
    pub heartbeat_scan_interval: Duration,

    /// TCP keepalive idle time applied to each accepted session socket.
    pub tcp_keepalive_idle: Duration,

    /// TCP keepalive probe interval applied to each accepted session socket.
    pub tcp_keepalive_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: DEFAULT_UDP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
            heartbeat_timeout: Duration::from_secs(60),
            heartbeat_scan_interval: Duration::from_secs(10),
            tcp_keepalive_idle: Duration::from_secs(30),
            tcp_keepalive_interval: Duration::from_secs(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Deployed controllers have the default ports baked into their config
    /// files, so changing these defaults is a breaking change.
    #[test]
    fn test_default_ports_match_controller_firmware() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.udp_port, 5000, "default discovery port must be 5000");
        assert_eq!(cfg.tcp_port, 5001, "default session port must be 5001");
    }

    #[test]
    fn test_default_bind_addr_is_unspecified() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_default_heartbeat_timeout_is_twice_firmware_interval() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(cfg.heartbeat_scan_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_default_keepalive_surfaces_half_open_within_a_minute() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.tcp_keepalive_idle, Duration::from_secs(30));
        assert_eq!(cfg.tcp_keepalive_interval, Duration::from_secs(10));
    }
}
