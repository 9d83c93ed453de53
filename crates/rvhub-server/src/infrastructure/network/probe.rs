//! Primary LAN address probe.
//!
//! The discovery `ack` must tell controllers which IPv4 address to open
//! their TCP session to. The probe runs once at startup, picks the first
//! usable IPv4 unicast address from the host's interfaces, and the result is
//! cached by the coordinator for the lifetime of the service. Re-probing on
//! interface changes is deliberately not done.

use std::net::Ipv4Addr;

use if_addrs::{get_if_addrs, IfAddr};
use tracing::{debug, warn};

/// Returns the first IPv4 unicast address on a non-loopback interface.
///
/// Never fails: on enumeration errors, or when no suitable interface exists
/// (e.g. no network cable on a bench setup), it logs a diagnostic and falls
/// back to `127.0.0.1` so the rest of the coordinator keeps running.
pub fn primary_ipv4() -> Ipv4Addr {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("interface enumeration failed ({e}); falling back to 127.0.0.1");
            return Ipv4Addr::LOCALHOST;
        }
    };

    for interface in interfaces {
        if interface.is_loopback() {
            continue;
        }
        if let IfAddr::V4(v4) = &interface.addr {
            // 169.254.0.0/16 means DHCP failed on that interface; an address
            // controllers cannot usefully reach.
            if v4.ip.is_link_local() {
                continue;
            }
            debug!("primary address probe selected {} on {}", v4.ip, interface.name);
            return v4.ip;
        }
    }

    warn!("no non-loopback IPv4 interface found; falling back to 127.0.0.1");
    Ipv4Addr::LOCALHOST
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_ipv4_never_returns_unspecified() {
        // Whatever the host looks like, the probe must return something a
        // controller could at least attempt to connect to.
        let ip = primary_ipv4();
        assert!(!ip.is_unspecified());
        assert!(!ip.is_broadcast());
    }

    #[test]
    fn test_primary_ipv4_is_stable_across_calls() {
        // The coordinator caches the first result; the probe itself should
        // not flap between calls on a quiet host.
        assert_eq!(primary_ipv4(), primary_ipv4());
    }
}
