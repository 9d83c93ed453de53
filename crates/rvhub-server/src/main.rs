//! rvhub coordinator — entry point.
//!
//! Discovers relay controllers on the local network over UDP, keeps one
//! newline-JSON TCP session per controller, tracks each controller's
//! declared inventory and live state, and dispatches `command` frames on
//! demand. Dashboards and other consumers subscribe to the coordinator's
//! event stream and call `send_command`; this binary only hosts the core.
//!
//! # Usage
//!
//! ```text
//! rvhub-server [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>                 Bind address for both listeners [default: 0.0.0.0]
//!   --udp-port <PORT>             UDP discovery port [default: 5000]
//!   --tcp-port <PORT>             TCP session port [default: 5001]
//!   --heartbeat-timeout <SECS>    Silence before a session is evicted [default: 60]
//!   --scan-interval <SECS>        Liveness scan period [default: 10]
//!   --keepalive-idle <SECS>       TCP keepalive idle time [default: 30]
//!   --keepalive-interval <SECS>   TCP keepalive probe interval [default: 10]
//! ```
//!
//! Every option can also be set through an `RVHUB_*` environment variable
//! (CLI arguments take precedence). Logging is controlled by `RUST_LOG`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rvhub_server::config::CoordinatorConfig;
use rvhub_server::coordinator::Coordinator;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// rvhub network coordinator.
#[derive(Debug, Parser)]
#[command(
    name = "rvhub-server",
    about = "Network coordinator for the rvhub device-automation fabric",
    version
)]
struct Cli {
    /// Address both listeners bind to. `0.0.0.0` accepts controllers from
    /// any interface on the LAN.
    #[arg(long, default_value = "0.0.0.0", env = "RVHUB_BIND")]
    bind: IpAddr,

    /// UDP port controllers broadcast their `announce` datagrams to.
    #[arg(long, default_value_t = 5000, env = "RVHUB_UDP_PORT")]
    udp_port: u16,

    /// TCP port controllers open their session to (advertised in the
    /// discovery ack).
    #[arg(long, default_value_t = 5001, env = "RVHUB_TCP_PORT")]
    tcp_port: u16,

    /// Seconds of silence before a session is evicted. The reference
    /// firmware heartbeats every 30 s; the default tolerates one lost
    /// heartbeat.
    #[arg(long, default_value_t = 60, env = "RVHUB_HEARTBEAT_TIMEOUT")]
    heartbeat_timeout: u64,

    /// Seconds between liveness scans of the registry.
    #[arg(long, default_value_t = 10, env = "RVHUB_SCAN_INTERVAL")]
    scan_interval: u64,

    /// TCP keepalive idle time in seconds, applied to each session socket.
    #[arg(long, default_value_t = 30, env = "RVHUB_KEEPALIVE_IDLE")]
    keepalive_idle: u64,

    /// TCP keepalive probe interval in seconds.
    #[arg(long, default_value_t = 10, env = "RVHUB_KEEPALIVE_INTERVAL")]
    keepalive_interval: u64,
}

impl Cli {
    fn into_config(self) -> CoordinatorConfig {
        CoordinatorConfig {
            bind_addr: self.bind,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            heartbeat_scan_interval: Duration::from_secs(self.scan_interval),
            tcp_keepalive_idle: Duration::from_secs(self.keepalive_idle),
            tcp_keepalive_interval: Duration::from_secs(self.keepalive_interval),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; level overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    info!(
        "rvhub coordinator starting (discovery udp/{}, sessions tcp/{})",
        config.udp_port, config.tcp_port
    );

    let coordinator = Arc::new(Coordinator::new(config));

    // Ctrl-C triggers the cancellation scope; `start` then returns once
    // every activity has stopped and every socket is closed.
    {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown signal received");
                    coordinator.stop();
                }
                Err(e) => {
                    tracing::error!("failed to listen for shutdown signal: {e}");
                }
            }
        });
    }

    coordinator.start().await;

    info!("rvhub coordinator stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
