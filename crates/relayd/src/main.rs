//! # relayd
//!
//! Relay server binary: resolves configuration, installs logging and
//! metrics, and serves until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use relay_logging::{LogFormat, LoggingConfig};
use relay_server::shutdown::wait_for_signal;
use relay_server::{RelayServer, ServerConfig};
use tracing::{info, warn, Level};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Log line format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Pretty,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => Self::Pretty,
            Format::Json => Self::Json,
        }
    }
}

/// Phone/VR relay server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "WebSocket relay between a phone controller and a VR receiver")]
struct Cli {
    /// Host to bind (overrides `RELAY_HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides `RELAY_PORT` / `PORT`; 0 for auto-assign).
    #[arg(long, short)]
    port: Option<u16>,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds between liveness probes.
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Seconds of silence before a peer is evicted.
    #[arg(long)]
    heartbeat_timeout: Option<u64>,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = Format::Pretty)]
    log_format: Format,

    /// Do not install the Prometheus recorder or serve `/metrics`.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level,
            module_levels: Vec::new(),
            format: self.log_format.into(),
        }
    }

    /// Flags win over the environment, which wins over defaults.
    fn apply_to(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.heartbeat_interval {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_timeout {
            config.heartbeat_timeout_secs = secs;
        }
    }
}

/// Address peers on the LAN should dial. A wildcard bind is replaced by
/// the machine's LAN address when one is known.
fn advertised_addr(bound: SocketAddr, lan_ip: Option<IpAddr>) -> SocketAddr {
    match lan_ip {
        Some(ip) if bound.ip().is_unspecified() => SocketAddr::new(ip, bound.port()),
        _ => bound,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    relay_logging::init_logging(&cli.logging_config()).context("Failed to initialize logging")?;

    let mut config = ServerConfig::from_env();
    cli.apply_to(&mut config);
    config.validate().context("Invalid server configuration")?;

    let mut server = RelayServer::new(config);
    if cli.no_metrics {
        info!("metrics disabled");
    } else {
        match relay_server::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics(handle),
            Err(error) => warn!(%error, "continuing without metrics"),
        }
    }

    let handle = server.listen().await.context("Failed to start relay server")?;
    let lan_ip = if handle.addr.ip().is_unspecified() {
        local_ip_address::local_ip()
            .inspect_err(|error| warn!(%error, "could not determine LAN address"))
            .ok()
    } else {
        None
    };
    let public = advertised_addr(handle.addr, lan_ip);
    info!(
        ws = %format!("ws://{public}/ws"),
        health = %format!("http://{public}/health"),
        "relay ready"
    );

    wait_for_signal().await;
    info!("shutting down");
    server
        .shutdown()
        .graceful_shutdown(handle.into_tasks(), Some(SHUTDOWN_TIMEOUT))
        .await;
    info!("relay stopped");
    Ok(())
}
