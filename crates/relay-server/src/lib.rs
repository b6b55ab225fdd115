//! # relay-server
//!
//! Axum WebSocket relay pairing one controller (phone) with one receiver (VR
//! headset).
//!
//! - `WebSocket` gateway on `/` and `/ws`: connection registry, role slots,
//!   frame routing, per-connection write queue
//! - Liveness monitor: transport pings, eviction of silent peers
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{ConfigError, ServerError};
pub use server::{RelayServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
