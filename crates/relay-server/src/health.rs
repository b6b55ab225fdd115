//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::websocket::registry::RegistrySnapshot;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// A controller holds its slot.
    pub controller_connected: bool,
    /// A receiver holds its slot.
    pub receiver_connected: bool,
}

/// Build a health response from a registry snapshot.
pub fn health_check(start_time: Instant, snapshot: RegistrySnapshot) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: snapshot.connections,
        controller_connected: snapshot.controller_connected,
        receiver_connected: snapshot.receiver_connected,
    }
}
