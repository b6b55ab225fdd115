//! WebSocket relay: connection state, role registry, routing, liveness and
//! the per-socket session loop.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub mod session;
