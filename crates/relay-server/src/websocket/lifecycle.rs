//! Connection lifecycle: `Open(unassigned) → Open(role) → Closed`.
//!
//! `close` is the only path into `Closed` and runs its side effects at most
//! once per connection, however many of the session loop, the liveness
//! monitor and a failed forward race to call it.

use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use relay_core::Role;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Outbound};
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::registry::ConnectionRegistry;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_DISCONNECTIONS_TOTAL,
};

/// Why a connection entered `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Transport read or write error.
    TransportError,
    /// Liveness monitor gave up on the peer.
    LivenessTimeout,
    /// Teardown requested (failed forward or server shutdown).
    Requested,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::LivenessTimeout => "liveness_timeout",
            Self::Requested => "requested",
        })
    }
}

/// Owns accept/frame/close transitions and keeps the registry consistent.
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
}

impl ConnectionLifecycle {
    /// Build a lifecycle manager over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let dispatcher = Dispatcher::new(registry.clone());
        Self {
            registry,
            dispatcher,
        }
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Frame router.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register a freshly accepted peer and queue its handshake.
    pub fn accept(
        &self,
        cancel: CancellationToken,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (connection, rx) = self.registry.register(cancel);
        info!(conn_id = %connection.id, "client connected");
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        self.dispatcher.greet(&connection);
        (connection, rx)
    }

    /// Handle one inbound text frame. Frames on a closed connection are no-ops.
    pub fn on_frame(&self, connection: &ClientConnection, raw: &Arc<String>) -> DispatchOutcome {
        if !connection.is_open() {
            return DispatchOutcome::SenderClosed;
        }
        connection.mark_alive();
        self.dispatcher.handle_frame(connection, raw)
    }

    /// Handle one inbound binary frame. UTF-8 payloads are treated as text;
    /// anything else gets the same `error` reply as malformed JSON.
    pub fn on_binary(&self, connection: &ClientConnection, payload: &[u8]) -> DispatchOutcome {
        match std::str::from_utf8(payload) {
            Ok(text) => self.on_frame(connection, &Arc::new(text.to_owned())),
            Err(_) if !connection.is_open() => DispatchOutcome::SenderClosed,
            Err(_) => {
                connection.mark_alive();
                warn!(conn_id = %connection.id, len = payload.len(), "binary frame is not UTF-8");
                self.dispatcher.reject(connection, "not_utf8")
            }
        }
    }

    /// Transition to `Closed`. Returns `false` if the connection was already closed.
    ///
    /// Unregisters the connection, and if it held the receiver slot tells the
    /// controller with `vr_status{connected:false}`.
    pub fn close(&self, connection: &ClientConnection, reason: CloseReason) -> bool {
        if !connection.mark_closed() {
            return false;
        }
        connection.request_close();

        let vacated = self
            .registry
            .unregister(&connection.id)
            .and_then(|removed| removed.vacated);

        info!(
            conn_id = %connection.id,
            role = ?connection.role(),
            vacated = ?vacated,
            dropped = connection.drop_count(),
            %reason,
            "client disconnected"
        );
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());

        if vacated == Some(Role::Receiver) {
            debug!("receiver slot emptied, notifying controller");
            self.dispatcher.receiver_disconnected();
        }
        true
    }
}
