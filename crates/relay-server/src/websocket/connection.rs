//! Per-peer connection state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::{encode, ConnectionId, Envelope, Role};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<String>),
    /// Transport-level ping.
    Ping,
}

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closed or its writer is gone.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
}

/// One connected peer.
///
/// All writes go through the bounded `tx` queue, drained by a single writer
/// task, so two logical writers never interleave on the same socket.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    role: Mutex<Option<Role>>,
    tx: mpsc::Sender<Outbound>,
    open: AtomicBool,
    /// When the connection was accepted.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    missed_probes: AtomicU32,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Create an open, unassigned connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            role: Mutex::new(None),
            tx,
            open: AtomicBool::new(true),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            missed_probes: AtomicU32::new(0),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            cancel,
        }
    }

    /// Role last claimed via `identify`, if any.
    pub fn role(&self) -> Option<Role> {
        *self.role.lock()
    }

    /// Overwrite the claimed role, returning the previous one.
    pub(crate) fn set_role(&self, role: Role) -> Option<Role> {
        self.role.lock().replace(role)
    }

    /// Whether close has not yet been observed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flip to closed. Returns `true` only for the first caller.
    pub(crate) fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    /// Queue a text frame.
    pub fn send(&self, frame: Arc<String>) -> Result<(), SendError> {
        self.enqueue(Outbound::Text(frame))
    }

    /// Encode and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), SendError> {
        self.send(Arc::new(encode(envelope)))
    }

    /// Queue a transport ping.
    pub fn send_ping(&self) -> Result<(), SendError> {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag. `true` if the peer was heard from
    /// since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Increment and return the consecutive missed-probe count.
    pub fn record_missed_probe(&self) -> u32 {
        self.missed_probes.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clear the missed-probe count.
    pub fn reset_missed_probes(&self) {
        self.missed_probes.store(0, Ordering::Relaxed);
    }

    /// Current consecutive missed-probe count.
    pub fn missed_probes(&self) -> u32 {
        self.missed_probes.load(Ordering::Relaxed)
    }

    /// Time since the peer was last heard from.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the session task to tear this connection down.
    pub fn request_close(&self) {
        self.cancel.cancel();
    }

    /// Whether teardown has been requested.
    pub fn close_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once teardown has been requested.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("role", &self.role())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
