//! Registry of open connections and the two role slots.
//!
//! Slots hold connection IDs, not handles: a slot only resolves while its
//! connection is still in the open set, and `unregister` clears any slot
//! pointing at the departing connection. All state sits behind one mutex;
//! callers copy out an `Arc<ClientConnection>` and release the lock before
//! writing to it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{ConnectionId, Role};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::{ClientConnection, Outbound};

/// Result of [`ConnectionRegistry::set_role`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleAssignment {
    /// The slot now points at the connection.
    Assigned {
        /// Previous, different holder of the slot (left open, de-slotted).
        displaced: Option<ConnectionId>,
    },
    /// The connection is not (or no longer) registered.
    NotRegistered,
}

/// Result of a successful [`ConnectionRegistry::unregister`].
#[derive(Debug)]
pub struct Unregistered {
    /// The removed connection.
    pub connection: Arc<ClientConnection>,
    /// Role slot the connection held at removal time.
    pub vacated: Option<Role>,
}

/// Point-in-time view for health reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Open connections.
    pub connections: usize,
    /// Controller slot occupied.
    pub controller_connected: bool,
    /// Receiver slot occupied.
    pub receiver_connected: bool,
}

#[derive(Default)]
struct Slots {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    controller: Option<ConnectionId>,
    receiver: Option<ConnectionId>,
}

impl Slots {
    fn slot_mut(&mut self, role: Role) -> &mut Option<ConnectionId> {
        match role {
            Role::Controller => &mut self.controller,
            Role::Receiver => &mut self.receiver,
        }
    }

    fn slot(&self, role: Role) -> Option<&ConnectionId> {
        match role {
            Role::Controller => self.controller.as_ref(),
            Role::Receiver => self.receiver.as_ref(),
        }
    }
}

/// All open connections plus the controller and receiver slots.
pub struct ConnectionRegistry {
    inner: Mutex<Slots>,
    send_queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry whose connections get queues of the given size.
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Slots::default()),
            send_queue_capacity: send_queue_capacity.max(1),
        }
    }

    /// Create and register a new unassigned connection.
    ///
    /// Returns the handle and the receiving end of its outbound queue, which
    /// the caller hands to the writer task.
    pub fn register(
        &self,
        cancel: CancellationToken,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx, cancel));
        self.insert(conn.clone());
        (conn, rx)
    }

    /// Register an already-built connection.
    pub fn insert(&self, connection: Arc<ClientConnection>) {
        let mut inner = self.inner.lock();
        let _ = inner.connections.insert(connection.id.clone(), connection);
    }

    /// Point the slot for `role` at `connection`.
    ///
    /// If the connection previously held the other slot, that slot is
    /// cleared so a connection never occupies both.
    pub fn set_role(&self, connection: &ClientConnection, role: Role) -> RoleAssignment {
        let mut inner = self.inner.lock();
        if !connection.is_open() || !inner.connections.contains_key(&connection.id) {
            return RoleAssignment::NotRegistered;
        }

        if let Some(previous) = connection.set_role(role) {
            if previous != role && inner.slot(previous) == Some(&connection.id) {
                *inner.slot_mut(previous) = None;
            }
        }

        let displaced = inner
            .slot_mut(role)
            .replace(connection.id.clone())
            .filter(|old| *old != connection.id);
        RoleAssignment::Assigned { displaced }
    }

    /// Current holder of a slot, or `None` when the slot is empty.
    pub fn get_by_role(&self, role: Role) -> Option<Arc<ClientConnection>> {
        let inner = self.inner.lock();
        inner
            .slot(role)
            .and_then(|id| inner.connections.get(id))
            .cloned()
    }

    /// Remove a connection, clearing any slot that points at it.
    ///
    /// Returns `None` if the connection was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Unregistered> {
        let mut inner = self.inner.lock();
        let connection = inner.connections.remove(id)?;
        let mut vacated = None;
        for role in [Role::Controller, Role::Receiver] {
            if inner.slot(role) == Some(id) {
                *inner.slot_mut(role) = None;
                vacated = Some(role);
            }
        }
        Some(Unregistered {
            connection,
            vacated,
        })
    }

    /// Number of open connections.
    pub fn count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Copy of every open connection handle.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.lock().connections.values().cloned().collect()
    }

    /// Counts and slot occupancy.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.lock();
        RegistrySnapshot {
            connections: inner.connections.len(),
            controller_connected: inner.controller.is_some(),
            receiver_connected: inner.receiver.is_some(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
