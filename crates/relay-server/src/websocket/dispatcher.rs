//! Routing decisions for decoded frames.
//!
//! The relay is a two-role mailbox: controller → receiver for swipes,
//! receiver → controller for spawn confirmations. Everything is handled
//! synchronously against the registry; writes are non-blocking enqueues so
//! no lock is ever held across a suspension point.

use std::sync::Arc;

use metrics::counter;
use relay_core::{decode, ClientType, ConnectionId, DecodeError, Envelope, Role};
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, SendError};
use super::registry::{ConnectionRegistry, RoleAssignment};
use crate::metrics::{
    RELAY_DECODE_ERRORS_TOTAL, RELAY_DROPPED_FRAMES_TOTAL, RELAY_FRAMES_FORWARDED_TOTAL,
    RELAY_FRAMES_RECEIVED_TOTAL,
};

/// Greeting carried by `connection_established`.
pub const GREETING: &str = "Connected to relay server";
/// Error text when an accept arrives with no receiver.
pub const RECEIVER_NOT_CONNECTED: &str = "receiver not connected";
/// Error text for frames that fail to decode.
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// What the dispatcher did with one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sender now holds a role slot.
    Identified {
        /// Slot taken.
        role: Role,
        /// Previous holder that lost the slot.
        displaced: Option<ConnectionId>,
    },
    /// `identify` with a client type that maps to no role.
    IdentifyIgnored,
    /// Frame forwarded to the peer holding `to`.
    Forwarded {
        /// Destination slot.
        to: Role,
        /// Whether a `swipe_confirmed` went back to the controller.
        confirmed: bool,
    },
    /// Destination slot empty.
    PeerAbsent {
        /// Slot that was empty.
        role: Role,
        /// Whether an `error` went back to the sender.
        replied: bool,
    },
    /// Destination was present but the write failed.
    ForwardFailed {
        /// Destination slot.
        to: Role,
        /// Why the write failed.
        error: SendError,
    },
    /// `ping` answered with `pong`.
    Ponged,
    /// Frame failed to decode; `error` sent to the sender.
    Rejected {
        /// Classification from [`DecodeError::error_kind`].
        reason: &'static str,
    },
    /// Sender was already closed; frame discarded.
    SenderClosed,
    /// Logged and dropped without a reply.
    Ignored {
        /// The frame's `type`.
        kind: String,
    },
}

/// Routes frames between the controller and receiver slots.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher routes through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send the `connection_established` handshake to a new peer.
    pub fn greet(&self, connection: &ClientConnection) {
        let _ = reply(connection, &Envelope::connection_established(GREETING));
    }

    /// Tell the controller, if any, that the receiver slot emptied.
    pub fn receiver_disconnected(&self) {
        if let Some(controller) = self.registry.get_by_role(Role::Controller) {
            let _ = reply(&controller, &Envelope::vr_status(false));
        }
    }

    /// Decode and dispatch one raw text frame.
    ///
    /// Decode failures never close the connection: unknown types are
    /// dropped, anything else gets an `error` reply.
    pub fn handle_frame(&self, sender: &ClientConnection, raw: &Arc<String>) -> DispatchOutcome {
        match decode(raw) {
            Ok(envelope) => self.dispatch(sender, &envelope, raw),
            Err(DecodeError::UnknownType(kind)) => {
                info!(conn_id = %sender.id, kind, "unrecognized message type, dropping");
                DispatchOutcome::Ignored { kind }
            }
            Err(e) => {
                warn!(conn_id = %sender.id, error = %e, "invalid frame");
                self.reject(sender, e.error_kind())
            }
        }
    }

    /// Answer an undecodable frame with `error` and count it. The sender
    /// stays open.
    pub fn reject(&self, sender: &ClientConnection, reason: &'static str) -> DispatchOutcome {
        counter!(RELAY_DECODE_ERRORS_TOTAL, "reason" => reason).increment(1);
        let _ = reply(sender, &Envelope::error(INVALID_MESSAGE_FORMAT));
        DispatchOutcome::Rejected { reason }
    }

    /// Route an already-decoded envelope. `raw` is what gets forwarded.
    pub fn dispatch(
        &self,
        sender: &ClientConnection,
        envelope: &Envelope,
        raw: &Arc<String>,
    ) -> DispatchOutcome {
        let kind = envelope.kind();
        counter!(RELAY_FRAMES_RECEIVED_TOTAL, "type" => kind).increment(1);
        debug!(conn_id = %sender.id, kind, "dispatching frame");

        match envelope {
            Envelope::Identify { client_type, .. } => self.identify(sender, client_type),
            Envelope::SwipeRight { object_id, .. } => self.accept(sender, object_id, raw),
            Envelope::SwipeLeft { object_id, .. } => {
                let Some(receiver) = self.registry.get_by_role(Role::Receiver) else {
                    debug!(object_id, "reject dropped, no receiver");
                    return DispatchOutcome::PeerAbsent {
                        role: Role::Receiver,
                        replied: false,
                    };
                };
                match self.forward(&receiver, raw, kind) {
                    Ok(()) => DispatchOutcome::Forwarded {
                        to: Role::Receiver,
                        confirmed: false,
                    },
                    Err(error) => DispatchOutcome::ForwardFailed {
                        to: Role::Receiver,
                        error,
                    },
                }
            }
            Envelope::SpawnConfirmed { object_id, .. } => {
                info!(object_id, "object spawned on receiver");
                let Some(controller) = self.registry.get_by_role(Role::Controller) else {
                    debug!(object_id, "spawn confirmation dropped, no controller");
                    return DispatchOutcome::PeerAbsent {
                        role: Role::Controller,
                        replied: false,
                    };
                };
                match self.forward(&controller, raw, kind) {
                    Ok(()) => DispatchOutcome::Forwarded {
                        to: Role::Controller,
                        confirmed: false,
                    },
                    Err(error) => DispatchOutcome::ForwardFailed {
                        to: Role::Controller,
                        error,
                    },
                }
            }
            Envelope::Ping { .. } => {
                let _ = reply(sender, &Envelope::pong());
                DispatchOutcome::Ponged
            }
            Envelope::ConnectionEstablished { .. }
            | Envelope::SwipeConfirmed { .. }
            | Envelope::VrStatus { .. }
            | Envelope::Pong { .. }
            | Envelope::Error { .. } => {
                debug!(conn_id = %sender.id, kind, "server-originated type from peer, dropping");
                DispatchOutcome::Ignored { kind: kind.into() }
            }
        }
    }

    fn identify(&self, sender: &ClientConnection, client_type: &ClientType) -> DispatchOutcome {
        let Some(role) = client_type.role() else {
            warn!(conn_id = %sender.id, client_type = client_type.as_str(), "unknown client type");
            return DispatchOutcome::IdentifyIgnored;
        };

        let displaced = match self.registry.set_role(sender, role) {
            RoleAssignment::Assigned { displaced } => displaced,
            RoleAssignment::NotRegistered => {
                debug!(conn_id = %sender.id, "identify from unregistered connection");
                return DispatchOutcome::IdentifyIgnored;
            }
        };
        info!(conn_id = %sender.id, %role, displaced = ?displaced, "client identified");

        match role {
            Role::Receiver => {
                if let Some(controller) = self.registry.get_by_role(Role::Controller) {
                    let _ = reply(&controller, &Envelope::vr_status(true));
                }
            }
            Role::Controller => {
                let present = self.registry.get_by_role(Role::Receiver).is_some();
                let _ = reply(sender, &Envelope::vr_status(present));
            }
        }

        DispatchOutcome::Identified { role, displaced }
    }

    fn accept(&self, sender: &ClientConnection, object_id: &str, raw: &Arc<String>) -> DispatchOutcome {
        let Some(receiver) = self.registry.get_by_role(Role::Receiver) else {
            warn!(conn_id = %sender.id, object_id, "accept with no receiver connected");
            let _ = reply(sender, &Envelope::error(RECEIVER_NOT_CONNECTED));
            return DispatchOutcome::PeerAbsent {
                role: Role::Receiver,
                replied: true,
            };
        };

        if let Err(error) = self.forward(&receiver, raw, "swipe_right") {
            return DispatchOutcome::ForwardFailed {
                to: Role::Receiver,
                error,
            };
        }
        info!(object_id, "accept forwarded to receiver");

        let confirmed = self
            .registry
            .get_by_role(Role::Controller)
            .is_some_and(|controller| reply(&controller, &Envelope::swipe_confirmed(object_id)));
        DispatchOutcome::Forwarded {
            to: Role::Receiver,
            confirmed,
        }
    }

    /// Forward `raw` verbatim. A closed destination is force-closed so its
    /// session tears down and the slot empties.
    fn forward(
        &self,
        target: &ClientConnection,
        raw: &Arc<String>,
        kind: &'static str,
    ) -> Result<(), SendError> {
        match target.send(raw.clone()) {
            Ok(()) => {
                counter!(RELAY_FRAMES_FORWARDED_TOTAL, "type" => kind).increment(1);
                Ok(())
            }
            Err(error) => {
                warn!(conn_id = %target.id, kind, %error, "forward failed");
                counter!(RELAY_DROPPED_FRAMES_TOTAL).increment(1);
                if error == SendError::Closed {
                    target.request_close();
                }
                Err(error)
            }
        }
    }
}

/// Best-effort reply; failures are logged and counted, never propagated.
fn reply(target: &ClientConnection, envelope: &Envelope) -> bool {
    match target.send_envelope(envelope) {
        Ok(()) => true,
        Err(error) => {
            debug!(conn_id = %target.id, kind = envelope.kind(), %error, "reply not delivered");
            counter!(RELAY_DROPPED_FRAMES_TOTAL).increment(1);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use assert_matches::assert_matches;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Peer {
        conn: Arc<ClientConnection>,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        /// Drain every queued text frame as JSON.
        fn frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                if let Outbound::Text(text) = frame {
                    out.push(serde_json::from_str(&text).unwrap());
                }
            }
            out
        }
    }

    fn setup() -> (Dispatcher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(32));
        (Dispatcher::new(registry.clone()), registry)
    }

    fn connect(registry: &ConnectionRegistry) -> Peer {
        let (conn, rx) = registry.register(CancellationToken::new());
        Peer { conn, rx }
    }

    fn send(d: &Dispatcher, peer: &Peer, raw: &str) -> DispatchOutcome {
        d.handle_frame(&peer.conn, &Arc::new(raw.to_string()))
    }

    fn identified(d: &Dispatcher, reg: &ConnectionRegistry, client_type: &str) -> Peer {
        let mut peer = connect(reg);
        let _ = send(
            d,
            &peer,
            &format!(r#"{{"type":"identify","clientType":"{client_type}"}}"#),
        );
        let _ = peer.frames();
        peer
    }

    #[test]
    fn identify_phone_takes_controller_slot() {
        let (d, reg) = setup();
        let phone = connect(&reg);
        let outcome = send(&d, &phone, r#"{"type":"identify","clientType":"phone"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Identified {
                role: Role::Controller,
                displaced: None
            }
        );
        assert_eq!(reg.get_by_role(Role::Controller).unwrap().id, phone.conn.id);
    }

    #[test]
    fn identify_phone_reports_receiver_presence() {
        let (d, reg) = setup();
        let _vr = identified(&d, &reg, "vr");
        let mut phone = connect(&reg);
        let _ = send(&d, &phone, r#"{"type":"identify","clientType":"phone"}"#);
        let frames = phone.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "vr_status");
        assert_eq!(frames[0]["connected"], true);
    }

    #[test]
    fn identify_vr_notifies_controller() {
        let (d, reg) = setup();
        let mut phone = identified(&d, &reg, "phone");
        let mut vr = connect(&reg);
        let outcome = send(&d, &vr, r#"{"type":"identify","clientType":"vr"}"#);
        assert_matches!(outcome, DispatchOutcome::Identified { role: Role::Receiver, .. });
        let frames = phone.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "vr_status");
        assert_eq!(frames[0]["connected"], true);
        assert!(vr.frames().is_empty());
    }

    #[test]
    fn identify_unknown_client_type_is_ignored() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        let outcome = send(&d, &peer, r#"{"type":"identify","clientType":"toaster"}"#);
        assert_eq!(outcome, DispatchOutcome::IdentifyIgnored);
        assert!(peer.conn.role().is_none());
        assert!(peer.frames().is_empty());
    }

    #[test]
    fn slots_track_most_recent_identify() {
        let (d, reg) = setup();
        let vr = identified(&d, &reg, "vr");
        let _p1 = identified(&d, &reg, "phone");
        let p2 = identified(&d, &reg, "phone");
        assert_eq!(reg.get_by_role(Role::Controller).unwrap().id, p2.conn.id);
        assert_eq!(reg.get_by_role(Role::Receiver).unwrap().id, vr.conn.id);
    }

    #[test]
    fn accept_with_receiver_forwards_and_confirms() {
        let (d, reg) = setup();
        let mut vr = identified(&d, &reg, "vr");
        let mut phone = identified(&d, &reg, "phone");

        let outcome = send(&d, &phone, r#"{"type":"swipe_right","objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Forwarded {
                to: Role::Receiver,
                confirmed: true
            }
        );

        let to_vr = vr.frames();
        assert_eq!(to_vr.len(), 1);
        assert_eq!(to_vr[0]["type"], "swipe_right");
        assert_eq!(to_vr[0]["objectId"], "cube");

        let to_phone = phone.frames();
        assert_eq!(to_phone.len(), 1);
        assert_eq!(to_phone[0]["type"], "swipe_confirmed");
        assert_eq!(to_phone[0]["objectId"], "cube");
    }

    #[test]
    fn accept_forwards_raw_frame_verbatim() {
        let (d, reg) = setup();
        let mut vr = identified(&d, &reg, "vr");
        let phone = identified(&d, &reg, "phone");
        let raw = r#"{"type":"swipe_right","objectId":"cube","timestamp":7,"extra":"kept"}"#;
        let _ = send(&d, &phone, raw);
        let Outbound::Text(text) = vr.rx.try_recv().unwrap() else {
            panic!("expected text");
        };
        assert_eq!(text.as_str(), raw);
    }

    #[test]
    fn accept_without_receiver_replies_error_only_to_sender() {
        let (d, reg) = setup();
        let mut phone = identified(&d, &reg, "phone");
        let mut bystander = connect(&reg);

        let outcome = send(&d, &phone, r#"{"type":"swipe_right","objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::PeerAbsent {
                role: Role::Receiver,
                replied: true
            }
        );
        let frames = phone.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["message"], RECEIVER_NOT_CONNECTED);
        assert!(bystander.frames().is_empty());
    }

    #[test]
    fn accept_from_unidentified_sender_confirms_to_controller() {
        let (d, reg) = setup();
        let mut vr = identified(&d, &reg, "vr");
        let mut phone = identified(&d, &reg, "phone");
        let mut anon = connect(&reg);

        let _ = send(&d, &anon, r#"{"type":"swipe_right","objectId":"cone"}"#);
        assert_eq!(vr.frames().len(), 1);
        assert_eq!(phone.frames()[0]["type"], "swipe_confirmed");
        assert!(anon.frames().is_empty());
    }

    #[test]
    fn reject_never_confirms() {
        let (d, reg) = setup();
        let mut vr = identified(&d, &reg, "vr");
        let mut phone = identified(&d, &reg, "phone");

        let outcome = send(&d, &phone, r#"{"type":"swipe_left","objectId":"sphere"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Forwarded {
                to: Role::Receiver,
                confirmed: false
            }
        );
        assert_eq!(vr.frames()[0]["type"], "swipe_left");
        assert!(phone.frames().is_empty());
    }

    #[test]
    fn reject_without_receiver_is_silent() {
        let (d, reg) = setup();
        let mut phone = identified(&d, &reg, "phone");
        let outcome = send(&d, &phone, r#"{"type":"swipe_left","objectId":"sphere"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::PeerAbsent {
                role: Role::Receiver,
                replied: false
            }
        );
        assert!(phone.frames().is_empty());
    }

    #[test]
    fn spawn_confirmed_reaches_controller() {
        let (d, reg) = setup();
        let mut phone = identified(&d, &reg, "phone");
        let vr = identified(&d, &reg, "vr");
        let _ = phone.frames();

        let outcome = send(&d, &vr, r#"{"type":"spawn_confirmed","objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Forwarded {
                to: Role::Controller,
                confirmed: false
            }
        );
        let frames = phone.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "spawn_confirmed");
        assert_eq!(frames[0]["objectId"], "cube");
    }

    #[test]
    fn spawn_confirmed_without_controller_is_dropped() {
        let (d, reg) = setup();
        let mut vr = identified(&d, &reg, "vr");
        let outcome = send(&d, &vr, r#"{"type":"spawn_confirmed","objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::PeerAbsent {
                role: Role::Controller,
                replied: false
            }
        );
        assert!(vr.frames().is_empty());
    }

    #[test]
    fn ping_gets_pong() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        assert_eq!(send(&d, &peer, r#"{"type":"ping"}"#), DispatchOutcome::Ponged);
        let frames = peer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "pong");
        assert!(frames[0]["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn missing_type_replies_error_and_keeps_going() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        let outcome = send(&d, &peer, r#"{"objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected {
                reason: "missing_type"
            }
        );
        let frames = peer.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["message"], INVALID_MESSAGE_FORMAT);

        assert_eq!(send(&d, &peer, r#"{"type":"ping"}"#), DispatchOutcome::Ponged);
        assert_eq!(peer.frames()[0]["type"], "pong");
    }

    #[test]
    fn malformed_json_replies_error() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        assert_matches!(
            send(&d, &peer, "{not json"),
            DispatchOutcome::Rejected { reason: "malformed" }
        );
        assert_eq!(peer.frames()[0]["type"], "error");
    }

    #[test]
    fn unknown_type_is_dropped_without_reply_or_broadcast() {
        let (d, reg) = setup();
        let mut a = connect(&reg);
        let mut b = connect(&reg);
        let outcome = send(&d, &a, r#"{"type":"teleport","objectId":"x"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::Ignored {
                kind: "teleport".into()
            }
        );
        assert!(a.frames().is_empty());
        assert!(b.frames().is_empty());
    }

    #[test]
    fn server_originated_types_are_ignored() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        let outcome = send(&d, &peer, r#"{"type":"pong","timestamp":1}"#);
        assert_eq!(outcome, DispatchOutcome::Ignored { kind: "pong".into() });
        assert!(peer.frames().is_empty());
    }

    #[test]
    fn forward_to_closed_receiver_requests_close_and_skips_confirm() {
        let (d, reg) = setup();
        let vr = identified(&d, &reg, "vr");
        let mut phone = identified(&d, &reg, "phone");
        drop(vr.rx);

        let outcome = send(&d, &phone, r#"{"type":"swipe_right","objectId":"cube"}"#);
        assert_eq!(
            outcome,
            DispatchOutcome::ForwardFailed {
                to: Role::Receiver,
                error: SendError::Closed
            }
        );
        assert!(vr.conn.close_requested());
        assert!(phone.frames().is_empty());
    }

    #[test]
    fn greet_sends_connection_established() {
        let (d, reg) = setup();
        let mut peer = connect(&reg);
        d.greet(&peer.conn);
        let frames = peer.frames();
        assert_eq!(frames[0]["type"], "connection_established");
        assert_eq!(frames[0]["message"], GREETING);
    }

    #[test]
    fn receiver_disconnected_notifies_controller() {
        let (d, reg) = setup();
        let mut phone = identified(&d, &reg, "phone");
        d.receiver_disconnected();
        let frames = phone.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "vr_status");
        assert_eq!(frames[0]["connected"], false);
    }
}
