//! Wire envelopes exchanged between the relay and its peers.
//!
//! Each frame is one JSON object whose `type` field selects an [`Envelope`]
//! variant. Variants carry only the fields their type uses; field names are
//! camelCase on the wire (`objectId`, `clientType`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Role slot a connection can occupy in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Phone-side client that originates accept/reject decisions.
    Controller,
    /// VR-side client that materializes accepted objects.
    Receiver,
}

impl Role {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client kind announced in an `identify` frame.
///
/// Unknown kinds are preserved rather than rejected so that a newer client
/// does not get its whole frame bounced as malformed. Build values with
/// `ClientType::from(String)`; `"phone"` and `"vr"` never land in `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClientType {
    /// `"phone"`
    Phone,
    /// `"vr"`
    Vr,
    /// Anything else.
    Other(UnknownClientType),
}

/// A client kind the relay does not recognize.
///
/// Only obtainable through `ClientType::from`, which keeps the known kinds
/// out of it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnknownClientType(String);

impl UnknownClientType {
    /// Wire string as received.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ClientType {
    /// Role this client type claims, if any.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Phone => Some(Role::Controller),
            Self::Vr => Some(Role::Receiver),
            Self::Other(_) => None,
        }
    }

    /// Wire string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Phone => "phone",
            Self::Vr => "vr",
            Self::Other(other) => other.as_str(),
        }
    }
}

impl From<String> for ClientType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "phone" => Self::Phone,
            "vr" => Self::Vr,
            _ => Self::Other(UnknownClientType(s)),
        }
    }
}

impl From<&str> for ClientType {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<ClientType> for String {
    fn from(ct: ClientType) -> Self {
        match ct {
            ClientType::Phone => "phone".into(),
            ClientType::Vr => "vr".into(),
            ClientType::Other(UnknownClientType(s)) => s,
        }
    }
}

/// One relay frame (discriminated by `type`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Handshake acknowledgment sent to every new peer.
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        /// Greeting text.
        message: String,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Peer announces which role it plays.
    #[serde(rename = "identify")]
    Identify {
        /// `phone` or `vr`.
        #[serde(rename = "clientType")]
        client_type: ClientType,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Controller accepted an object; forwarded to the receiver.
    #[serde(rename = "swipe_right")]
    SwipeRight {
        /// Object the decision applies to.
        #[serde(rename = "objectId")]
        object_id: String,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Controller rejected an object; forwarded fire-and-forget.
    #[serde(rename = "swipe_left")]
    SwipeLeft {
        /// Object the decision applies to.
        #[serde(rename = "objectId")]
        object_id: String,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Relay confirms an accept reached the receiver.
    #[serde(rename = "swipe_confirmed")]
    SwipeConfirmed {
        /// Object that was forwarded.
        #[serde(rename = "objectId")]
        object_id: String,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Receiver materialized an object.
    #[serde(rename = "spawn_confirmed")]
    SpawnConfirmed {
        /// Object that was spawned.
        #[serde(rename = "objectId")]
        object_id: String,
        /// Whether spawning succeeded, when the receiver reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Receiver presence signal sent to the controller.
    #[serde(rename = "vr_status")]
    VrStatus {
        /// Whether a receiver currently holds the slot.
        connected: bool,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Application-level keep-alive request.
    #[serde(rename = "ping")]
    Ping {
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Reply to `ping`.
    #[serde(rename = "pong")]
    Pong {
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
    /// Recoverable failure reported to the sender.
    #[serde(rename = "error")]
    Error {
        /// Human-readable description.
        message: String,
        /// Epoch ms.
        #[serde(default)]
        timestamp: i64,
    },
}

impl Envelope {
    /// Every wire `type` string this enum understands.
    pub const KNOWN_TYPES: [&'static str; 10] = [
        "connection_established",
        "identify",
        "swipe_right",
        "swipe_left",
        "swipe_confirmed",
        "spawn_confirmed",
        "vr_status",
        "ping",
        "pong",
        "error",
    ];

    /// Wire `type` string of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::Identify { .. } => "identify",
            Self::SwipeRight { .. } => "swipe_right",
            Self::SwipeLeft { .. } => "swipe_left",
            Self::SwipeConfirmed { .. } => "swipe_confirmed",
            Self::SpawnConfirmed { .. } => "spawn_confirmed",
            Self::VrStatus { .. } => "vr_status",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }

    /// Timestamp carried by the envelope (epoch ms, `0` when absent on input).
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::ConnectionEstablished { timestamp, .. }
            | Self::Identify { timestamp, .. }
            | Self::SwipeRight { timestamp, .. }
            | Self::SwipeLeft { timestamp, .. }
            | Self::SwipeConfirmed { timestamp, .. }
            | Self::SpawnConfirmed { timestamp, .. }
            | Self::VrStatus { timestamp, .. }
            | Self::Ping { timestamp }
            | Self::Pong { timestamp }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Object ID for the swipe/spawn variants.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::SwipeRight { object_id, .. }
            | Self::SwipeLeft { object_id, .. }
            | Self::SwipeConfirmed { object_id, .. }
            | Self::SpawnConfirmed { object_id, .. } => Some(object_id),
            _ => None,
        }
    }

    /// `connection_established` stamped now.
    pub fn connection_established(message: impl Into<String>) -> Self {
        Self::ConnectionEstablished {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    /// `swipe_confirmed` stamped now.
    pub fn swipe_confirmed(object_id: impl Into<String>) -> Self {
        Self::SwipeConfirmed {
            object_id: object_id.into(),
            timestamp: now_millis(),
        }
    }

    /// `vr_status` stamped now.
    pub fn vr_status(connected: bool) -> Self {
        Self::VrStatus {
            connected,
            timestamp: now_millis(),
        }
    }

    /// `pong` stamped now.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    /// `error` stamped now.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}
