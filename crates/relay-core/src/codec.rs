//! Frame codec: raw text ⇄ [`Envelope`].
//!
//! Decoding happens in two steps so failures can be told apart: the frame is
//! first parsed as generic JSON and its `type` inspected, then the object is
//! deserialized into the matching variant. The dispatcher treats
//! [`DecodeError::UnknownType`] differently from the other failures.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;

/// Why a frame could not be turned into an [`Envelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Valid JSON, but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// Object has no string `type` field.
    #[error("frame has no `type` field")]
    MissingType,
    /// `type` is not one the relay understands.
    #[error("unrecognized message type `{0}`")]
    UnknownType(String),
    /// Known `type`, but its fields do not match.
    #[error("invalid `{kind}` frame: {reason}")]
    InvalidFields {
        /// The frame's `type`.
        kind: String,
        /// Deserializer message.
        reason: String,
    },
}

impl DecodeError {
    /// Short classification string for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidFields { .. } => "invalid_fields",
        }
    }
}

/// Parse one text frame.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(ref map) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let kind = match map.get("type") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(DecodeError::MissingType),
    };
    if !Envelope::KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

/// Serialize an envelope into one text frame.
pub fn encode(envelope: &Envelope) -> String {
    // Envelope only holds strings, integers and booleans, so serialization
    // cannot fail.
    serde_json::to_string(envelope).unwrap_or_else(|_| String::from("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ClientType;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_identify() {
        let env = decode(r#"{"type":"identify","clientType":"phone"}"#).unwrap();
        assert_eq!(
            env,
            Envelope::Identify {
                client_type: ClientType::Phone,
                timestamp: 0,
            }
        );
    }

    #[test]
    fn decodes_swipe_with_timestamp() {
        let env = decode(r#"{"type":"swipe_right","objectId":"cube","timestamp":42}"#).unwrap();
        assert_eq!(
            env,
            Envelope::SwipeRight {
                object_id: "cube".into(),
                timestamp: 42,
            }
        );
    }

    #[test]
    fn ignores_extra_fields() {
        let env =
            decode(r#"{"type":"swipe_left","objectId":"sphere","color":"red"}"#).unwrap();
        assert_eq!(env.object_id(), Some("sphere"));
    }

    #[test]
    fn not_json_is_malformed() {
        assert_matches!(decode("not json"), Err(DecodeError::Malformed(_)));
        assert_matches!(decode(""), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn array_is_not_an_object() {
        assert_matches!(decode("[1,2,3]"), Err(DecodeError::NotAnObject));
    }

    #[test]
    fn missing_type() {
        assert_matches!(
            decode(r#"{"objectId":"cube"}"#),
            Err(DecodeError::MissingType)
        );
    }

    #[test]
    fn non_string_type_is_missing() {
        assert_matches!(decode(r#"{"type":7}"#), Err(DecodeError::MissingType));
    }

    #[test]
    fn unknown_type_is_reported_with_name() {
        let err = decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert_matches!(err, DecodeError::UnknownType(ref k) if k == "teleport");
        assert_eq!(err.error_kind(), "unknown_type");
    }

    #[test]
    fn known_type_with_missing_field() {
        let err = decode(r#"{"type":"swipe_right"}"#).unwrap_err();
        assert_matches!(err, DecodeError::InvalidFields { ref kind, .. } if kind == "swipe_right");
    }

    #[test]
    fn wrong_field_type_is_invalid() {
        assert_matches!(
            decode(r#"{"type":"vr_status","connected":"yes"}"#),
            Err(DecodeError::InvalidFields { .. })
        );
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let envelopes = [
            Envelope::connection_established("Connected to relay server"),
            Envelope::Identify {
                client_type: ClientType::Phone,
                timestamp: 1,
            },
            Envelope::Identify {
                client_type: ClientType::from("tablet"),
                timestamp: 3,
            },
            Envelope::SwipeRight {
                object_id: "cube".into(),
                timestamp: 1_700_000_000_123,
            },
            Envelope::SwipeLeft {
                object_id: "cone".into(),
                timestamp: 2,
            },
            Envelope::swipe_confirmed("cube"),
            Envelope::SpawnConfirmed {
                object_id: "sphere".into(),
                success: Some(false),
                timestamp: 9,
            },
            Envelope::SpawnConfirmed {
                object_id: "torus".into(),
                success: None,
                timestamp: 10,
            },
            Envelope::vr_status(true),
            Envelope::Ping { timestamp: 4 },
            Envelope::pong(),
            Envelope::error("receiver not connected"),
        ];
        for env in envelopes {
            assert_eq!(decode(&encode(&env)).unwrap(), env);
        }
    }

    #[test]
    fn known_client_type_survives_round_trip_as_known() {
        let env = decode(r#"{"type":"identify","clientType":"phone"}"#).unwrap();
        assert_matches!(env, Envelope::Identify { client_type: ClientType::Phone, .. });
        let again = decode(&encode(&env)).unwrap();
        assert_eq!(again, env);
    }

    #[test]
    fn error_display_mentions_cause() {
        let err = decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }
}
