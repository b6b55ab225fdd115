//! # relay-core
//!
//! Shared vocabulary for the phone/VR relay:
//!
//! - **IDs**: `ConnectionId` newtype (UUID v7, time-ordered)
//! - **Envelopes**: `Envelope` sum type, one variant per wire `type`
//! - **Roles**: `Role` slots and the `ClientType` sent in `identify`
//! - **Codec**: `decode` / `encode` with a typed `DecodeError`

#![deny(unsafe_code)]

pub mod codec;
pub mod envelope;
pub mod ids;

pub use codec::{decode, encode, DecodeError};
pub use envelope::{now_millis, ClientType, Envelope, Role, UnknownClientType};
pub use ids::ConnectionId;
