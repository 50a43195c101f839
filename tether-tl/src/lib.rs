//! TL (Type Language) object model for the MTProto service layer.
//!
//! Only the constructors that the protocol machinery itself needs are defined
//! here: the authorization-key handshake, the message envelope (`rpc_result`,
//! `msg_container`, `gzip_packed`) and the service notifications that steer a
//! session (salts, acks, pings, resync notices). Application-level API types
//! are the caller's business; they only have to implement [`Serializable`]
//! and [`Deserializable`].
//!
//! # Overview
//!
//! | Module        | Contents                                                   |
//! |---------------|------------------------------------------------------------|
//! | [`types`]     | Concrete constructors (bare types) as `struct`s            |
//! | [`functions`] | RPC functions as `struct`s implementing [`RemoteCall`]     |
//! | [`enums`]     | Boxed types as `enum`s, dispatched on the constructor id   |
//!
//! ```rust
//! use tether_tl::{functions, Deserializable, Serializable};
//!
//! let ping = functions::Ping { ping_id: 42 };
//! let bytes = ping.to_bytes();
//! assert_eq!(&bytes[..4], &0x7abe77ecu32.to_le_bytes());
//! assert_eq!(functions::Ping::from_bytes(&bytes[4..]).unwrap(), ping);
//! ```

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod deserialize;
pub mod enums;
pub mod functions;
pub mod serialize;
pub mod types;

pub use deserialize::{Cursor, Deserializable};
pub use serialize::Serializable;

/// Bare vector: `vector` (lowercase) as opposed to the boxed `Vector`.
///
/// Used where the schema declares a length-prefixed list without the usual
/// `0x1cb5c415` constructor ID header (e.g. `future_salts.salts`).
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// Opaque, already-serialized object.
///
/// Returned by functions whose response type is generic, and used to carry
/// request bodies whose schema lives outside this crate.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self { Self(v) }
}

// ─── Core traits ──────────────────────────────────────────────────────────────

/// Every constructor has a unique 32-bit id.
pub trait Identifiable {
    /// The constructor ID as specified in the TL schema.
    const CONSTRUCTOR_ID: u32;
}

/// Marks a function type that can be sent as an RPC call.
///
/// `Return` is the type the server will respond with.
pub trait RemoteCall: Serializable {
    /// The deserialized response type.
    type Return: Deserializable;
}
