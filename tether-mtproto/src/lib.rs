//! Sans-IO MTProto building blocks.
//!
//! This crate handles:
//! * The authorization key handshake ([`authentication`])
//! * Session state: message ids, sequence numbers, salt and clock offset
//! * Encrypted framing once a key exists ([`EncryptedSession`])
//! * Batching queued requests into containers ([`MessagePacker`])
//! * Transport framing codecs and obfuscation ([`transport`])
//!
//! Nothing here touches a socket: bring your own I/O.

#![deny(unsafe_code)]

pub mod authentication;
pub mod encrypted;
pub mod message;
pub mod packer;
pub mod session;
pub mod transport;

pub use encrypted::{DecryptError, DecryptedMessage, EncryptedSession};
pub use message::Message;
pub use packer::{Batch, MessagePacker, Packable};
pub use session::Session;
