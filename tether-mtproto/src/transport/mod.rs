//! Pluggable transport framing.
//!
//! A [`Transport`] turns opaque MTProto payloads into framed bytes and back.
//! The codecs are sans-IO: they read from and write into [`BytesMut`], so any
//! byte stream can carry them. Obfuscation is a separate stream-level layer
//! ([`obfuscated`]) that wraps whichever codec is in use.

mod abridged;
mod full;
mod intermediate;
pub mod obfuscated;

use std::fmt;

use bytes::BytesMut;

pub use abridged::Abridged;
pub use full::Full;
pub use intermediate::Intermediate;

/// Errors raised while decoding framed input.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportError {
    /// The frame header announces an impossible length.
    BadLength { len: usize },
    /// Full transport checksum mismatch. The packet has been consumed.
    InvalidChecksum { expected: u32, got: u32 },
    /// Full transport sequence number out of order.
    BadSeq { expected: u32, got: u32 },
}

impl TransportError {
    /// Whether the reader may keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidChecksum { .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength { len } => write!(f, "bad frame length: {len}"),
            Self::InvalidChecksum { expected, got } => {
                write!(f, "checksum mismatch: expected {expected:#010x}, got {got:#010x}")
            }
            Self::BadSeq { expected, got } => write!(f, "bad sequence number: expected {expected}, got {got}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A framing strategy.
pub trait Transport: Send {
    /// Bytes sent once, right after connecting, when not obfuscated.
    fn init_bytes(&self) -> &'static [u8];

    /// The 4-byte protocol tag placed in an obfuscation header, or `None` if
    /// this framing cannot be obfuscated.
    fn obfuscation_tag(&self) -> Option<[u8; 4]>;

    /// Frame `payload` and append it to `out`.
    ///
    /// # Panics
    ///
    /// Word-based framings panic if `payload.len()` is not a multiple of 4.
    fn encode(&mut self, payload: &[u8], out: &mut BytesMut);

    /// Take one complete packet from the front of `input`.
    ///
    /// Returns `Ok(None)` and leaves `input` untouched while the packet is
    /// still incomplete.
    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Vec<u8>>, TransportError>;
}

/// The status code carried by a 4-byte packet, such as `-404` for an
/// unknown auth key. Real messages are never this short.
pub fn status_code(packet: &[u8]) -> Option<i32> {
    match *packet {
        [a, b, c, d] => Some(i32::from_le_bytes([a, b, c, d])),
        _ => None,
    }
}
