//! MTProto message framing types.

use std::fmt;

/// A message as it travels inside a session: `(msg_id, seq_no, body)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Unique, strictly increasing identifier (a multiple of 4 for client
    /// messages).
    pub id: i64,
    /// Odd for content-related messages, even otherwise.
    pub seq_no: i32,
    /// The serialized TL body (constructor id + fields).
    pub body: Vec<u8>,
}

/// Errors from [`Message::from_plaintext_bytes`].
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Shorter than the 20-byte plaintext header.
    TooShort { len: usize },
    /// The `auth_key_id` field is not zero, so this frame is encrypted.
    NotPlaintext { auth_key_id: i64 },
    /// The length field does not match the bytes that follow it.
    BadLength { declared: usize, available: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len } => write!(f, "plaintext frame of {len} bytes is too short"),
            Self::NotPlaintext { auth_key_id } => {
                write!(f, "expected plaintext frame, got auth_key_id {auth_key_id:#x}")
            }
            Self::BadLength { declared, available } => {
                write!(f, "plaintext frame declares {declared} bytes but carries {available}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Message {
    /// Construct a plaintext message (used before key exchange).
    pub fn plaintext(id: i64, body: Vec<u8>) -> Self {
        Self { id, seq_no: 0, body }
    }

    /// Serialize the message into the plaintext wire format:
    ///
    /// ```text
    /// auth_key_id:long  (0 for plaintext)
    /// message_id:long
    /// message_data_length:int
    /// message_data:bytes
    /// ```
    pub fn to_plaintext_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 8 + 4 + self.body.len());
        buf.extend(0i64.to_le_bytes());
        buf.extend(self.id.to_le_bytes());
        buf.extend((self.body.len() as u32).to_le_bytes());
        buf.extend(&self.body);
        buf
    }

    /// Parse a plaintext frame produced by the server during key exchange.
    pub fn from_plaintext_bytes(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() < 20 {
            return Err(Error::TooShort { len: frame.len() });
        }
        let auth_key_id = read_i64(&frame[..8]);
        if auth_key_id != 0 {
            return Err(Error::NotPlaintext { auth_key_id });
        }
        let id = read_i64(&frame[8..16]);
        let declared = u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]]) as usize;
        let available = frame.len() - 20;
        if declared > available {
            return Err(Error::BadLength { declared, available });
        }
        Ok(Self { id, seq_no: 0, body: frame[20..20 + declared].to_vec() })
    }
}

pub(crate) fn read_i64(b: &[u8]) -> i64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    i64::from_le_bytes(a)
}

pub(crate) fn read_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
