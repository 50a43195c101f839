//! Encrypted MTProto session (post auth-key).
//!
//! Once a key exists, construct an [`EncryptedSession`] and use it to frame
//! every subsequent message.

use tether_crypto::{AuthKey, Side, decrypt_data, encrypt_data};

use crate::message::{Message, read_i32, read_i64};
use crate::session::Session;

/// Errors that can occur when decrypting a server message.
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// The underlying crypto layer rejected the message.
    Crypto(tether_crypto::DecryptError),
    /// Session-ID mismatch (possible replay or wrong connection).
    SessionMismatch { got: i64, expected: i64 },
}

impl DecryptError {
    /// Whether the frame failed an integrity or identity check, as opposed to
    /// simply being malformed.
    pub fn is_security(&self) -> bool {
        match self {
            Self::Crypto(e) => e.is_security(),
            Self::SessionMismatch { .. } => true,
        }
    }
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::SessionMismatch { got, expected } => {
                write!(f, "session_id mismatch: got {got:#x}, expected {expected:#x}")
            }
        }
    }
}

impl std::error::Error for DecryptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Crypto(e) => Some(e),
            Self::SessionMismatch { .. } => None,
        }
    }
}

/// The inner payload extracted from a successfully decrypted server frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedMessage {
    /// `salt` the server used for this frame.
    pub salt: i64,
    pub msg_id: i64,
    pub seq_no: i32,
    /// TL-serialized body of the inner message.
    pub body: Vec<u8>,
}

/// An [`AuthKey`] together with the [`Session`] state it is used under.
///
/// Use [`EncryptedSession::encrypt`] for outgoing messages (ids and sequence
/// numbers come from the packer) and [`EncryptedSession::decrypt`] for
/// incoming server frames.
#[derive(Debug)]
pub struct EncryptedSession {
    auth_key: AuthKey,
    pub session: Session,
}

impl EncryptedSession {
    pub fn new(auth_key: AuthKey, first_salt: i64, time_offset: i32) -> Self {
        Self { auth_key, session: Session::with_state(first_salt, time_offset) }
    }

    pub fn auth_key(&self) -> &AuthKey { &self.auth_key }

    /// Encrypt one message into a wire-ready packet.
    ///
    /// Layout of the plaintext before encryption:
    /// ```text
    /// salt:       i64
    /// session_id: i64
    /// msg_id:     i64
    /// seq_no:     i32
    /// body_len:   i32
    /// body:       [u8; body_len]
    /// ```
    pub fn encrypt(&self, message: &Message) -> Vec<u8> {
        let plain = self.plaintext(message);
        encrypt_data(&plain, &self.auth_key, Side::Client)
    }

    fn plaintext(&self, message: &Message) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + message.body.len());
        buf.extend(self.session.salt().to_le_bytes());
        buf.extend(self.session.session_id().to_le_bytes());
        buf.extend(message.id.to_le_bytes());
        buf.extend(message.seq_no.to_le_bytes());
        buf.extend((message.body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&message.body);
        buf
    }

    /// Decrypt a server frame and check it belongs to this session, or to
    /// the one it replaced.
    pub fn decrypt(&self, frame: &[u8]) -> Result<DecryptedMessage, DecryptError> {
        let plain = decrypt_data(frame, &self.auth_key, Side::Server).map_err(DecryptError::Crypto)?;

        let session_id = read_i64(&plain[8..16]);
        let known = session_id == self.session.session_id()
            || Some(session_id) == self.session.previous_session_id();
        if !known {
            return Err(DecryptError::SessionMismatch {
                got: session_id,
                expected: self.session.session_id(),
            });
        }

        Ok(DecryptedMessage {
            salt: read_i64(&plain[..8]),
            msg_id: read_i64(&plain[16..24]),
            seq_no: read_i32(&plain[24..28]),
            body: plain[32..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AuthKey {
        AuthKey::from_bytes(std::array::from_fn(|i| i as u8))
    }

    fn session() -> EncryptedSession {
        EncryptedSession::new(key(), 0x1234, 0)
    }

    fn server_frame(s: &EncryptedSession, salt: i64, msg_id: i64, seq_no: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(salt.to_le_bytes());
        buf.extend(s.session.session_id().to_le_bytes());
        buf.extend(msg_id.to_le_bytes());
        buf.extend(seq_no.to_le_bytes());
        buf.extend((body.len() as u32).to_le_bytes());
        buf.extend_from_slice(body);
        encrypt_data(&buf, s.auth_key(), Side::Server)
    }

    #[test]
    fn server_frame_decrypts() {
        let s = session();
        let frame = server_frame(&s, 77, 0x6500_0000_0000_0001, 3, &[1, 2, 3, 4]);
        let msg = s.decrypt(&frame).unwrap();
        assert_eq!(msg, DecryptedMessage { salt: 77, msg_id: 0x6500_0000_0000_0001, seq_no: 3, body: vec![1, 2, 3, 4] });
    }

    #[test]
    fn client_frame_is_not_accepted_as_server_frame() {
        let mut s = session();
        let id = s.session.new_msg_id();
        let frame = s.encrypt(&Message { id, seq_no: 1, body: vec![0; 8] });
        assert!(s.decrypt(&frame).is_err());
    }

    #[test]
    fn foreign_session_is_rejected() {
        let s = session();
        let other = EncryptedSession::new(key(), 0, 0);
        let frame = server_frame(&other, 0, 1, 1, &[0; 4]);
        let err = s.decrypt(&frame).unwrap_err();
        assert!(matches!(err, DecryptError::SessionMismatch { .. }));
        assert!(err.is_security());
    }

    #[test]
    fn replaced_session_is_still_accepted() {
        let mut s = session();
        let stale = server_frame(&s, 5, 0x6500_0000_0000_0005, 1, &[9; 4]);
        s.session.reset();
        let fresh = server_frame(&s, 5, 0x6500_0000_0000_0009, 1, &[8; 4]);
        assert_eq!(s.decrypt(&stale).unwrap().body, vec![9; 4]);
        assert_eq!(s.decrypt(&fresh).unwrap().body, vec![8; 4]);

        s.session.reset();
        assert!(matches!(s.decrypt(&stale), Err(DecryptError::SessionMismatch { .. })));
    }
}
