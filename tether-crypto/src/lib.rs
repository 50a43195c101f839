//! Cryptographic primitives for MTProto.
//!
//! Provides:
//! - AES-256-IGE and AES-256-CTR
//! - SHA-1 / SHA-256 hash macros
//! - Pollard-rho PQ factorization
//! - RSA encryption and the trusted server key store
//! - Fixed-width big integer encoding
//! - `AuthKey`: the 256-byte session key
//! - Message encryption / decryption under an auth key
//! - DH nonce→key derivation

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod factorize;
pub mod int_codec;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use factorize::factorize;

#[doc(hidden)]
pub mod __private {
    pub use ::sha1;
    pub use ::sha2;
}

/// Fill an array from the operating system's random source.
///
/// # Panics
///
/// If the OS random source is unavailable, which leaves nothing safe to do.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).expect("OS random source unavailable");
    buf
}

// ─── Message encrypt / decrypt ───────────────────────────────────────────────

/// Length of `salt ‖ session_id ‖ msg_id ‖ seq_no ‖ len`.
pub const PLAINTEXT_HEADER_LEN: usize = 8 + 8 + 8 + 4 + 4;

/// Errors from [`decrypt_data`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecryptError {
    /// Ciphertext too short or not block-aligned.
    InvalidBuffer,
    /// The `auth_key_id` in the ciphertext does not match our key.
    AuthKeyMismatch,
    /// The inner length field points outside the decrypted data or leaves
    /// more than a block of padding.
    InvalidLength { len: usize, available: usize },
    /// The `msg_key` in the ciphertext does not match our computed value.
    MessageKeyMismatch,
}

impl DecryptError {
    /// Whether this indicates tampering or a key mismatch rather than a
    /// malformed frame.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::AuthKeyMismatch | Self::MessageKeyMismatch)
    }
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Self::AuthKeyMismatch => write!(f, "auth_key_id mismatch"),
            Self::InvalidLength { len, available } => {
                write!(f, "inner length {len} does not fit {available} decrypted bytes")
            }
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
        }
    }
}
impl std::error::Error for DecryptError {}

/// Which party produced a message. Selects the auth key window used to derive
/// the AES key and IV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side { Client, Server }

impl Side {
    fn x(&self) -> usize { match self { Side::Client => 0, Side::Server => 8 } }
}

/// Derive the AES-256-IGE key and IV for a message from its `msg_key`.
pub fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();
    let key = &auth_key.data;
    let sha_a = sha1!(msg_key, &key[x..x + 32]);
    let sha_b = sha1!(&key[32 + x..48 + x], msg_key, &key[48 + x..64 + x]);
    let sha_c = sha1!(&key[64 + x..96 + x], msg_key);
    let sha_d = sha1!(msg_key, &key[96 + x..128 + x]);

    let mut aes_key = [0u8; 32];
    aes_key[..8].copy_from_slice(&sha_a[..8]);
    aes_key[8..20].copy_from_slice(&sha_b[8..20]);
    aes_key[20..].copy_from_slice(&sha_c[4..16]);

    let mut aes_iv = [0u8; 32];
    aes_iv[..12].copy_from_slice(&sha_a[8..20]);
    aes_iv[12..20].copy_from_slice(&sha_b[..8]);
    aes_iv[20..24].copy_from_slice(&sha_c[16..20]);
    aes_iv[24..].copy_from_slice(&sha_d[..8]);

    (aes_key, aes_iv)
}

/// `SHA1(plaintext)[4..20]`, over the plaintext without padding.
pub fn calc_msg_key(plaintext: &[u8]) -> [u8; 16] {
    let sha = sha1!(plaintext);
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&sha[4..20]);
    msg_key
}

/// Encrypt a message plaintext sent by `side`.
///
/// Returns `key_id ‖ msg_key ‖ IGE(plaintext ‖ random padding)`.
pub fn encrypt_data(plaintext: &[u8], auth_key: &AuthKey, side: Side) -> Vec<u8> {
    let padding: [u8; 16] = random_array();
    encrypt_data_with_padding(plaintext, auth_key, side, &padding)
}

/// Like [`encrypt_data`] with caller-supplied padding bytes (at least 15).
pub fn encrypt_data_with_padding(plaintext: &[u8], auth_key: &AuthKey, side: Side, padding: &[u8]) -> Vec<u8> {
    let msg_key = calc_msg_key(plaintext);
    let (key, iv) = calc_key(auth_key, &msg_key, side);

    let pad = aes::padding_len(plaintext.len());
    let mut out = Vec::with_capacity(24 + plaintext.len() + pad);
    out.extend_from_slice(&auth_key.key_id());
    out.extend_from_slice(&msg_key);
    out.extend_from_slice(plaintext);
    out.extend(padding.iter().copied().cycle().take(pad));

    aes::ige_encrypt(&mut out[24..], &key, &iv);
    out
}

/// Decrypt a packet produced by `side`.
///
/// The `msg_key` is recomputed over the recovered plaintext and compared
/// before anything is returned. On success the plaintext is returned without
/// its padding.
pub fn decrypt_data(packet: &[u8], auth_key: &AuthKey, side: Side) -> Result<Vec<u8>, DecryptError> {
    if packet.len() < 24 + PLAINTEXT_HEADER_LEN || (packet.len() - 24) % 16 != 0 {
        return Err(DecryptError::InvalidBuffer);
    }
    if auth_key.key_id() != packet[..8] {
        return Err(DecryptError::AuthKeyMismatch);
    }
    let mut msg_key = [0u8; 16];
    msg_key.copy_from_slice(&packet[8..24]);

    let (key, iv) = calc_key(auth_key, &msg_key, side);
    let mut plain = packet[24..].to_vec();
    aes::ige_decrypt(&mut plain, &key, &iv);

    let len = u32::from_le_bytes([plain[28], plain[29], plain[30], plain[31]]) as usize;
    let end = PLAINTEXT_HEADER_LEN.saturating_add(len);
    if end > plain.len() || plain.len() - end >= 16 || len % 4 != 0 {
        return Err(DecryptError::InvalidLength { len, available: plain.len() });
    }

    if calc_msg_key(&plain[..end]) != msg_key {
        return Err(DecryptError::MessageKeyMismatch);
    }
    plain.truncate(end);
    Ok(plain)
}

/// Derive `(key, iv)` from nonces for the handshake's inner payloads.
pub fn generate_key_data_from_nonce(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = sha1!(new_nonce, server_nonce);
    let h2 = sha1!(server_nonce, new_nonce);
    let h3 = sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}
