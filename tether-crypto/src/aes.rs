//! AES-256 in the two modes MTProto uses.
//!
//! * IGE (Infinite Garble Extension) protects every encrypted message and
//!   the handshake's inner payloads.
//! * CTR with a 128-bit big-endian counter drives transport obfuscation.

use ::aes::Aes256;
use ::aes::cipher::generic_array::GenericArray;
use ::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

/// Encrypt `buffer` in place with AES-256-IGE.
///
/// `iv[..16]` seeds the previous ciphertext block and `iv[16..]` the previous
/// plaintext block.
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be 16-byte aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);

    for block in buffer.chunks_exact_mut(16) {
        let mut plain = [0u8; 16];
        plain.copy_from_slice(block);

        xor_in_place(block, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        xor_in_place(block, &prev_plain);

        prev_cipher.copy_from_slice(block);
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place with AES-256-IGE. Inverse of [`ige_encrypt`].
///
/// # Panics
///
/// If `buffer.len()` is not a multiple of 16.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(buffer.len() % 16, 0, "IGE input must be 16-byte aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher = [0u8; 16];
    let mut prev_plain = [0u8; 16];
    prev_cipher.copy_from_slice(&iv[..16]);
    prev_plain.copy_from_slice(&iv[16..]);

    for block in buffer.chunks_exact_mut(16) {
        let mut encrypted = [0u8; 16];
        encrypted.copy_from_slice(block);

        xor_in_place(block, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        xor_in_place(block, &prev_cipher);

        prev_cipher = encrypted;
        prev_plain.copy_from_slice(block);
    }
}

/// Bytes of padding that bring `len` up to the next multiple of 16
/// (zero when already aligned).
pub fn padding_len(len: usize) -> usize {
    (16 - len % 16) % 16
}

/// Append bytes from `random` to `buffer` until it is 16-byte aligned.
///
/// # Panics
///
/// If `random` holds fewer bytes than the padding needs.
pub fn pad_to_block(buffer: &mut Vec<u8>, random: &[u8]) {
    let pad = padding_len(buffer.len());
    buffer.extend_from_slice(&random[..pad]);
}

/// AES-256-CTR keystream with a 128-bit big-endian counter.
///
/// The counter advances once per 16-byte block and partial blocks carry over
/// between calls, so `apply(a); apply(b)` equals `apply(a ‖ b)`.
pub struct CtrCipher {
    inner: Aes256Ctr,
}

impl CtrCipher {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self {
            inner: Aes256Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// XOR `data` with the next `data.len()` keystream bytes.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

impl std::fmt::Debug for CtrCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrCipher { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq<const N: usize>(start: u8) -> [u8; N] {
        std::array::from_fn(|i| start + i as u8)
    }

    #[test]
    fn ige_known_answer() {
        let key: [u8; 32] = seq(0);
        let iv: [u8; 32] = seq(32);
        let mut data: [u8; 32] = seq(0x40);
        ige_encrypt(&mut data, &key, &iv);
        assert_eq!(
            data,
            [
                0xb6, 0xb2, 0x3c, 0xb4, 0x6d, 0x2f, 0x43, 0xde, 0x2c, 0x67, 0xfc, 0x9a, 0x3a, 0x9e, 0x35, 0x10,
                0x4f, 0xad, 0x6e, 0xd1, 0x51, 0x77, 0x96, 0x9c, 0x1c, 0xeb, 0xc6, 0x16, 0xbc, 0xfa, 0x48, 0x2c,
            ]
        );
        ige_decrypt(&mut data, &key, &iv);
        assert_eq!(data, seq::<32>(0x40));
    }

    #[test]
    #[should_panic]
    fn ige_rejects_unaligned() {
        let mut data = [0u8; 15];
        ige_encrypt(&mut data, &[0; 32], &[0; 32]);
    }

    #[test]
    fn ctr_known_answer() {
        let key: [u8; 32] = seq(0);
        let iv: [u8; 16] = seq(0x80);
        let mut data = [0u8; 40];
        CtrCipher::new(&key, &iv).apply(&mut data);
        assert_eq!(
            data,
            [
                0xb0, 0xb0, 0xf5, 0x7b, 0xcb, 0x97, 0xb7, 0x83, 0xa1, 0x53, 0x8f, 0xf7, 0x8e, 0x9a, 0x68, 0xc2,
                0xfe, 0x85, 0xb3, 0x62, 0x6e, 0x6c, 0x7c, 0xd4, 0x65, 0xae, 0xa6, 0xce, 0x3e, 0xe9, 0x3b, 0x30,
                0x46, 0x33, 0x6c, 0xf4, 0x3c, 0x0b, 0xea, 0x30,
            ]
        );
    }

    #[test]
    fn padding_len_rounds_up() {
        assert_eq!(padding_len(0), 0);
        assert_eq!(padding_len(1), 15);
        assert_eq!(padding_len(16), 0);
        assert_eq!(padding_len(33), 15);
    }
}
