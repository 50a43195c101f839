//! Obfuscated transport: key material for the [MTProto Obfuscated2] layer.
//!
//! A connection starts with a 64-byte header derived from random bytes. Both
//! directions are then passed through independent AES-256-CTR keystreams so
//! the traffic looks like noise. With an MTProxy secret the keys are mixed
//! with the secret and the header also names the target DC.
//!
//! This module only computes the header and the ciphers; applying them to a
//! stream is the I/O layer's job.
//!
//! [MTProto Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation

use tether_crypto::aes::CtrCipher;
use tether_crypto::sha256;

/// First words a header may not start with, since a middlebox could mistake
/// them for HTTP, TLS or a plain MTProto transport.
const FORBIDDEN_PREFIXES: [[u8; 4]; 7] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    [0x16, 0x03, 0x01, 0x02],
    [0xdd; 4],
    [0xee; 4],
];

/// MTProxy parameters: the 16-byte secret and the DC to reach through it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyParams {
    pub secret: [u8; 16],
    pub dc_id: i16,
}

/// Whether 64 random bytes are usable as an obfuscation header.
pub fn is_acceptable(init: &[u8; 64]) -> bool {
    init[0] != 0xef
        && !FORBIDDEN_PREFIXES.iter().any(|p| init[..4] == p[..])
        && init[4..8] != [0; 4]
}

/// Draw random bytes until they form an acceptable header.
pub fn random_init() -> [u8; 64] {
    loop {
        let init: [u8; 64] = tether_crypto::random_array();
        if is_acceptable(&init) {
            return init;
        }
    }
}

fn derive(key_src: &[u8], iv_src: &[u8], secret: Option<&[u8; 16]>) -> CtrCipher {
    let mut key = [0u8; 32];
    match secret {
        Some(s) => key = sha256!(key_src, s),
        None => key.copy_from_slice(key_src),
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(iv_src);
    CtrCipher::new(&key, &iv)
}

/// `(forward, backward)` ciphers: forward keys come from `init[8..56]`,
/// backward keys from the same bytes reversed.
fn ciphers(init: &[u8; 64], secret: Option<&[u8; 16]>) -> (CtrCipher, CtrCipher) {
    let forward = derive(&init[8..40], &init[40..56], secret);
    let mut rev = [0u8; 48];
    rev.copy_from_slice(&init[8..56]);
    rev.reverse();
    let backward = derive(&rev[..32], &rev[32..], secret);
    (forward, backward)
}

/// The pair of keystreams for one obfuscated connection.
#[derive(Debug)]
pub struct ObfuscatedCipher {
    enc: CtrCipher,
    dec: CtrCipher,
}

impl ObfuscatedCipher {
    /// Build the client side with a fresh random header.
    ///
    /// Returns the header to send before anything else, and the ciphers.
    pub fn client(tag: [u8; 4], proxy: Option<&ProxyParams>) -> ([u8; 64], Self) {
        Self::client_with_init(random_init(), tag, proxy)
    }

    /// Build the client side from caller-chosen header bytes, which should
    /// pass [`is_acceptable`].
    pub fn client_with_init(mut init: [u8; 64], tag: [u8; 4], proxy: Option<&ProxyParams>) -> ([u8; 64], Self) {
        init[56..60].copy_from_slice(&tag);
        if let Some(p) = proxy {
            init[60..62].copy_from_slice(&p.dc_id.to_le_bytes());
        }

        let (mut enc, dec) = ciphers(&init, proxy.map(|p| &p.secret));

        let mut encrypted = init;
        enc.apply(&mut encrypted);
        init[56..64].copy_from_slice(&encrypted[56..64]);

        (init, Self { enc, dec })
    }

    /// Build the server side from a received header.
    ///
    /// Returns the ciphers, the protocol tag and the DC id field.
    pub fn server(header: &[u8; 64], secret: Option<&[u8; 16]>) -> (Self, [u8; 4], i16) {
        let (mut client_enc, client_dec) = ciphers(header, secret);

        let mut plain = *header;
        client_enc.apply(&mut plain);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&plain[56..60]);
        let dc_id = i16::from_le_bytes([plain[60], plain[61]]);

        (Self { enc: client_dec, dec: client_enc }, tag, dc_id)
    }

    /// Obfuscate outgoing bytes in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.enc.apply(data);
    }

    /// De-obfuscate incoming bytes in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.dec.apply(data);
    }

    /// Split into the `(encrypt, decrypt)` halves, for streams whose read and
    /// write sides live apart.
    pub fn into_parts(self) -> (CtrCipher, CtrCipher) {
        (self.enc, self.dec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> [u8; 64] {
        std::array::from_fn(|i| (i as u8).wrapping_mul(37).wrapping_add(1))
    }

    #[test]
    fn rejects_forbidden_headers() {
        let mut h = init();
        assert!(is_acceptable(&h));
        h[0] = 0xef;
        assert!(!is_acceptable(&h));

        let mut h = init();
        h[..4].copy_from_slice(b"POST");
        assert!(!is_acceptable(&h));

        let mut h = init();
        h[4..8].copy_from_slice(&[0; 4]);
        assert!(!is_acceptable(&h));

        assert!(is_acceptable(&random_init()));
    }

    #[test]
    fn header_keeps_random_prefix() {
        let (header, _) = ObfuscatedCipher::client_with_init(init(), [0xef; 4], None);
        assert_eq!(&header[..56], &init()[..56]);
        assert_ne!(&header[56..60], &[0xef; 4]);
    }

    #[test]
    fn server_reads_tag_and_traffic() {
        let proxy = ProxyParams { secret: [7; 16], dc_id: -2 };
        let (header, mut client) = ObfuscatedCipher::client_with_init(init(), [0xee; 4], Some(&proxy));
        let (mut server, tag, dc) = ObfuscatedCipher::server(&header, Some(&proxy.secret));
        assert_eq!(tag, [0xee; 4]);
        assert_eq!(dc, -2);

        let mut up = *b"client to server";
        client.encrypt(&mut up);
        server.decrypt(&mut up);
        assert_eq!(&up, b"client to server");

        let mut down = *b"server to client";
        server.encrypt(&mut down);
        client.decrypt(&mut down);
        assert_eq!(&down, b"server to client");
    }

    #[test]
    fn secret_changes_keys() {
        let (a, _) = ObfuscatedCipher::client_with_init(init(), [0xef; 4], None);
        let proxy = ProxyParams { secret: [1; 16], dc_id: 2 };
        let (b, _) = ObfuscatedCipher::client_with_init(init(), [0xef; 4], Some(&proxy));
        assert_ne!(&a[56..60], &b[56..60]);
    }
}
