//! RSA as used by the `req_DH_params` step, and the set of server keys the
//! client trusts.

use std::collections::HashMap;
use std::fmt;

use num_bigint::BigUint;

use crate::int_codec::biguint_to_fixed_be;
use crate::sha1;

/// Size of the RSA block: `SHA1(data) ‖ data ‖ padding`.
const BLOCK_LEN: usize = 255;

/// Largest payload that fits next to its SHA-1 in one block.
pub const MAX_PAYLOAD: usize = BLOCK_LEN - 20;

/// Errors from [`encrypt`].
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The payload is longer than [`MAX_PAYLOAD`].
    PayloadTooLarge { len: usize },
    /// The supplied padding is shorter than the block requires.
    NotEnoughRandom { needed: usize, got: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge { len } => write!(f, "RSA payload of {len} bytes exceeds {MAX_PAYLOAD}"),
            Self::NotEnoughRandom { needed, got } => {
                write!(f, "RSA padding needs {needed} random bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// An RSA public key (n, e) and its server fingerprint.
#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
    fingerprint: i64,
}

impl Key {
    /// Parse decimal `n` and `e` strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self::from_components(
            BigUint::parse_bytes(n.as_bytes(), 10)?,
            BigUint::parse_bytes(e.as_bytes(), 10)?,
        ))
    }

    pub fn from_components(n: BigUint, e: BigUint) -> Self {
        let fingerprint = compute_fingerprint(&n, &e);
        Self { n, e, fingerprint }
    }

    /// Lower 64 bits of `SHA1(bytes(n) ‖ bytes(e))`, read little-endian.
    pub fn fingerprint(&self) -> i64 { self.fingerprint }

    pub fn modulus(&self) -> &BigUint { &self.n }
}

/// TL `bytes` encoding, needed only to hash the key components.
fn tl_bytes(data: &[u8], out: &mut Vec<u8>) {
    if data.len() <= 253 {
        out.push(data.len() as u8);
    } else {
        let l = (data.len() as u32).to_le_bytes();
        out.extend_from_slice(&[0xfe, l[0], l[1], l[2]]);
    }
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn compute_fingerprint(n: &BigUint, e: &BigUint) -> i64 {
    let mut buf = Vec::with_capacity(272);
    tl_bytes(&n.to_bytes_be(), &mut buf);
    tl_bytes(&e.to_bytes_be(), &mut buf);
    let sha = sha1!(&buf);
    let mut fp = [0u8; 8];
    fp.copy_from_slice(&sha[12..20]);
    i64::from_le_bytes(fp)
}

/// RSA-encrypt `data` as `(SHA1(data) ‖ data ‖ random)^e mod n`, taking the
/// padding from `random`.
///
/// The result is always 256 bytes, left-padded with zeros.
pub fn encrypt_with_padding(data: &[u8], key: &Key, random: &[u8]) -> Result<Vec<u8>, Error> {
    if data.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge { len: data.len() });
    }
    let pad = BLOCK_LEN - 20 - data.len();
    if random.len() < pad {
        return Err(Error::NotEnoughRandom { needed: pad, got: random.len() });
    }

    let mut block = Vec::with_capacity(BLOCK_LEN);
    block.extend_from_slice(&sha1!(data));
    block.extend_from_slice(data);
    block.extend_from_slice(&random[..pad]);

    let encrypted = BigUint::from_bytes_be(&block).modpow(&key.e, &key.n);
    // n is 2048 bits, so the residue always fits.
    Ok(biguint_to_fixed_be(&encrypted, 256).unwrap_or_else(|_| encrypted.to_bytes_be()))
}

// ─── Key store ───────────────────────────────────────────────────────────────

/// The server public keys a client is willing to encrypt to, by fingerprint.
///
/// Built once and shared read-only (typically behind an `Arc`).
#[derive(Clone, Debug, Default)]
pub struct KeyStore {
    keys: HashMap<i64, Key>,
}

impl KeyStore {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self { keys: keys.into_iter().map(|k| (k.fingerprint(), k)).collect() }
    }

    /// The production and test-DC keys published by Telegram.
    #[allow(clippy::unreadable_literal)]
    pub fn telegram() -> Self {
        const KEYS: [(&str, &str); 2] = [
            // Production DC key (fingerprint -3414540481677951611)
            (
                "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
                "65537",
            ),
            // Test DC key (fingerprint -5595554452916591101)
            (
                "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
                "65537",
            ),
        ];
        Self::new(KEYS.iter().filter_map(|(n, e)| Key::new(n, e)))
    }

    pub fn get(&self, fingerprint: i64) -> Option<&Key> {
        self.keys.get(&fingerprint)
    }

    /// First fingerprint in `offered` that this store has a key for.
    pub fn select(&self, offered: &[i64]) -> Option<&Key> {
        offered.iter().find_map(|fp| self.keys.get(fp))
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}
