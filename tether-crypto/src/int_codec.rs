//! Conversion between arbitrary-precision integers and fixed-width byte
//! strings.
//!
//! Every multi-byte integer the handshake handles (DH values, RSA blocks,
//! `pq`) passes through here, so width violations are errors rather than
//! silent truncation.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, Zero};

/// Byte order of an encoded integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A value does not fit in the requested width, or is negative in unsigned
/// mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverflowError {
    pub width: usize,
    pub needed: usize,
}

impl fmt::Display for OverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "integer needs {} bytes but only {} are available", self.needed, self.width)
    }
}

impl std::error::Error for OverflowError {}

/// Encode `value` into exactly `width` bytes.
///
/// Signed values use two's complement; unsigned mode rejects negatives.
pub fn to_bytes(value: &BigInt, width: usize, endian: Endian, signed: bool) -> Result<Vec<u8>, OverflowError> {
    let (minimal, fill) = if value.is_zero() {
        (Vec::new(), 0x00)
    } else if signed {
        (value.to_signed_bytes_le(), if value.is_negative() { 0xff } else { 0x00 })
    } else if value.is_negative() {
        return Err(OverflowError { width, needed: width + 1 });
    } else {
        (value.magnitude().to_bytes_le(), 0x00)
    };

    if minimal.len() > width {
        return Err(OverflowError { width, needed: minimal.len() });
    }

    let mut out = minimal;
    out.resize(width, fill);
    if endian == Endian::Big {
        out.reverse();
    }
    Ok(out)
}

/// Decode `bytes` (of any length) into an integer.
pub fn from_bytes(bytes: &[u8], endian: Endian, signed: bool) -> BigInt {
    match (endian, signed) {
        (Endian::Little, true) => BigInt::from_signed_bytes_le(bytes),
        (Endian::Big, true) => BigInt::from_signed_bytes_be(bytes),
        (Endian::Little, false) => BigInt::from_bytes_le(Sign::Plus, bytes),
        (Endian::Big, false) => BigInt::from_bytes_be(Sign::Plus, bytes),
    }
}

/// Big-endian, left-zero-padded to `width` bytes.
pub fn biguint_to_fixed_be(value: &BigUint, width: usize) -> Result<Vec<u8>, OverflowError> {
    to_bytes(&BigInt::from(value.clone()), width, Endian::Big, false)
}

/// Big-endian without leading zero bytes (zero encodes as a single `0`).
pub fn biguint_to_minimal_be(value: &BigUint) -> Vec<u8> {
    value.to_bytes_be()
}
