//! The [`Serializable`] trait and its implementations for primitive TL types.
//!
//! Encoding follows the [MTProto Binary Serialization] rules: little-endian
//! integers, length-prefixed byte strings padded to a multiple of four, and
//! boxed vectors carrying the `vector` constructor id.
//!
//! [MTProto Binary Serialization]: https://core.telegram.org/mtproto/serialize

/// Constructor id of the boxed `Vector t`.
pub const VECTOR_ID: u32 = 0x1cb5c415;

/// Serialize `self` into TL binary format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut impl Extend<u8>);

    /// Allocate a fresh `Vec<u8>` and serialize into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.serialize(&mut v);
        v
    }
}

// ─── bool ────────────────────────────────────────────────────────────────────

/// `true` → `boolTrue#997275b5`, `false` → `boolFalse#bc799737`
impl Serializable for bool {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let id: u32 = if *self { 0x997275b5 } else { 0xbc799737 };
        id.serialize(buf);
    }
}

// ─── integers ────────────────────────────────────────────────────────────────

macro_rules! le_primitive {
    ( $( $ty:ty ),+ ) => {
        $(
            impl Serializable for $ty {
                fn serialize(&self, buf: &mut impl Extend<u8>) {
                    buf.extend(self.to_le_bytes());
                }
            }
        )+
    };
}

le_primitive!(i32, u32, i64, f64);

/// `int128` and `int256` travel as raw bytes, in the order they are stored.
impl<const N: usize> Serializable for [u8; N] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.iter().copied());
    }
}

// ─── strings / bytes ─────────────────────────────────────────────────────────

/// Number of zero bytes needed after a `bytes` value of `len` payload bytes.
pub(crate) fn bytes_padding(len: usize) -> usize {
    let header = if len <= 253 { 1 } else { 4 };
    (4 - (header + len) % 4) % 4
}

/// TL `bytes`: short form `[len][data]` for up to 253 bytes, long form
/// `[0xfe][len:3 LE][data]` otherwise, then zero padding to a word boundary.
impl Serializable for [u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        let len = self.len();
        if len <= 253 {
            buf.extend([len as u8]);
        } else {
            let l = (len as u32).to_le_bytes();
            buf.extend([0xfe, l[0], l[1], l[2]]);
        }
        buf.extend(self.iter().copied());
        buf.extend(std::iter::repeat_n(0u8, bytes_padding(len)));
    }
}

impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (**self).serialize(buf);
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_slice().serialize(buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.as_bytes().serialize(buf);
    }
}

// ─── vectors ─────────────────────────────────────────────────────────────────

/// Boxed `Vector<T>`: constructor id, count, then the items.
impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        VECTOR_ID.serialize(buf);
        (self.len() as i32).serialize(buf);
        self.iter().for_each(|item| item.serialize(buf));
    }
}

/// Bare `vector<T>`: just a count followed by the items.
impl<T: Serializable> Serializable for crate::RawVec<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        (self.0.len() as i32).serialize(buf);
        self.0.iter().for_each(|item| item.serialize(buf));
    }
}

/// Opaque objects are already serialized; they are copied through verbatim.
impl Serializable for crate::Blob {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        buf.extend(self.0.iter().copied());
    }
}
