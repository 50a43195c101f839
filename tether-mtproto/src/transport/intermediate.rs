use bytes::{Buf, BufMut, BytesMut};

use super::{Transport, TransportError};

/// Largest packet a server will ever send; anything larger is garbage.
const MAX_PACKET: usize = 16 * 1024 * 1024;

/// [MTProto Intermediate] framing.
///
/// Init bytes: `0xeeeeeeee`. Each packet is prefixed with its 4-byte
/// little-endian byte length.
///
/// [MTProto Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
#[derive(Clone, Debug, Default)]
pub struct Intermediate;

impl Intermediate {
    pub fn new() -> Self { Self }
}

impl Transport for Intermediate {
    fn init_bytes(&self) -> &'static [u8] { &[0xee; 4] }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xee; 4]) }

    fn encode(&mut self, payload: &[u8], out: &mut BytesMut) {
        assert_eq!(payload.len() % 4, 0, "intermediate payloads must be word-aligned");
        out.reserve(4 + payload.len());
        out.put_u32_le(payload.len() as u32);
        out.put_slice(payload);
    }

    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Vec<u8>>, TransportError> {
        if input.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
        if len > MAX_PACKET {
            return Err(TransportError::BadLength { len });
        }
        if input.len() < 4 + len {
            return Ok(None);
        }
        input.advance(4);
        Ok(Some(input.split_to(len).to_vec()))
    }
}
