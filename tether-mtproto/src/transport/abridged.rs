use bytes::{Buf, BufMut, BytesMut};

use super::{Transport, TransportError};

/// [MTProto Abridged] framing.
///
/// `0xef` is sent once on connect, then each packet is
/// `[length/4 as 1 or 4 bytes][payload]`.
///
/// [MTProto Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
#[derive(Clone, Debug, Default)]
pub struct Abridged;

impl Abridged {
    pub fn new() -> Self { Self }
}

impl Transport for Abridged {
    fn init_bytes(&self) -> &'static [u8] { &[0xef] }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { Some([0xef; 4]) }

    fn encode(&mut self, payload: &[u8], out: &mut BytesMut) {
        assert_eq!(payload.len() % 4, 0, "abridged payloads must be word-aligned");
        let words = payload.len() / 4;
        if words < 0x7f {
            out.reserve(1 + payload.len());
            out.put_u8(words as u8);
        } else {
            out.reserve(4 + payload.len());
            out.put_u8(0x7f);
            out.put_slice(&(words as u32).to_le_bytes()[..3]);
        }
        out.put_slice(payload);
    }

    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(&first) = input.first() else { return Ok(None) };
        let (header, words) = if first < 0x7f {
            (1, first as usize)
        } else {
            if input.len() < 4 {
                return Ok(None);
            }
            (4, input[1] as usize | (input[2] as usize) << 8 | (input[3] as usize) << 16)
        };

        let len = words * 4;
        if input.len() < header + len {
            return Ok(None);
        }
        input.advance(header);
        Ok(Some(input.split_to(len).to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_headers() {
        let mut t = Abridged::new();
        let mut out = BytesMut::new();
        t.encode(&[1; 8], &mut out);
        assert_eq!(&out[..1], &[2]);

        out.clear();
        t.encode(&vec![1; 127 * 4], &mut out);
        assert_eq!(&out[..4], &[0x7f, 127, 0, 0]);
        assert_eq!(out.len(), 4 + 127 * 4);
    }

    #[test]
    fn partial_input_waits() {
        let mut t = Abridged::new();
        let mut out = BytesMut::new();
        t.encode(&[9; 12], &mut out);
        let mut partial = BytesMut::from(&out[..6]);
        assert_eq!(t.decode(&mut partial), Ok(None));
        assert_eq!(partial.len(), 6);
    }

    #[test]
    fn status_packet_is_one_word() {
        let mut t = Abridged::new();
        let mut input = BytesMut::from(&[1u8, 0x6c, 0xfe, 0xff, 0xff][..]);
        let packet = t.decode(&mut input).unwrap().unwrap();
        assert_eq!(crate::transport::status_code(&packet), Some(-404));
        assert!(input.is_empty());
    }
}
