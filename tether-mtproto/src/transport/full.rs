use bytes::{Buf, BufMut, BytesMut};

use super::{Transport, TransportError};

/// Largest packet a server will ever send; anything larger is garbage.
const MAX_PACKET: usize = 16 * 1024 * 1024;

/// [MTProto Full] framing.
///
/// Each packet is `[len:4][seq:4][payload][crc32:4]`, where `len` counts the
/// whole packet and the CRC covers everything before it. There are no init
/// bytes, and no obfuscation tag.
///
/// [MTProto Full]: https://core.telegram.org/mtproto/mtproto-transports#full
#[derive(Clone, Debug, Default)]
pub struct Full {
    send_seq: u32,
    recv_seq: u32,
}

impl Full {
    pub fn new() -> Self { Self::default() }
}

impl Transport for Full {
    fn init_bytes(&self) -> &'static [u8] { &[] }

    fn obfuscation_tag(&self) -> Option<[u8; 4]> { None }

    fn encode(&mut self, payload: &[u8], out: &mut BytesMut) {
        let start = out.len();
        let total = payload.len() + 12;
        out.reserve(total);
        out.put_u32_le(total as u32);
        out.put_u32_le(self.send_seq);
        out.put_slice(payload);
        let crc = crc32_ieee(&out[start..]);
        out.put_u32_le(crc);
        self.send_seq = self.send_seq.wrapping_add(1);
    }

    fn decode(&mut self, input: &mut BytesMut) -> Result<Option<Vec<u8>>, TransportError> {
        if input.len() < 4 {
            return Ok(None);
        }
        let total = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
        if !(12..=MAX_PACKET).contains(&total) {
            return Err(TransportError::BadLength { len: total });
        }
        if input.len() < total {
            return Ok(None);
        }

        let packet = input.split_to(total);
        let body = &packet[..total - 4];
        let expected = u32::from_le_bytes([packet[total - 4], packet[total - 3], packet[total - 2], packet[total - 1]]);
        let got = crc32_ieee(body);
        if got != expected {
            return Err(TransportError::InvalidChecksum { expected, got });
        }

        let seq = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
        if seq != self.recv_seq {
            return Err(TransportError::BadSeq { expected: self.recv_seq, got: seq });
        }
        self.recv_seq = self.recv_seq.wrapping_add(1);

        let mut body = packet;
        body.truncate(total - 4);
        body.advance(8);
        Ok(Some(body.to_vec()))
    }
}

/// CRC-32 with the IEEE 802.3 polynomial.
fn crc32_ieee(data: &[u8]) -> u32 {
    const POLY: u32 = 0xedb88320;
    let mut crc: u32 = 0xffffffff;
    for &byte in data {
        let mut b = byte as u32;
        for _ in 0..8 {
            let mix = (crc ^ b) & 1;
            crc >>= 1;
            if mix != 0 { crc ^= POLY; }
            b >>= 1;
        }
    }
    crc ^ 0xffffffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_known_value() {
        assert_eq!(crc32_ieee(b"123456789"), 0xcbf43926);
    }

    #[test]
    fn sequence_numbers_advance() {
        let mut t = Full::new();
        let mut out = BytesMut::new();
        t.encode(&[1; 8], &mut out);
        t.encode(&[2; 8], &mut out);
        assert_eq!(&out[4..8], &0u32.to_le_bytes());
        assert_eq!(&out[20 + 4..20 + 8], &1u32.to_le_bytes());

        let mut rx = Full::new();
        assert_eq!(rx.decode(&mut out), Ok(Some(vec![1; 8])));
        assert_eq!(rx.decode(&mut out), Ok(Some(vec![2; 8])));
    }

    #[test]
    fn out_of_order_sequence_is_rejected() {
        let mut t = Full::new();
        let mut out = BytesMut::new();
        t.encode(&[0; 8], &mut out);
        out.clear();
        t.encode(&[0; 8], &mut out);
        assert_eq!(Full::new().decode(&mut out), Err(TransportError::BadSeq { expected: 0, got: 1 }));
    }
}
