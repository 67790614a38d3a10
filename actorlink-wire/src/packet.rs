//! The 24-byte packet header plus payload that every fragment carries over
//! the link.
//!
//! ```text
//! offset  0..16   msg_id        (16 bytes)
//! offset 16..18   seq           (u16)
//! offset 18..20   total         (u16)
//! offset 20..24   checksum      (u32, modular sum of payload bytes)
//! offset 24..     payload
//! ```
//!
//! All multi-byte integers are big-endian. The checksum is a non-cryptographic
//! wraparound sum; its only job is catching bit-flips within one reassembly
//! group, not defending against a hostile peer.

use bytes::{Bytes, BytesMut};

use crate::ids::MsgId;

/// Size of the fixed packet header, in bytes.
pub const HEADER_LEN: usize = 24;

/// A single on-the-wire fragment of a (possibly larger) envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub msg_id: MsgId,
    pub seq: u16,
    pub total: u16,
    pub checksum: u32,
    pub payload: Bytes,
}

/// Errors that can occur while parsing a byte slice as a `Packet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketParseError {
    /// Fewer than `HEADER_LEN` bytes were supplied.
    TooShort,
    /// The header claims `total == 0`, which is never valid.
    ZeroTotal,
    /// The header's `seq` is not less than `total`.
    SeqOutOfRange,
    /// The payload's modular sum does not match the header's checksum.
    ChecksumMismatch,
}

impl std::fmt::Display for PacketParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketParseError::TooShort => write!(f, "packet shorter than the {HEADER_LEN}-byte header"),
            PacketParseError::ZeroTotal => write!(f, "packet header declares total=0"),
            PacketParseError::SeqOutOfRange => write!(f, "packet seq >= total"),
            PacketParseError::ChecksumMismatch => write!(f, "packet payload checksum mismatch"),
        }
    }
}

impl std::error::Error for PacketParseError {}

/// Compute the modular sum-of-bytes checksum used for framing integrity.
///
/// This is deliberately not cryptographic: it only needs to catch
/// accidental corruption within a reassembly group, and the sender's
/// end-to-end RPC timeout is the real recovery mechanism for anything it
/// misses.
pub fn checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

impl Packet {
    pub fn new(msg_id: MsgId, seq: u16, total: u16, payload: Bytes) -> Self {
        let checksum = checksum(&payload);
        Packet { msg_id, seq, total, checksum, payload }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize this packet into a fresh byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.msg_id.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.total.to_be_bytes());
        buf.extend_from_slice(&self.checksum.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a packet from raw bytes, validating structure and checksum.
    ///
    /// Returns `Err` for anything that doesn't look like a well-formed
    /// packet; callers use this to distinguish fragmented traffic from a
    /// single raw (un-fragmented) message on the inbound path.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketParseError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketParseError::TooShort);
        }
        let msg_id = MsgId::from_be_bytes(bytes[0..16].try_into().unwrap());
        let seq = u16::from_be_bytes(bytes[16..18].try_into().unwrap());
        let total = u16::from_be_bytes(bytes[18..20].try_into().unwrap());
        let header_checksum = u32::from_be_bytes(bytes[20..24].try_into().unwrap());
        let payload = &bytes[HEADER_LEN..];

        if total == 0 {
            return Err(PacketParseError::ZeroTotal);
        }
        if seq >= total {
            return Err(PacketParseError::SeqOutOfRange);
        }
        if checksum(payload) != header_checksum {
            return Err(PacketParseError::ChecksumMismatch);
        }

        Ok(Packet {
            msg_id,
            seq,
            total,
            checksum: header_checksum,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Id128;

    #[test]
    fn encode_decode_roundtrip() {
        let packet = Packet::new(Id128::from_u128(42), 1, 3, Bytes::from_static(b"hello"));
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn checksum_matches_modular_sum() {
        let payload = b"0123456789";
        let expected: u32 = payload.iter().map(|&b| b as u32).sum();
        assert_eq!(checksum(payload), expected);
    }

    #[test]
    fn single_byte_flip_breaks_checksum() {
        let packet = Packet::new(Id128::from_u128(1), 0, 1, Bytes::from_static(b"ABCDEFGH"));
        let mut encoded = packet.encode().to_vec();
        encoded[HEADER_LEN] ^= 0x01;
        assert_eq!(Packet::decode(&encoded), Err(PacketParseError::ChecksumMismatch));
    }

    #[test]
    fn too_short_is_rejected() {
        assert_eq!(Packet::decode(&[0u8; 10]), Err(PacketParseError::TooShort));
    }

    #[test]
    fn zero_total_is_rejected() {
        let mut buf = BytesMut::zeroed(HEADER_LEN);
        buf[18..20].copy_from_slice(&0u16.to_be_bytes());
        assert_eq!(Packet::decode(&buf), Err(PacketParseError::ZeroTotal));
    }

    #[test]
    fn seq_out_of_range_is_rejected() {
        let mut buf = BytesMut::zeroed(HEADER_LEN);
        buf[16..18].copy_from_slice(&2u16.to_be_bytes()); // seq
        buf[18..20].copy_from_slice(&2u16.to_be_bytes()); // total
        assert_eq!(Packet::decode(&buf), Err(PacketParseError::SeqOutOfRange));
    }
}
