//! Wire-exact WAL header and frame layout (§3, §6).
//!
//! This is the one place in the crate that talks raw bytes instead of Rust
//! structs-with-derive: the spec pins the header to 32 bytes and the frame
//! header to 40 bytes, little-endian, with CRC32 computed over specific byte
//! ranges. `bincode` (used elsewhere for collection metadata) can't produce
//! this — its framing is self-describing and variable length — so encoding
//! and decoding are written by hand, following the manual offset-based
//! layout technique the NeuroQuantumDB example repo's `page.rs` uses for its
//! own checksummed page headers.

use crate::error::{Result, StratumError};

pub const WAL_MAGIC: u32 = 0x4741_4C57; // "GALW" read little-endian as u32
pub const WAL_FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 32;
pub const FRAME_HEADER_SIZE: usize = 40;

pub const FLAG_COMMIT: u8 = 0x01;
pub const FLAG_CHECKPOINT: u8 = 0x02;

/// Fixed 32-byte WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub checkpoint_tx_id: u64,
    pub frame_count_hint: u64,
    pub header_crc32: u32,
}

impl WalHeader {
    pub fn new(page_size: u32) -> Self {
        let mut h = Self {
            magic: WAL_MAGIC,
            version: WAL_FORMAT_VERSION,
            page_size,
            checkpoint_tx_id: 0,
            frame_count_hint: 0,
            header_crc32: 0,
        };
        h.header_crc32 = h.compute_crc();
        h
    }

    fn compute_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic.to_le_bytes());
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.page_size.to_le_bytes());
        hasher.update(&self.checkpoint_tx_id.to_le_bytes());
        hasher.update(&self.frame_count_hint.to_le_bytes());
        hasher.finalize()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..20].copy_from_slice(&self.checkpoint_tx_id.to_le_bytes());
        buf[20..28].copy_from_slice(&self.frame_count_hint.to_le_bytes());
        buf[28..32].copy_from_slice(&self.header_crc32.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StratumError::CorruptWal {
                reason: format!("header too short: {} bytes", buf.len()),
            });
        }
        let h = Self {
            magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            page_size: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            checkpoint_tx_id: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            frame_count_hint: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            header_crc32: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        };
        if h.magic != WAL_MAGIC {
            return Err(StratumError::CorruptWal {
                reason: format!("bad magic: {:#x}", h.magic),
            });
        }
        if h.header_crc32 != h.compute_crc() {
            return Err(StratumError::CorruptWal {
                reason: "header CRC32 mismatch".to_string(),
            });
        }
        Ok(h)
    }
}

/// Fixed 40-byte WAL frame header. The payload (exactly `page_size` bytes,
/// zero-padded past `data_length`) follows immediately after in the file but
/// is kept as a separate buffer here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_number: u64,
    pub tx_id: u64,
    pub page_id: i32,
    pub page_type: u8,
    pub flags: u8,
    pub data_length: u32,
    pub salt1: u32,
    pub salt2: u32,
    pub frame_crc32: u32,
}

impl FrameHeader {
    pub fn is_commit(&self) -> bool {
        self.flags & FLAG_COMMIT != 0
    }

    pub fn is_checkpoint(&self) -> bool {
        self.flags & FLAG_CHECKPOINT != 0
    }

    /// CRC32 over the 36-byte header prefix (everything but the checksum
    /// field itself) plus `data_length` bytes of payload, per §3.
    fn compute_crc(&self, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.frame_number.to_le_bytes());
        hasher.update(&self.tx_id.to_le_bytes());
        hasher.update(&self.page_id.to_le_bytes());
        hasher.update(&[self.page_type, self.flags]);
        hasher.update(&[0u8, 0u8]); // reserved
        hasher.update(&self.data_length.to_le_bytes());
        hasher.update(&self.salt1.to_le_bytes());
        hasher.update(&self.salt2.to_le_bytes());
        let n = self.data_length as usize;
        hasher.update(&payload[..n.min(payload.len())]);
        hasher.finalize()
    }

    /// Encode header + zero-padded payload into one `FRAME_HEADER_SIZE + page_size` buffer.
    pub fn encode(&mut self, payload: &[u8], page_size: usize) -> Vec<u8> {
        self.frame_crc32 = self.compute_crc(payload);
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + page_size);
        buf.extend_from_slice(&self.frame_number.to_le_bytes());
        buf.extend_from_slice(&self.tx_id.to_le_bytes());
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.push(self.page_type);
        buf.push(self.flags);
        buf.extend_from_slice(&[0u8, 0u8]); // reserved
        buf.extend_from_slice(&self.data_length.to_le_bytes());
        buf.extend_from_slice(&self.salt1.to_le_bytes());
        buf.extend_from_slice(&self.salt2.to_le_bytes());
        buf.extend_from_slice(&self.frame_crc32.to_le_bytes());
        debug_assert_eq!(buf.len(), FRAME_HEADER_SIZE);
        buf.extend_from_slice(payload);
        buf.resize(FRAME_HEADER_SIZE + page_size, 0);
        buf
    }

    /// Decode a header from the first `FRAME_HEADER_SIZE` bytes of `buf` and
    /// validate its CRC32 against the following `page_size` payload bytes.
    /// Also validates that `salt1`/`salt2` match the current WAL generation.
    /// Returns `None` (not an error) on any mismatch — callers treat that as
    /// "stop scanning", per §4.4's torn-write tolerance.
    pub fn decode(
        buf: &[u8],
        page_size: usize,
        expect_salt1: u32,
        expect_salt2: u32,
    ) -> Option<(Self, Vec<u8>)> {
        if buf.len() < FRAME_HEADER_SIZE + page_size {
            return None;
        }
        let header = Self {
            frame_number: u64::from_le_bytes(buf[0..8].try_into().ok()?),
            tx_id: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            page_id: i32::from_le_bytes(buf[16..20].try_into().ok()?),
            page_type: buf[20],
            flags: buf[21],
            data_length: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            salt1: u32::from_le_bytes(buf[28..32].try_into().ok()?),
            salt2: u32::from_le_bytes(buf[32..36].try_into().ok()?),
            frame_crc32: u32::from_le_bytes(buf[36..40].try_into().ok()?),
        };
        if header.salt1 != expect_salt1 || header.salt2 != expect_salt2 {
            return None;
        }
        if header.data_length as usize > page_size {
            return None;
        }
        let payload = &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + page_size];
        if header.compute_crc(payload) != header.frame_crc32 {
            return None;
        }
        Some((header, payload.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = WalHeader::new(4096);
        let bytes = h.to_bytes();
        let decoded = WalHeader::from_bytes(&bytes).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let h = WalHeader::new(4096);
        let mut bytes = h.to_bytes();
        bytes[0] = 0;
        assert!(WalHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn header_rejects_corrupted_crc() {
        let h = WalHeader::new(4096);
        let mut bytes = h.to_bytes();
        bytes[12] ^= 0xFF; // flip a byte inside checkpoint_tx_id
        assert!(WalHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn frame_round_trips() {
        let page_size = 64;
        let mut header = FrameHeader {
            frame_number: 7,
            tx_id: 3,
            page_id: 42,
            page_type: 1,
            flags: FLAG_COMMIT,
            data_length: 5,
            salt1: 1,
            salt2: 99,
            frame_crc32: 0,
        };
        let payload = b"hello";
        let encoded = header.encode(payload, page_size);
        assert_eq!(encoded.len(), FRAME_HEADER_SIZE + page_size);

        let (decoded, decoded_payload) = FrameHeader::decode(&encoded, page_size, 1, 99).unwrap();
        assert_eq!(decoded.frame_number, 7);
        assert_eq!(decoded.page_id, 42);
        assert!(decoded.is_commit());
        assert_eq!(&decoded_payload[..5], payload);
    }

    #[test]
    fn frame_decode_rejects_salt_mismatch() {
        let page_size = 16;
        let mut header = FrameHeader {
            frame_number: 1,
            tx_id: 1,
            page_id: 0,
            page_type: 0,
            flags: 0,
            data_length: 0,
            salt1: 1,
            salt2: 2,
            frame_crc32: 0,
        };
        let encoded = header.encode(&[], page_size);
        assert!(FrameHeader::decode(&encoded, page_size, 1, 3).is_none());
    }

    #[test]
    fn frame_decode_rejects_corrupted_crc() {
        let page_size = 16;
        let mut header = FrameHeader {
            frame_number: 1,
            tx_id: 1,
            page_id: 0,
            page_type: 0,
            flags: 0,
            data_length: 4,
            salt1: 1,
            salt2: 2,
            frame_crc32: 0,
        };
        let mut encoded = header.encode(b"data", page_size);
        let last = encoded.len() - 1;
        encoded[FRAME_HEADER_SIZE] ^= 0xFF; // corrupt payload byte
        let _ = last;
        assert!(FrameHeader::decode(&encoded, page_size, 1, 2).is_none());
    }
}
