//! # Slot Payload Codec
//!
//! One slot payload packs a (hash, key, value) triple into a contiguous
//! heap buffer:
//!
//! ```text
//! +----------+----------+---------+-------------+------+---------------+------+
//! | keysize  | valsize  | pearson | key bytes   | 0x00 | value bytes   | 0x00 |
//! | u32      | u32      | u8      | keysize     |      | valsize       |      |
//! +----------+----------+---------+-------------+------+---------------+------+
//! ```
//!
//! The trailing NUL after the key and after the value is invariant padding
//! so diagnostic tooling can consume either as a C string; neither NUL is
//! part of the logical bytes, and keys and values may themselves contain
//! NULs. Sizes are native-endian; pools do not move between machines.
//!
//! Decoded accessors return slices pointing straight into the mapped pool,
//! so reads never copy payload bytes.

use eyre::{ensure, Result};

use crate::heap::Heap;

/// keysize + valsize + pearson byte.
pub const SLOT_HEADER_SIZE: usize = 9;

/// Total buffer size for a key/value pair, padding NULs included.
pub fn payload_len(key_len: usize, value_len: usize) -> usize {
    SLOT_HEADER_SIZE + key_len + 1 + value_len + 1
}

/// Packs a slot payload into a fresh buffer laid out as described above.
pub fn encode(hash: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload_len(key.len(), value.len()));
    buf.extend_from_slice(&(key.len() as u32).to_ne_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_ne_bytes());
    buf.push(hash);
    buf.extend_from_slice(key);
    buf.push(0);
    buf.extend_from_slice(value);
    buf.push(0);
    buf
}

/// Zero-copy view of one slot payload inside the pool.
#[derive(Debug, Clone, Copy)]
pub struct SlotPayload<'a> {
    bytes: &'a [u8],
    key_len: usize,
    value_len: usize,
}

impl<'a> SlotPayload<'a> {
    pub fn read(heap: &'a Heap, addr: u64) -> Result<Self> {
        ensure!(addr != 0, "null slot payload address");

        let header = heap.bytes(addr, SLOT_HEADER_SIZE)?;
        let key_len = u32::from_ne_bytes(header[0..4].try_into()?) as usize;
        let value_len = u32::from_ne_bytes(header[4..8].try_into()?) as usize;

        let bytes = heap.bytes(addr, payload_len(key_len, value_len))?;
        ensure!(
            bytes[SLOT_HEADER_SIZE + key_len] == 0
                && bytes[SLOT_HEADER_SIZE + key_len + 1 + value_len] == 0,
            "slot payload at {:#x} is missing its terminators",
            addr
        );

        Ok(Self {
            bytes,
            key_len,
            value_len,
        })
    }

    pub fn hash(&self) -> u8 {
        self.bytes[8]
    }

    pub fn key(&self) -> &'a [u8] {
        &self.bytes[SLOT_HEADER_SIZE..SLOT_HEADER_SIZE + self.key_len]
    }

    pub fn value(&self) -> &'a [u8] {
        let start = SLOT_HEADER_SIZE + self.key_len + 1;
        &self.bytes[start..start + self.value_len]
    }
}
