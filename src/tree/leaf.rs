//! # Leaf Blocks and Leaf Descriptors
//!
//! Two views of the same leaf:
//!
//! - [`LeafBlock`] is the persistent side: a fixed array of 48 slot payload
//!   addresses plus the `next` pointer that threads every leaf ever
//!   allocated into one unsorted list rooted at the persistent root. A null
//!   address marks an empty slot.
//!
//! - [`LeafNode`] is the volatile descriptor: per-slot Pearson hashes and
//!   owned key copies that let lookups run entirely in memory, touching the
//!   pool only to fetch the winning slot's value bytes. Slot `i` of the
//!   descriptor always mirrors slot `i` of its block.
//!
//! Descriptors are built during recovery or when a split creates a new
//! leaf, and they live until engine shutdown; persistent leaves are never
//! unlinked, only emptied and recycled.

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::LEAF_KEYS;
use crate::heap::Heap;
use crate::tree::slot::SlotPayload;

/// Persistent leaf: 48 slot payload addresses and the next-leaf link.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LeafBlock {
    pub slots: [u64; LEAF_KEYS],
    pub next: u64,
}

pub const LEAF_BLOCK_SIZE: usize = std::mem::size_of::<LeafBlock>();

impl LeafBlock {
    pub fn zeroed() -> Self {
        Self {
            slots: [0; LEAF_KEYS],
            next: 0,
        }
    }

    pub fn read(heap: &Heap, addr: u64) -> Result<Self> {
        ensure!(addr != 0, "null leaf block address");
        let bytes = heap.bytes(addr, LEAF_BLOCK_SIZE)?;
        LeafBlock::read_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("malformed leaf block at {:#x}: {:?}", addr, e))
    }

    /// Pool address of slot `slot` inside the block at `leaf_addr`.
    pub fn slot_addr(leaf_addr: u64, slot: usize) -> u64 {
        leaf_addr + (slot * 8) as u64
    }

    /// Pool address of the `next` pointer of the block at `leaf_addr`.
    pub fn next_addr(leaf_addr: u64) -> u64 {
        leaf_addr + (LEAF_KEYS * 8) as u64
    }
}

/// Hash and owned key copy of one occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotKey {
    pub hash: u8,
    pub key: Vec<u8>,
}

/// Volatile descriptor mirroring one persistent leaf block.
#[derive(Debug)]
pub struct LeafNode {
    pub addr: u64,
    pub slots: [Option<SlotKey>; LEAF_KEYS],
}

impl LeafNode {
    pub fn empty(addr: u64) -> Self {
        Self {
            addr,
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Builds the descriptor for `block` by decoding every occupied slot.
    pub fn load(heap: &Heap, addr: u64, block: &LeafBlock) -> Result<Self> {
        let mut node = Self::empty(addr);
        for (i, &payload_addr) in block.slots.iter().enumerate() {
            if payload_addr == 0 {
                continue;
            }
            let payload = SlotPayload::read(heap, payload_addr)?;
            node.slots[i] = Some(SlotKey {
                hash: payload.hash(),
                key: payload.key().to_vec(),
            });
        }
        Ok(node)
    }

    /// Finds the slot holding `key`, comparing the stored hash before the
    /// key bytes.
    pub fn find_slot(&self, hash: u8, key: &[u8]) -> Option<usize> {
        self.slots.iter().position(|slot| {
            matches!(slot, Some(sk) if sk.hash == hash && sk.key.as_slice() == key)
        })
    }

    pub fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.slots
            .iter()
            .flatten()
            .map(|sk| sk.key.as_slice())
            .min()
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        self.slots
            .iter()
            .flatten()
            .map(|sk| sk.key.as_slice())
            .max()
    }
}
