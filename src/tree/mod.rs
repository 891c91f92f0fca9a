//! # Hybrid Tree Structures
//!
//! Building blocks for the engine's hybrid B+ tree. The split of concerns
//! follows the two homes the data lives in:
//!
//! - **Persistent** (`slot`, the block half of `leaf`): slot payloads and
//!   leaf blocks inside the pool, reachable from the persistent root as one
//!   unsorted linked list. This is the only state that survives restart.
//!
//! - **Volatile** (`inner`, the descriptor half of `leaf`, `hash`): the
//!   searchable directory above the blocks, rebuilt from the list on every
//!   open. Descriptors cache per-slot Pearson hashes and key copies so
//!   navigation and slot search never touch the pool.
//!
//! The engine in [`crate::engine`] owns the mutation and recovery logic
//! that ties the two halves together.

mod hash;
mod inner;
mod leaf;
mod slot;

pub use hash::pearson;
pub use inner::{InnerNode, Node};
pub use leaf::{LeafBlock, LeafNode, SlotKey, LEAF_BLOCK_SIZE};
pub use slot::{encode as encode_slot, payload_len, SlotPayload, SLOT_HEADER_SIZE};
