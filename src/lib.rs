//! # mvtree - Persistent Hybrid B+ Tree Key-Value Engine
//!
//! mvtree stores keys and values in a byte-addressable persistent region
//! (a memory-mapped pool file) while keeping the entire search structure in
//! volatile memory. The index is cheap to rebuild and never has to be
//! crash-consistent; only the flat leaf payloads are, and they are guarded
//! by failure-atomic transactions.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mvtree::{MvTree, Options};
//!
//! let kv = MvTree::open("./kv.pool", Options::new().pool_size(64 << 20))?;
//!
//! kv.put(b"key1", b"value1")?;
//! assert_eq!(kv.get(b"key1")?, Some(b"value1".to_vec()));
//! kv.remove(b"key1")?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │       Engine API (Get / Put / Remove)    │
//! ├──────────────────────────────────────────┤
//! │  Volatile directory: inner nodes +       │
//! │  leaf descriptors (hashes, key copies)   │
//! ├──────────────────────────────────────────┤
//! │  Persistent leaves: 48 inline slots,     │
//! │  linked unsorted from the root object    │
//! ├──────────────────────────────────────────┤
//! │  Transactional heap: allocator +         │
//! │  commit journal over a fixed mmap pool   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Every mutation runs under the engine's writer lock as one heap
//! transaction; reads run under the shared lock straight off the mapped
//! pool. On open the engine walks the persistent leaf list, rebuilds the
//! directory from the surviving keys, and pools empty leaves for reuse by
//! later inserts.
//!
//! ## Scope
//!
//! Point operations only: no range scans, no ordered iteration (an
//! unordered listing exists for diagnostics), no cross-key transactions,
//! and no online pool resize.
//!
//! ## Module Overview
//!
//! - [`config`]: tree geometry and pool layout constants, open options
//! - [`heap`]: memory-mapped pool, block allocator, commit journal,
//!   transactions
//! - [`tree`]: slot codec, Pearson filter, leaf blocks and descriptors,
//!   inner nodes
//! - [`engine`]: the `MvTree` engine itself

pub mod config;
pub mod engine;
pub mod heap;
pub mod tree;

pub use config::Options;
pub use engine::{Analysis, MvTree, Status, ENGINE};
