//! # Persistent Transactional Heap
//!
//! The heap is the byte-addressable persistent region the tree stores its
//! leaf blocks and slot payloads in. It provides exactly three primitives to
//! the layers above: `alloc`, `free`, and failure-atomic transactions.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │ Heap                                  │
//! │  ├── MmapRegion   fixed-size pool file│
//! │  ├── Journal      commit side file    │
//! │  └── begin() ──> Txn                  │
//! │         staged writes + alloc/free    │
//! │         commit() = journal, apply,    │
//! │                    flush, clear       │
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Pool File Layout
//!
//! ```text
//! Offset 0    HeapHeader (48 bytes)
//!             magic | version | pool size | root | high water | free head
//! Offset 64   heap area: allocation blocks
//!             block = [u64 size][payload (8-aligned)]
//! ```
//!
//! Persistent pointers are plain `u64` byte offsets into the pool file;
//! `0` is the null address. The `root` header field anchors whatever object
//! the engine designates as its persistent root.
//!
//! ## Transaction Discipline
//!
//! All mutation goes through [`Txn`]: writes are staged in memory, reads
//! within the transaction observe staged state, and nothing touches the
//! pool until `commit()`. Dropping a transaction without committing aborts
//! it with no trace. Commit durability and crash states are documented in
//! [`journal`].
//!
//! ## Concurrency
//!
//! The heap itself is single-writer by construction (`begin` takes
//! `&mut self`); the engine's reader-writer lock provides the sharing
//! discipline across threads.

mod alloc;
mod journal;
mod mmap;
mod txn;

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{journal_path, MIN_POOL_SIZE, POOL_HEADER_SIZE, POOL_MAGIC, POOL_VERSION};
use journal::Journal;
use mmap::MmapRegion;
pub use txn::Txn;

/// Fixed header at offset 0 of the pool file.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HeapHeader {
    pub magic: u64,
    pub version: u32,
    _reserved: u32,
    pub size: u64,
    pub root: u64,
    pub high_water: u64,
    pub free_head: u64,
}

pub(crate) const HEADER_SIZE: usize = std::mem::size_of::<HeapHeader>();

/// Header field offsets for transactional updates. The fields above
/// `OFF_ROOT` are immutable after creation and may never be staged.
pub(crate) const OFF_ROOT: u64 = 24;
pub(crate) const OFF_HIGH_WATER: u64 = 32;
pub(crate) const OFF_FREE_HEAD: u64 = 40;

#[derive(Debug)]
pub struct Heap {
    path: PathBuf,
    region: MmapRegion,
    journal: Journal,
}

impl Heap {
    /// Creates a fresh pool of `size` bytes at `path`.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            size >= MIN_POOL_SIZE,
            "pool size {} below minimum {}",
            size,
            MIN_POOL_SIZE
        );

        let mut region = MmapRegion::create(path, size)?;

        let header = HeapHeader {
            magic: POOL_MAGIC,
            version: POOL_VERSION,
            _reserved: 0,
            size,
            root: 0,
            high_water: POOL_HEADER_SIZE,
            free_head: 0,
        };
        region
            .bytes_mut(0, HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        region.flush()?;
        region.sync_file()?;

        Ok(Self {
            path: path.to_path_buf(),
            region,
            journal: Journal::new(journal_path(path)),
        })
    }

    /// Opens an existing pool, replaying or discarding any journal record
    /// left behind by an interrupted commit.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let region = MmapRegion::open(path)
            .wrap_err_with(|| format!("failed to open pool '{}'", path.display()))?;
        let journal = Journal::new(journal_path(path));

        let mut heap = Self {
            path: path.to_path_buf(),
            region,
            journal,
        };

        let header = heap.header()?;
        ensure!(
            header.magic == POOL_MAGIC,
            "'{}' is not a pool file (bad magic {:#x})",
            path.display(),
            header.magic
        );
        ensure!(
            header.version == POOL_VERSION,
            "pool format version {} is not supported (expected {})",
            header.version,
            POOL_VERSION
        );
        ensure!(
            header.size == heap.region.size(),
            "pool header claims {} bytes but the file holds {}",
            header.size,
            heap.region.size()
        );

        if let Some(writes) = heap.journal.pending()? {
            tracing::debug!(
                writes = writes.len(),
                pool = %path.display(),
                "replaying committed transaction journal"
            );
            heap.apply(&writes)?;
            heap.region.flush()?;
        }
        heap.journal.clear()?;

        let header = heap.header()?;
        ensure!(
            header.high_water >= POOL_HEADER_SIZE && header.high_water <= header.size,
            "pool high-water mark {:#x} is out of range",
            header.high_water
        );

        Ok(heap)
    }

    pub fn open_or_create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path, size)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.region.size()
    }

    /// Address of the engine's persistent root object (0 = none yet).
    pub fn root(&self) -> u64 {
        self.header().map(|h| h.root).unwrap_or(0)
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Result<&[u8]> {
        self.region.bytes(addr, len)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.region.bytes(addr, 8)?;
        Ok(u64::from_ne_bytes(bytes.try_into()?))
    }

    /// Starts a transaction. All staged state lives in the returned value;
    /// dropping it without `commit` aborts with no effect on the pool.
    pub fn begin(&mut self) -> Txn<'_> {
        Txn::new(self)
    }

    /// Removes the pool and journal files. The heap must be the last user.
    pub fn destroy(self) -> Result<()> {
        let Heap {
            path,
            region,
            journal,
        } = self;
        drop(region);
        fs::remove_file(&path)
            .wrap_err_with(|| format!("failed to remove pool '{}'", path.display()))?;
        journal.remove()
    }

    fn header(&self) -> Result<HeapHeader> {
        let bytes = self.region.bytes(0, HEADER_SIZE)?;
        HeapHeader::read_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("malformed pool header: {:?}", e))
    }

    pub(crate) fn apply(&mut self, writes: &[(u64, Vec<u8>)]) -> Result<()> {
        for (addr, bytes) in writes {
            self.region
                .bytes_mut(*addr, bytes.len())?
                .copy_from_slice(bytes);
        }
        Ok(())
    }

    pub(crate) fn region(&self) -> &MmapRegion {
        &self.region
    }

    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_open_preserves_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        {
            let heap = Heap::create(&path, MIN_POOL_SIZE).unwrap();
            assert_eq!(heap.size(), MIN_POOL_SIZE);
            assert_eq!(heap.root(), 0);
        }

        let heap = Heap::open(&path).unwrap();
        assert_eq!(heap.size(), MIN_POOL_SIZE);
        assert_eq!(heap.root(), 0);
    }

    #[test]
    fn open_rejects_foreign_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-pool");
        fs::write(&path, vec![0u8; MIN_POOL_SIZE as usize]).unwrap();

        let err = Heap::open(&path).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn create_rejects_undersized_pools() {
        let dir = tempdir().unwrap();
        assert!(Heap::create(dir.path().join("kv.pool"), 1024).is_err());
    }

    #[test]
    fn destroy_removes_pool_and_journal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        let mut heap = Heap::create(&path, MIN_POOL_SIZE).unwrap();
        let mut txn = heap.begin();
        let addr = txn.alloc(16).unwrap();
        txn.write_u64(addr, 7).unwrap();
        txn.commit().unwrap();

        heap.destroy().unwrap();
        assert!(!path.exists());
        assert!(!journal_path(&path).exists());
    }

    #[test]
    fn pending_journal_is_replayed_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        {
            Heap::create(&path, MIN_POOL_SIZE).unwrap();
        }

        // A committed record that never reached the pool: write it straight
        // into the journal and reopen.
        let writes = vec![(POOL_HEADER_SIZE, b"replayed".to_vec())];
        Journal::new(journal_path(&path)).write_record(&writes).unwrap();

        let heap = Heap::open(&path).unwrap();
        assert_eq!(
            heap.bytes(POOL_HEADER_SIZE, 8).unwrap(),
            b"replayed".as_slice()
        );
        assert!(heap.journal().pending().unwrap().is_none());
    }

    #[test]
    fn torn_journal_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        {
            Heap::create(&path, MIN_POOL_SIZE).unwrap();
        }
        fs::write(journal_path(&path), b"torn garbage").unwrap();

        let heap = Heap::open(&path).unwrap();
        assert!(heap
            .bytes(POOL_HEADER_SIZE, 16)
            .unwrap()
            .iter()
            .all(|&b| b == 0));
        assert!(heap.journal().pending().unwrap().is_none());
    }
}
