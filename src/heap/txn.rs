//! # Transactions
//!
//! A [`Txn`] stages byte-range writes against the pool without touching it.
//! Reads issued through the transaction observe staged state layered over
//! the pool, so multi-step mutations (allocator bookkeeping, list linking,
//! slot rewrites) compose naturally inside one atomic unit.
//!
//! ## Commit Protocol
//!
//! ```text
//! 1. serialize staged writes into the journal, fsync     (durable intent)
//! 2. apply the writes to the mapped pool                 (may tear)
//! 3. msync the pool                                      (durable state)
//! 4. truncate the journal, fsync                         (intent retired)
//! ```
//!
//! A crash before step 1 completes aborts the transaction; a crash after
//! leaves a valid journal record that open-time recovery re-applies. Either
//! way the pool observes all of the transaction or none of it.
//!
//! ## Abort
//!
//! Dropping an uncommitted `Txn` discards the staged writes. No file I/O
//! has happened, so volatile callers can simply propagate the error.

use eyre::{ensure, Result};

use super::{Heap, OFF_ROOT};

pub struct Txn<'h> {
    heap: &'h mut Heap,
    writes: Vec<(u64, Vec<u8>)>,
}

impl<'h> Txn<'h> {
    pub(super) fn new(heap: &'h mut Heap) -> Self {
        Self {
            heap,
            writes: Vec::new(),
        }
    }

    /// Size of the backing pool in bytes.
    pub fn pool_size(&self) -> u64 {
        self.heap.size()
    }

    /// Reads `len` bytes at `addr`, observing staged writes.
    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = self.heap.bytes(addr, len)?.to_vec();
        let end = addr + len as u64;
        for (woff, wbytes) in &self.writes {
            let wend = woff + wbytes.len() as u64;
            let start = addr.max(*woff);
            let stop = end.min(wend);
            if start < stop {
                let dst = (start - addr) as usize;
                let src = (start - woff) as usize;
                let n = (stop - start) as usize;
                buf[dst..dst + n].copy_from_slice(&wbytes[src..src + n]);
            }
        }
        Ok(buf)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        Ok(u64::from_ne_bytes(bytes.as_slice().try_into()?))
    }

    /// Stages a write. Nothing reaches the pool until `commit`.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        ensure!(
            addr >= OFF_ROOT,
            "write at {:#x} would clobber the immutable pool header",
            addr
        );
        ensure!(
            addr.checked_add(bytes.len() as u64)
                .is_some_and(|end| end <= self.heap.size()),
            "write of {} bytes at {:#x} exceeds pool size {}",
            bytes.len(),
            addr,
            self.heap.size()
        );
        self.writes.push((addr, bytes.to_vec()));
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_ne_bytes())
    }

    /// Address of the persistent root object, observing staged updates.
    pub fn root(&self) -> Result<u64> {
        self.read_u64(OFF_ROOT)
    }

    pub fn set_root(&mut self, addr: u64) -> Result<()> {
        self.write_u64(OFF_ROOT, addr)
    }

    /// Makes every staged write durable, atomically.
    pub fn commit(self) -> Result<()> {
        let Txn { heap, writes } = self;
        if writes.is_empty() {
            return Ok(());
        }
        heap.journal().write_record(&writes)?;
        heap.apply(&writes)?;
        heap.region().flush()?;
        heap.journal().clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MIN_POOL_SIZE, POOL_HEADER_SIZE};
    use tempfile::tempdir;

    fn test_heap() -> (tempfile::TempDir, Heap) {
        let dir = tempdir().unwrap();
        let heap = Heap::create(dir.path().join("kv.pool"), MIN_POOL_SIZE).unwrap();
        (dir, heap)
    }

    #[test]
    fn commit_applies_staged_writes() {
        let (_dir, mut heap) = test_heap();

        let mut txn = heap.begin();
        txn.write(POOL_HEADER_SIZE, b"payload").unwrap();
        txn.write_u64(POOL_HEADER_SIZE + 16, 42).unwrap();
        txn.commit().unwrap();

        assert_eq!(heap.bytes(POOL_HEADER_SIZE, 7).unwrap(), b"payload");
        assert_eq!(heap.read_u64(POOL_HEADER_SIZE + 16).unwrap(), 42);
    }

    #[test]
    fn dropped_transaction_leaves_no_trace() {
        let (_dir, mut heap) = test_heap();

        {
            let mut txn = heap.begin();
            txn.write(POOL_HEADER_SIZE, b"aborted").unwrap();
            // no commit
        }

        assert!(heap
            .bytes(POOL_HEADER_SIZE, 7)
            .unwrap()
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn reads_observe_staged_writes() {
        let (_dir, mut heap) = test_heap();

        let mut txn = heap.begin();
        txn.write(POOL_HEADER_SIZE, &[1u8; 16]).unwrap();
        txn.write(POOL_HEADER_SIZE + 4, &[2u8; 4]).unwrap();

        let bytes = txn.read(POOL_HEADER_SIZE, 16).unwrap();
        assert_eq!(&bytes[..4], &[1, 1, 1, 1]);
        assert_eq!(&bytes[4..8], &[2, 2, 2, 2]);
        assert_eq!(&bytes[8..], &[1u8; 8]);

        // later writes shadow earlier ones
        txn.write_u64(POOL_HEADER_SIZE + 8, u64::MAX).unwrap();
        assert_eq!(txn.read_u64(POOL_HEADER_SIZE + 8).unwrap(), u64::MAX);
    }

    #[test]
    fn header_magic_cannot_be_staged() {
        let (_dir, mut heap) = test_heap();

        let mut txn = heap.begin();
        assert!(txn.write_u64(0, 0xdead).is_err());
        assert!(txn.write_u64(16, 0xdead).is_err());
        assert!(txn.set_root(0x80).is_ok());
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        {
            let mut heap = Heap::create(&path, MIN_POOL_SIZE).unwrap();
            let mut txn = heap.begin();
            txn.write(POOL_HEADER_SIZE, b"durable").unwrap();
            txn.set_root(POOL_HEADER_SIZE).unwrap();
            txn.commit().unwrap();
        }

        let heap = Heap::open(&path).unwrap();
        assert_eq!(heap.bytes(POOL_HEADER_SIZE, 7).unwrap(), b"durable");
        assert_eq!(heap.root(), POOL_HEADER_SIZE);
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let (_dir, mut heap) = test_heap();
        heap.begin().commit().unwrap();
        assert!(heap.journal().pending().unwrap().is_none());
    }
}
