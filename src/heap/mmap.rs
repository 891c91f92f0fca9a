//! # Memory-Mapped Pool Region
//!
//! `MmapRegion` maps the fixed-size pool file into the process address
//! space, giving the rest of the heap byte-addressable access to persistent
//! state with no read-time copies.
//!
//! ## Fixed Size
//!
//! The region is sized once at creation and never grown; out-of-space is a
//! normal, recoverable condition surfaced by the allocator. This keeps every
//! mapped slice valid for the lifetime of the region and avoids the
//! remap hazards a growable mapping would introduce.
//!
//! ## Safety Model
//!
//! Access goes through Rust's borrow checker:
//!
//! ```text
//! bytes(&self, addr, len) -> &[u8]          // shared reads
//! bytes_mut(&mut self, addr, len) -> &mut [u8]  // exclusive writes
//! ```
//!
//! Writers hold `&mut MmapRegion` (through the engine's exclusive lock), so
//! readers can never observe a slice that is concurrently mutated.
//!
//! ## Durability
//!
//! Writes land in the page cache; `flush()` issues `msync` and returns only
//! once the range is durable. The transaction layer orders its journal and
//! region flushes so a crash at any point preserves failure atomicity.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct MmapRegion {
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl MmapRegion {
    /// Creates a zero-filled pool file of exactly `size` bytes and maps it.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(size % 8 == 0, "pool size {} is not 8-byte aligned", size);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create pool file '{}'", path.display()))?;

        file.set_len(size)
            .wrap_err_with(|| format!("failed to size pool file to {} bytes", size))?;

        // SAFETY: MmapMut::map_mut is unsafe because externally truncating or
        // rewriting the mapped file is undefined behavior. This is safe because:
        // 1. The file was just created with read+write access and a fixed length
        // 2. Pool files are not shared with external processes
        // 3. The mapping lives exactly as long as MmapRegion, and the region is
        //    never remapped (the pool does not resize)
        // 4. All access goes through bytes()/bytes_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { file, mmap, size })
    }

    /// Maps an existing pool file at its current size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open pool file '{}'", path.display()))?;

        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(size > 0, "pool file '{}' is empty", path.display());
        ensure!(
            size % 8 == 0,
            "pool file '{}' size {} is not 8-byte aligned",
            path.display(),
            size
        );

        // SAFETY: same justification as in create(); the file length was read
        // from the same handle that stays open for the lifetime of the region.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { file, mmap, size })
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Result<&[u8]> {
        ensure!(
            addr.checked_add(len as u64).is_some_and(|end| end <= self.size),
            "read of {} bytes at {:#x} exceeds pool size {}",
            len,
            addr,
            self.size
        );
        let start = addr as usize;
        Ok(&self.mmap[start..start + len])
    }

    pub fn bytes_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8]> {
        ensure!(
            addr.checked_add(len as u64).is_some_and(|end| end <= self.size),
            "write of {} bytes at {:#x} exceeds pool size {}",
            len,
            addr,
            self.size
        );
        let start = addr as usize;
        Ok(&mut self.mmap[start..start + len])
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync pool region")
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sync_file(&self) -> Result<()> {
        self.file.sync_all().wrap_err("failed to sync pool file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_produces_zeroed_region() {
        let dir = tempdir().unwrap();
        let region = MmapRegion::create(dir.path().join("kv.pool"), 4096).unwrap();

        assert_eq!(region.size(), 4096);
        assert!(region.bytes(0, 4096).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");

        {
            let mut region = MmapRegion::create(&path, 4096).unwrap();
            region.bytes_mut(128, 4).unwrap().copy_from_slice(b"abcd");
            region.flush().unwrap();
        }

        let region = MmapRegion::open(&path).unwrap();
        assert_eq!(region.bytes(128, 4).unwrap(), b"abcd");
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let dir = tempdir().unwrap();
        let region = MmapRegion::create(dir.path().join("kv.pool"), 4096).unwrap();

        assert!(region.bytes(4090, 8).is_err());
        assert!(region.bytes(u64::MAX, 8).is_err());
        assert!(region.bytes(4096, 1).is_err());
        assert!(region.bytes(0, 4096).is_ok());
    }

    #[test]
    fn open_rejects_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.pool");
        std::fs::File::create(&path).unwrap();

        assert!(MmapRegion::open(&path).is_err());
    }

    #[test]
    fn create_rejects_unaligned_size() {
        let dir = tempdir().unwrap();
        assert!(MmapRegion::create(dir.path().join("kv.pool"), 4095).is_err());
    }
}
