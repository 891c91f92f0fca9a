//! # Commit Journal
//!
//! The journal is a side file that makes transaction commits failure-atomic.
//! A commit serializes every staged write into one checksummed record, syncs
//! it, applies the writes to the mapped pool, and only then truncates the
//! journal again.
//!
//! ## Record Format
//!
//! ```text
//! +----------------------+----------------------------------+
//! | RecordHeader (32 B)  | Entries (payload_len bytes)      |
//! +----------------------+----------------------------------+
//!
//! Entry:
//! +-----------+-----------+------------------+
//! | addr (8B) | len (8B)  | bytes (len)      |
//! +-----------+-----------+------------------+
//! ```
//!
//! The header carries a magic tag, the entry count, the payload length, and
//! a CRC64 over the count, the length, and the payload. Native byte order
//! throughout; pools do not move between machines.
//!
//! ## Crash States
//!
//! On open, exactly one of three states holds:
//!
//! 1. **Empty or missing journal**: the last commit finished (or none ever
//!    ran); the pool is already consistent.
//! 2. **Complete, valid record**: the commit was durable but the pool may
//!    hold a torn subset of its writes; the record is re-applied. Entries
//!    are absolute offsets with full images, so replay is idempotent.
//! 3. **Torn or corrupt record**: the commit never became durable; the
//!    record is discarded and the pool is untouched, as if the transaction
//!    aborted.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

const JOURNAL_MAGIC: u64 = 0x4d56_4a52_4e4c_0001;
const RECORD_HEADER_SIZE: usize = 32;
const ENTRY_HEADER_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct RecordHeader {
    magic: u64,
    entry_count: u32,
    _reserved: u32,
    payload_len: u64,
    checksum: u64,
}

fn compute_checksum(entry_count: u32, payload: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&entry_count.to_ne_bytes());
    digest.update(&(payload.len() as u64).to_ne_bytes());
    digest.update(payload);
    digest.finalize()
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Serializes `writes` into a single record and makes it durable.
    pub fn write_record(&self, writes: &[(u64, Vec<u8>)]) -> Result<()> {
        ensure!(!writes.is_empty(), "refusing to journal an empty write set");

        let payload_len: usize = writes
            .iter()
            .map(|(_, bytes)| ENTRY_HEADER_SIZE + bytes.len())
            .sum();

        let mut payload = Vec::with_capacity(payload_len);
        for (addr, bytes) in writes {
            payload.extend_from_slice(&addr.to_ne_bytes());
            payload.extend_from_slice(&(bytes.len() as u64).to_ne_bytes());
            payload.extend_from_slice(bytes);
        }

        let header = RecordHeader {
            magic: JOURNAL_MAGIC,
            entry_count: writes.len() as u32,
            _reserved: 0,
            payload_len: payload.len() as u64,
            checksum: compute_checksum(writes.len() as u32, &payload),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .wrap_err_with(|| format!("failed to open journal '{}'", self.path.display()))?;

        file.write_all(header.as_bytes())
            .and_then(|_| file.write_all(&payload))
            .wrap_err("failed to write journal record")?;
        file.sync_all().wrap_err("failed to sync journal")?;

        Ok(())
    }

    /// Returns the committed write set of a complete, valid record, or
    /// `None` when the journal is missing, empty, torn, or corrupt.
    pub fn pending(&self) -> Result<Option<Vec<(u64, Vec<u8>)>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .wrap_err_with(|| format!("failed to read journal '{}'", self.path.display()))
            }
        };

        if data.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let header = match RecordHeader::read_from_bytes(&data[..RECORD_HEADER_SIZE]) {
            Ok(header) => header,
            Err(_) => return Ok(None),
        };

        let payload = &data[RECORD_HEADER_SIZE..];
        if header.magic != JOURNAL_MAGIC
            || header.payload_len != payload.len() as u64
            || header.checksum != compute_checksum(header.entry_count, payload)
        {
            return Ok(None);
        }

        let mut writes = Vec::with_capacity(header.entry_count as usize);
        let mut offset = 0usize;
        for _ in 0..header.entry_count {
            if payload.len() - offset < ENTRY_HEADER_SIZE {
                return Ok(None);
            }
            let addr = u64::from_ne_bytes(payload[offset..offset + 8].try_into()?);
            let len = u64::from_ne_bytes(payload[offset + 8..offset + 16].try_into()?) as usize;
            offset += ENTRY_HEADER_SIZE;
            if payload.len() - offset < len {
                return Ok(None);
            }
            writes.push((addr, payload[offset..offset + len].to_vec()));
            offset += len;
        }
        if offset != payload.len() {
            return Ok(None);
        }

        Ok(Some(writes))
    }

    /// Truncates the journal, marking the last record as fully applied.
    pub fn clear(&self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .wrap_err_with(|| format!("failed to clear journal '{}'", self.path.display()))?;
        file.sync_all().wrap_err("failed to sync cleared journal")?;
        Ok(())
    }

    /// Deletes the journal file if present.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .wrap_err_with(|| format!("failed to remove journal '{}'", self.path.display())),
        }
    }
}
