//! Backing Store - positioned I/O over a single file
//!
//! A thin adapter owning the backing file. It is the only component that
//! performs positioned reads and writes; everything above it deals in
//! in-memory pages.
//!
//! # Failure semantics
//!
//! - Reads retry on interruption and zero-pad short reads to the requested
//!   length (with a warning), so callers always see a fixed-size page.
//! - Writes are retried until the full payload is persisted or an
//!   unrecoverable error surfaces; retries are bounded, never infinite.
//! - Errors carry the offset they occurred at.
//! - Integrity checks are advisory: a mismatch is logged, never fatal.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::BLOCK_SIZE;
use crate::error::{Error, Result};

/// Largest single transfer the store will accept (1 GiB)
const MAX_IO_SIZE: usize = 1024 * 1024 * 1024;

/// Attempts for a write that makes no progress before giving up
const WRITE_RETRY_LIMIT: u32 = 3;

/// Positioned-I/O adapter over one file opened read/write
pub struct BackingStore {
    file: File,
    path: PathBuf,
}

impl BackingStore {
    /// Open the backing file, creating it if missing and growing it to
    /// `min_size` bytes so every segment offset is addressable.
    pub fn open(path: impl AsRef<Path>, min_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::Internal(format!("failed to open {}: {}", path.display(), e)))?;

        let current = file
            .metadata()
            .map_err(|e| Error::Internal(format!("failed to stat {}: {}", path.display(), e)))?
            .len();
        if current < min_size {
            file.set_len(min_size)
                .map_err(|e| Error::Internal(format!("failed to size {}: {}", path.display(), e)))?;
            debug!(path = %path.display(), size = min_size, "grew backing file");
        }

        info!(path = %path.display(), size = min_size.max(current), "backing store opened");
        Ok(Self { file, path })
    }

    /// Path the store was opened with
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate(offset: u64, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::InvalidParameter("zero-length transfer".into()));
        }
        if len > MAX_IO_SIZE {
            return Err(Error::InvalidParameter(format!(
                "transfer of {} bytes exceeds 1 GiB limit",
                len
            )));
        }
        if offset % BLOCK_SIZE as u64 != 0 {
            return Err(Error::InvalidParameter(format!(
                "offset {} is not block-aligned",
                offset
            )));
        }
        Ok(())
    }

    /// Positioned read of `len` bytes at `offset`.
    ///
    /// A read past EOF is returned zero-padded to `len`, so the result is
    /// always exactly `len` bytes.
    pub fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        Self::validate(offset, len)?;

        let mut buf = vec![0u8; len];
        let mut filled = 0usize;
        while filled < len {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => {
                    // EOF: the tail of `buf` is already zeroed
                    warn!(
                        offset,
                        requested = len,
                        read = filled,
                        "short read, zero-padding remainder"
                    );
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io_at(offset, e)),
            }
        }
        Ok(Bytes::from(buf))
    }

    /// Positioned write of the full payload at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        Self::validate(offset, data.len())?;

        let mut written = 0usize;
        let mut stalls = 0u32;
        while written < data.len() {
            match self.file.write_at(&data[written..], offset + written as u64) {
                Ok(0) => {
                    stalls += 1;
                    if stalls >= WRITE_RETRY_LIMIT {
                        return Err(Error::io_at(
                            offset,
                            std::io::Error::new(
                                std::io::ErrorKind::WriteZero,
                                format!("write stalled after {} of {} bytes", written, data.len()),
                            ),
                        ));
                    }
                }
                Ok(n) => {
                    written += n;
                    stalls = 0;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io_at(offset, e)),
            }
        }
        Ok(())
    }

    /// Request a durable flush of all written data
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::io_at(0, e))
    }

    /// Resize the backing file
    pub fn truncate(&self, size: u64) -> Result<()> {
        self.file.set_len(size).map_err(|e| Error::io_at(size, e))
    }

    /// Current size of the backing file in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| Error::io_at(0, e))?
            .len())
    }

    /// FNV-1a hash of a data slice, used as an advisory integrity value
    pub fn checksum(data: &[u8]) -> u64 {
        const FNV_PRIME: u64 = 1099511628211;
        const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
        let mut hash = FNV_OFFSET_BASIS;
        for &byte in data {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    /// Re-read a range and compare its checksum against `expected`.
    ///
    /// A mismatch is logged and reported as `false`; it never aborts
    /// anything (integrity fields are advisory).
    pub fn verify_checksum(&self, offset: u64, len: usize, expected: u64) -> Result<bool> {
        let data = self.read(offset, len)?;
        let actual = Self::checksum(&data);
        if actual != expected {
            warn!(
                offset,
                expected,
                actual,
                "checksum mismatch, corruption suspected"
            );
            return Ok(false);
        }
        Ok(true)
    }
}
