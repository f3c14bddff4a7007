#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `ByteDevice` and `BlockDevice` traits, a file-backed device
//! using positional reads and writes, and an in-memory device for tests and
//! scratch disks. There is no cache: every block call is exactly one
//! positioned transfer of `block_size` bytes.

use cfs_error::{CfsError, Result};
use cfs_types::BlockNumber;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Always exactly one block long for the device that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Flat byte store holding a whole disk image.
///
/// Every call names its own offset; implementations keep no cursor.
pub trait ByteDevice: Send + Sync {
    /// Image size in bytes. Fixed for the lifetime of the device.
    fn len_bytes(&self) -> u64;

    /// Fill `buf` from the image starting at `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Store `buf` into the image starting at `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Make earlier writes durable.
    fn sync(&self) -> Result<()>;
}

fn checked_end(offset: u64, len: usize, limit: u64, op: &str) -> Result<()> {
    let end = offset
        .checked_add(
            u64::try_from(len)
                .map_err(|_| CfsError::Format(format!("{op} length overflows u64")))?,
        )
        .ok_or_else(|| CfsError::Format(format!("{op} range overflows u64")))?;
    if end > limit {
        return Err(CfsError::Format(format!(
            "{op} out of bounds: offset={offset} len={len} device_len={limit}"
        )));
    }
    Ok(())
}

/// File-backed byte device.
///
/// Uses `std::os::unix::fs::FileExt`, so no shared seek position is kept.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open an existing image for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }

    /// Create a new zero-filled image of `len` bytes. Fails if `path` exists.
    pub fn create(path: impl AsRef<Path>, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.set_len(len)?;
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_end(offset, buf.len(), self.len, "read")?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        checked_end(offset, buf.len(), self.len, "write")?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory byte device.
///
/// Clones share the same bytes, so a test can keep a handle and inspect the
/// image after the disk that owns the other handle is unmounted.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0_u8; len])),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let limit = u64::try_from(bytes.len()).unwrap_or(0);
        checked_end(offset, buf.len(), limit, "read")?;
        let start =
            usize::try_from(offset).map_err(|_| CfsError::Format("offset overflow".into()))?;
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        drop(bytes);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let limit = u64::try_from(bytes.len()).unwrap_or(0);
        checked_end(offset, buf.len(), limit, "write")?;
        let start =
            usize::try_from(offset).map_err(|_| CfsError::Format("offset overflow".into()))?;
        bytes[start..start + buf.len()].copy_from_slice(buf);
        drop(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// The disk as seen by every layer above: `block_count` blocks of
/// `block_size` bytes, numbered from 0.
pub trait BlockDevice: Send + Sync {
    /// Read block `block` into `buf`.
    ///
    /// Fails with `InvalidBlockNumber` past the end of the device and with
    /// `SizeMismatch` unless `buf.len() == block_size()`.
    fn read_into(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()>;

    /// Overwrite block `block` with `data`; same checks as `read_into`.
    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()>;

    fn block_size(&self) -> u32;

    /// Capacity in blocks.
    fn block_count(&self) -> u32;

    fn sync(&self) -> Result<()>;

    /// Read a block into a freshly allocated buffer.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let mut buf = vec![0_u8; self.block_size() as usize];
        self.read_into(block, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }
}

/// Adapts a `ByteDevice` into fixed-size blocks.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u32,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(CfsError::Format(format!(
                "invalid block_size={block_size} (must be power of two)"
            )));
        }

        let len = inner.len_bytes();
        let block_size_u64 = u64::from(block_size);
        let remainder = len % block_size_u64;
        if remainder != 0 {
            return Err(CfsError::Format(format!(
                "image length is not block-aligned: len_bytes={len} block_size={block_size} remainder={remainder}"
            )));
        }
        let block_count = u32::try_from(len / block_size_u64).map_err(|_| {
            CfsError::Format(format!("image has more than u32::MAX blocks: len_bytes={len}"))
        })?;
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn check(&self, block: BlockNumber, len: usize) -> Result<u64> {
        if block.0 >= self.block_count {
            return Err(CfsError::InvalidBlockNumber {
                block: block.0,
                capacity: self.block_count,
            });
        }
        let expected = self.block_size as usize;
        if len != expected {
            return Err(CfsError::SizeMismatch {
                expected,
                actual: len,
            });
        }
        Ok(u64::from(block.0) * u64::from(self.block_size))
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_into(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        let offset = self.check(block, buf.len())?;
        self.inner.read_exact_at(offset, buf)
    }

    fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        let offset = self.check(block, data.len())?;
        self.inner.write_all_at(offset, data)
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}
