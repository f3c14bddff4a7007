#![forbid(unsafe_code)]
//! Error types for chainfs.
//!
//! # Error Taxonomy
//!
//! chainfs uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `cfs-types` | Byte-level decoding failures and geometry validation |
//! | Runtime | `CfsError` | `cfs-error` (this crate) | Errors returned by every storage operation, the CLI, and the shell |
//!
//! `cfs-error` does not depend on `cfs-types`. The `ParseError` → `CfsError`
//! conversion lives in `cfs-ondisk`, which knows both and can attach the
//! block number being decoded.
//!
//! ## Severity
//!
//! Lookup misses (`NotFound`), type mismatches (`NotADirectory`,
//! `NotAFile`), and name conflicts are recoverable: they abort the current
//! command and leave the disk untouched. `Io` and `Corruption` are fatal for
//! the mounted disk: the run that produced them can no longer be trusted.
//! See [`CfsError::is_fatal`].
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `Corruption` | `EIO` |
//! | `Format` | `EINVAL` |
//! | `ExistingStore` | `EEXIST` |
//! | `NoSuchStore` | `ENOENT` |
//! | `InvalidGeometry` | `EINVAL` |
//! | `InvalidBlockNumber` | `EINVAL` |
//! | `SizeMismatch` | `EINVAL` |
//! | `DiskFull` | `ENOSPC` |
//! | `NoFreeInodes` | `ENOSPC` |
//! | `NotFound` | `ENOENT` |
//! | `NotADirectory` | `ENOTDIR` |
//! | `NotAFile` | `EISDIR` |
//! | `NameInUse` | `EEXIST` |
//! | `NotEmpty` | `ENOTEMPTY` |
//! | `InvalidName` | `EINVAL` |

use thiserror::Error;

/// Unified error type for all chainfs operations.
#[derive(Debug, Error)]
pub enum CfsError {
    /// Operating system I/O error on the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk structure violates a layout invariant.
    ///
    /// The `block` field names the block whose contents were inconsistent.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u32, detail: String },

    /// Backing store cannot be interpreted as a disk image at all.
    #[error("invalid image format: {0}")]
    Format(String),

    /// `create` target already exists.
    #[error("disk already exists: {0}")]
    ExistingStore(String),

    /// `mount`/`delete` target does not exist.
    #[error("disk not found: {0}")]
    NoSuchStore(String),

    /// Capacity or block size rejected at creation or mount.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid block number {block} (capacity {capacity})")]
    InvalidBlockNumber { block: u32, capacity: u32 },

    /// Block buffer length differs from the disk's block size.
    #[error("block buffer size mismatch: got {actual}, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The free-block list is exhausted.
    #[error("disk is full")]
    DiskFull,

    /// Every inode record is in use.
    #[error("no free inodes")]
    NoFreeInodes,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    /// Directory already holds an entry with this name.
    #[error("name is already in use: {0}")]
    NameInUse(String),

    /// rmdir on a directory that still has entries.
    #[error("directory is not empty: {0}")]
    NotEmpty(String),

    /// Entry name is empty, not alphanumeric, or does not fit the entry block.
    #[error("invalid entry name {0:?}")]
    InvalidName(String),
}

impl CfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; a new variant does not compile until it is
    /// assigned an errno here.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_)
            | Self::InvalidGeometry(_)
            | Self::InvalidBlockNumber { .. }
            | Self::SizeMismatch { .. }
            | Self::InvalidName(_) => libc::EINVAL,
            Self::ExistingStore(_) | Self::NameInUse(_) => libc::EEXIST,
            Self::NoSuchStore(_) | Self::NotFound(_) => libc::ENOENT,
            Self::DiskFull | Self::NoFreeInodes => libc::ENOSPC,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::NotAFile(_) => libc::EISDIR,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
        }
    }

    /// Whether the error means the mounted disk can no longer be trusted.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Corruption { .. })
    }
}

/// Result alias using `CfsError`.
pub type Result<T> = std::result::Result<T, CfsError>;
