#![forbid(unsafe_code)]
//! Shared vocabulary for chainfs: block and inode newtypes, validated disk
//! geometry, and the big-endian field helpers every on-disk codec uses.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Smallest block size that still fits a 9-byte inode record, a directory
/// entry with a usable name field, and a file head with its pointer tail.
pub const MIN_BLOCK_SIZE: u32 = 32;

/// Largest supported block size.
pub const MAX_BLOCK_SIZE: u32 = 65_536;

/// Size of one packed inode record (type + size + first block).
pub const INODE_RECORD_SIZE: u32 = 9;

/// Byte width of every on-disk pointer and counter.
pub const POINTER_SIZE: u32 = 4;

/// Default geometry used by the CLI when none is given.
pub const DEFAULT_CAPACITY: u32 = 1024;
pub const DEFAULT_BLOCK_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

impl BlockNumber {
    /// Chain terminator / "no block" marker.
    pub const NULL: Self = Self(0);
    /// Block holding the superblock fields.
    pub const SUPERBLOCK: Self = Self(0);
    /// First block of the inode table.
    pub const INODE_TABLE_START: Self = Self(1);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    /// The permanent root directory.
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated disk geometry.
///
/// Both dimensions are powers of two and never change after creation. All
/// derived layout values (inode count, inode table span, first data block)
/// are pure functions of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    capacity: u32,
    block_size: u32,
}

impl Geometry {
    /// Validate a `(capacity, block_size)` pair.
    pub fn new(capacity: u32, block_size: u32) -> Result<Self, ParseError> {
        if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
        {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a power of two in 32..=65536",
            });
        }
        if !capacity.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "capacity",
                reason: "must be a power of two",
            });
        }

        let geometry = Self {
            capacity,
            block_size,
        };
        let inode_count = geometry.try_inode_count()?;
        if inode_count == 0 {
            return Err(ParseError::InvalidField {
                field: "capacity",
                reason: "disk too small to hold the root inode",
            });
        }
        if geometry.first_data_block().0 >= capacity {
            return Err(ParseError::InvalidField {
                field: "capacity",
                reason: "inode table leaves no room for data blocks",
            });
        }
        Ok(geometry)
    }

    #[must_use]
    pub fn capacity(self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn block_size(self) -> u32 {
        self.block_size
    }

    /// `block_size` as a buffer length.
    #[must_use]
    pub fn block_len(self) -> usize {
        self.block_size as usize
    }

    /// Total image length in bytes.
    #[must_use]
    pub fn image_len(self) -> u64 {
        u64::from(self.capacity) * u64::from(self.block_size)
    }

    /// Inode records packed into one inode-table block.
    #[must_use]
    pub fn inodes_per_block(self) -> u32 {
        self.block_size / INODE_RECORD_SIZE
    }

    /// One inode per hundred bytes of raw capacity, rounded down.
    #[must_use]
    pub fn inode_count(self) -> u32 {
        // Validated in `new`.
        self.try_inode_count().unwrap_or(0)
    }

    fn try_inode_count(self) -> Result<u32, ParseError> {
        u32::try_from(self.image_len() / 100).map_err(|_| ParseError::IntegerConversion {
            field: "inode_count",
        })
    }

    /// Blocks reserved for the inode table, including one spare block.
    #[must_use]
    pub fn inode_table_blocks(self) -> u32 {
        self.inode_count().div_ceil(self.inodes_per_block()) + 1
    }

    /// First block handed to the free list at format time.
    #[must_use]
    pub fn first_data_block(self) -> BlockNumber {
        BlockNumber(BlockNumber::INODE_TABLE_START.0 + self.inode_table_blocks())
    }

    /// Number of four-byte slots in one block.
    #[must_use]
    pub fn pointers_per_block(self) -> u32 {
        self.block_size / POINTER_SIZE
    }

    /// Whether `block` addresses a block of this disk.
    #[must_use]
    pub fn contains(self, block: BlockNumber) -> bool {
        block.0 < self.capacity
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn ensure_slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    let actual = data.len().saturating_sub(offset);
    data.get_mut(offset..end)
        .ok_or(ParseError::InsufficientData {
            needed: len,
            offset,
            actual,
        })
}

#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_be_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_be_bytes());
    Ok(())
}
