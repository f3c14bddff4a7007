//! Block 0: disk-wide parameters.

use cfs_types::{BlockNumber, Geometry, InodeNumber, ParseError, read_be_u32, write_be_u32};
use serde::{Deserialize, Serialize};

/// Bytes occupied by the superblock fields at the start of block 0.
pub const SUPERBLOCK_LEN: usize = 24;

const OFF_CAPACITY: usize = 0;
const OFF_BLOCK_SIZE: usize = 4;
const OFF_FREE_HEAD: usize = 8;
const OFF_FREE_FILL: usize = 12;
const OFF_NEXT_INODE: usize = 16;
const OFF_INODE_COUNT: usize = 20;

/// Decoded superblock.
///
/// `free_list_head` and `free_list_fill` are owned by the block allocator
/// while the disk is mounted and written back at unmount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub capacity: u32,
    pub block_size: u32,
    pub free_list_head: BlockNumber,
    pub free_list_fill: u32,
    pub next_inode: InodeNumber,
    pub inode_count: u32,
}

impl Superblock {
    /// Fresh superblock for a disk about to be formatted.
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            capacity: geometry.capacity(),
            block_size: geometry.block_size(),
            free_list_head: BlockNumber::NULL,
            free_list_fill: 0,
            next_inode: InodeNumber(1),
            inode_count: geometry.inode_count(),
        }
    }

    pub fn parse(block: &[u8]) -> Result<Self, ParseError> {
        if block.len() < SUPERBLOCK_LEN {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_LEN,
                offset: 0,
                actual: block.len(),
            });
        }
        Ok(Self {
            capacity: read_be_u32(block, OFF_CAPACITY)?,
            block_size: read_be_u32(block, OFF_BLOCK_SIZE)?,
            free_list_head: BlockNumber(read_be_u32(block, OFF_FREE_HEAD)?),
            free_list_fill: read_be_u32(block, OFF_FREE_FILL)?,
            next_inode: InodeNumber(read_be_u32(block, OFF_NEXT_INODE)?),
            inode_count: read_be_u32(block, OFF_INODE_COUNT)?,
        })
    }

    /// Encode into the first [`SUPERBLOCK_LEN`] bytes of `block`.
    pub fn write_to(&self, block: &mut [u8]) -> Result<(), ParseError> {
        write_be_u32(block, OFF_CAPACITY, self.capacity)?;
        write_be_u32(block, OFF_BLOCK_SIZE, self.block_size)?;
        write_be_u32(block, OFF_FREE_HEAD, self.free_list_head.0)?;
        write_be_u32(block, OFF_FREE_FILL, self.free_list_fill)?;
        write_be_u32(block, OFF_NEXT_INODE, self.next_inode.0)?;
        write_be_u32(block, OFF_INODE_COUNT, self.inode_count)?;
        Ok(())
    }

    /// Validate the stored fields against each other and return the geometry.
    pub fn validate(&self) -> Result<Geometry, ParseError> {
        let geometry = Geometry::new(self.capacity, self.block_size)?;
        if self.inode_count != geometry.inode_count() {
            return Err(ParseError::InvalidField {
                field: "inode_count",
                reason: "does not match geometry",
            });
        }
        if !geometry.contains(self.free_list_head) {
            return Err(ParseError::InvalidField {
                field: "free_list_head",
                reason: "beyond capacity",
            });
        }
        if self.free_list_fill >= geometry.pointers_per_block() {
            return Err(ParseError::InvalidField {
                field: "free_list_fill",
                reason: "exceeds free-list block slots",
            });
        }
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_layout_is_big_endian() {
        let geometry = Geometry::new(1024, 256).expect("geometry");
        let mut sb = Superblock::new(geometry);
        sb.free_list_head = BlockNumber(0x0102_0304);
        sb.free_list_fill = 7;

        let mut block = vec![0_u8; 256];
        sb.write_to(&mut block).expect("encode");
        assert_eq!(&block[0..4], &[0, 0, 4, 0]);
        assert_eq!(&block[4..8], &[0, 0, 1, 0]);
        assert_eq!(&block[8..12], &[1, 2, 3, 4]);
        assert_eq!(&block[12..16], &[0, 0, 0, 7]);
        assert_eq!(&block[16..20], &[0, 0, 0, 1]);
        assert_eq!(&block[20..24], &2621_u32.to_be_bytes());
        assert!(block[24..].iter().all(|b| *b == 0));

        let parsed = Superblock::parse(&block).expect("parse");
        assert_eq!(parsed, sb);
    }

    #[test]
    fn validate_rejects_inconsistent_fields() {
        let geometry = Geometry::new(64, 64).expect("geometry");
        let good = Superblock::new(geometry);
        assert_eq!(good.validate().expect("valid"), geometry);

        let mut bad_count = good;
        bad_count.inode_count += 1;
        assert!(bad_count.validate().is_err());

        let mut bad_head = good;
        bad_head.free_list_head = BlockNumber(64);
        assert!(bad_head.validate().is_err());

        let mut bad_fill = good;
        bad_fill.free_list_fill = 16;
        assert!(bad_fill.validate().is_err());

        let mut bad_geometry = good;
        bad_geometry.capacity = 100;
        assert!(bad_geometry.validate().is_err());
    }

    #[test]
    fn parse_rejects_short_block() {
        assert!(matches!(
            Superblock::parse(&[0_u8; 20]),
            Err(ParseError::InsufficientData { needed: 24, .. })
        ));
    }
}
