#![forbid(unsafe_code)]
//! Inode table.
//!
//! `inode_count` 9-byte records packed `block_size / 9` per block starting
//! at block 1. Records never straddle blocks; the tail of each table block
//! is unused. Every update is a read-modify-write of the one block holding
//! the record.

use cfs_alloc::InodeAllocator;
use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_ondisk::{InodeKind, InodeRecord, corruption};
use cfs_types::{BlockNumber, Geometry, INODE_RECORD_SIZE, InodeNumber};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeTable {
    geometry: Geometry,
}

impl InodeTable {
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry }
    }

    #[must_use]
    pub fn inode_count(&self) -> u32 {
        self.geometry.inode_count()
    }

    /// Block and byte offset holding `ino`.
    fn locate(&self, ino: InodeNumber) -> Result<(BlockNumber, usize)> {
        if ino.0 >= self.inode_count() {
            return Err(CfsError::Corruption {
                block: BlockNumber::INODE_TABLE_START.0,
                detail: format!(
                    "inode {} out of range (inode_count {})",
                    ino.0,
                    self.inode_count()
                ),
            });
        }
        let per_block = self.geometry.inodes_per_block();
        let block = BlockNumber(BlockNumber::INODE_TABLE_START.0 + ino.0 / per_block);
        let offset = ((ino.0 % per_block) * INODE_RECORD_SIZE) as usize;
        Ok((block, offset))
    }

    pub fn get(&self, dev: &dyn BlockDevice, ino: InodeNumber) -> Result<InodeRecord> {
        let (block, offset) = self.locate(ino)?;
        let buf = dev.read_block(block)?;
        InodeRecord::parse(&buf.as_slice()[offset..]).map_err(|e| corruption(block, &e))
    }

    /// Overwrite the whole record. The type byte is always rewritten along
    /// with size and first block.
    pub fn set(&self, dev: &dyn BlockDevice, ino: InodeNumber, record: InodeRecord) -> Result<()> {
        let (block, offset) = self.locate(ino)?;
        let mut buf = dev.read_block(block)?;
        buf.as_mut_slice()[offset..offset + INODE_RECORD_SIZE as usize]
            .copy_from_slice(&record.encode());
        dev.write_block(block, buf.as_slice())?;
        trace!(
            ino = ino.0,
            kind = ?record.kind,
            size = record.size,
            first_block = record.first_block.0,
            "inode_write"
        );
        Ok(())
    }

    pub fn set_size(&self, dev: &dyn BlockDevice, ino: InodeNumber, size: u32) -> Result<()> {
        let record = self.get(dev, ino)?;
        self.set(dev, ino, InodeRecord { size, ..record })
    }

    pub fn set_first_block(
        &self,
        dev: &dyn BlockDevice,
        ino: InodeNumber,
        first_block: BlockNumber,
    ) -> Result<()> {
        let record = self.get(dev, ino)?;
        self.set(dev, ino, InodeRecord { first_block, ..record })
    }

    pub fn mark_as_directory(&self, dev: &dyn BlockDevice, ino: InodeNumber) -> Result<()> {
        let record = self.get(dev, ino)?;
        self.set(
            dev,
            ino,
            InodeRecord {
                kind: InodeKind::Directory,
                ..record
            },
        )
    }

    /// Write the initial table: root is an empty directory, the rest free.
    pub fn format(&self, dev: &dyn BlockDevice) -> Result<()> {
        let per_block = self.geometry.inodes_per_block();
        let record_len = INODE_RECORD_SIZE as usize;
        let mut ino = 0_u32;
        let mut block = BlockNumber::INODE_TABLE_START;
        while ino < self.inode_count() {
            let mut buf = vec![0_u8; self.geometry.block_len()];
            for slot in 0..per_block {
                if ino >= self.inode_count() {
                    break;
                }
                let record = if ino == InodeNumber::ROOT.0 {
                    InodeRecord::EMPTY_DIR
                } else {
                    InodeRecord::FREE
                };
                let off = slot as usize * record_len;
                buf[off..off + record_len].copy_from_slice(&record.encode());
                ino += 1;
            }
            dev.write_block(block, &buf)?;
            block = BlockNumber(block.0 + 1);
        }
        debug!(inode_count = self.inode_count(), "inode_table_formatted");
        Ok(())
    }

    /// Every inode currently holding the free sentinel.
    pub fn scan_free(&self, dev: &dyn BlockDevice) -> Result<Vec<InodeNumber>> {
        let per_block = self.geometry.inodes_per_block();
        let record_len = INODE_RECORD_SIZE as usize;
        let mut free = Vec::new();
        let mut ino = 0_u32;
        let mut block = BlockNumber::INODE_TABLE_START;
        while ino < self.inode_count() {
            let buf = dev.read_block(block)?;
            for slot in 0..per_block {
                if ino >= self.inode_count() {
                    break;
                }
                let off = slot as usize * record_len;
                let record = InodeRecord::parse(&buf.as_slice()[off..])
                    .map_err(|e| corruption(block, &e))?;
                if record.is_free() && ino != InodeNumber::ROOT.0 {
                    free.push(InodeNumber(ino));
                }
                ino += 1;
            }
            block = BlockNumber(block.0 + 1);
        }
        Ok(free)
    }

    /// Take a free inode and write `record` into it.
    pub fn allocate(
        &self,
        dev: &dyn BlockDevice,
        inodes: &mut InodeAllocator,
        record: InodeRecord,
    ) -> Result<InodeNumber> {
        let ino = inodes.allocate()?;
        if let Err(err) = self.set(dev, ino, record) {
            inodes.release(ino);
            return Err(err);
        }
        debug!(ino = ino.0, kind = ?record.kind, "inode_allocated");
        Ok(ino)
    }

    /// Reset `ino` to the free sentinel and return it to the stack.
    pub fn release(
        &self,
        dev: &dyn BlockDevice,
        inodes: &mut InodeAllocator,
        ino: InodeNumber,
    ) -> Result<()> {
        self.set(dev, ino, InodeRecord::FREE)?;
        inodes.release(ino);
        debug!(ino = ino.0, "inode_released");
        Ok(())
    }
}
