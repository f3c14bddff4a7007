#![forbid(unsafe_code)]
//! Block and inode allocation.
//!
//! ## Design
//!
//! 1. **FreeList**: free blocks store the free list themselves. The head
//!    block's first four bytes link to the previous head; its remaining
//!    `bs/4 - 1` slots form a stack of further free block numbers, of which
//!    `fill` are valid. Only `head` and `fill` live outside the free blocks
//!    (in the superblock). Reuse order is LIFO.
//! 2. **InodeAllocator**: an in-memory stack of unused inode numbers, rebuilt
//!    at mount from the inode table. Lowest numbers are handed out first.
//!
//! Directory and extent code allocates through the [`BlockAllocator`] trait
//! so it can be exercised against simple test allocators.

use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_ondisk::{Superblock, corruption};
use cfs_types::{BlockNumber, Geometry, InodeNumber, POINTER_SIZE, read_be_u32, write_be_u32};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Source of free blocks for directory and extent chains.
pub trait BlockAllocator {
    /// Take one free block out of the pool.
    fn alloc_block(&mut self, dev: &dyn BlockDevice) -> Result<BlockNumber>;

    /// Return a block to the pool. The caller gives up ownership.
    fn free_block(&mut self, dev: &dyn BlockDevice, block: BlockNumber) -> Result<()>;
}

// ── Free-block list ─────────────────────────────────────────────────────────

/// Offset of stack slot `slot` (1-based) inside a free-list block.
fn slot_offset(slot: u32) -> usize {
    (slot * POINTER_SIZE) as usize
}

/// Allocator state for the self-hosted free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    head: BlockNumber,
    fill: u32,
    stack_slots: u32,
    capacity: u32,
}

impl FreeList {
    /// An empty list for a disk of this geometry.
    #[must_use]
    pub fn empty(geometry: Geometry) -> Self {
        Self {
            head: BlockNumber::NULL,
            fill: 0,
            stack_slots: geometry.pointers_per_block() - 1,
            capacity: geometry.capacity(),
        }
    }

    /// Resume the list persisted in a validated superblock.
    #[must_use]
    pub fn from_superblock(sb: &Superblock, geometry: Geometry) -> Self {
        Self {
            head: sb.free_list_head,
            fill: sb.free_list_fill,
            ..Self::empty(geometry)
        }
    }

    /// Copy the list position back into `sb` for persisting.
    pub fn store(&self, sb: &mut Superblock) {
        sb.free_list_head = self.head;
        sb.free_list_fill = self.fill;
    }

    #[must_use]
    pub fn head(&self) -> BlockNumber {
        self.head
    }

    #[must_use]
    pub fn fill(&self) -> u32 {
        self.fill
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.head.is_null()
    }

    /// Register every block of `blocks` as free, in order.
    pub fn seed(
        &mut self,
        dev: &dyn BlockDevice,
        blocks: impl IntoIterator<Item = BlockNumber>,
    ) -> Result<()> {
        for block in blocks {
            self.free(dev, block)?;
        }
        debug!(head = self.head.0, fill = self.fill, "free_list_seeded");
        Ok(())
    }

    fn check_block(&self, block: BlockNumber, source: BlockNumber) -> Result<BlockNumber> {
        if block.is_null() || block.0 >= self.capacity {
            return Err(CfsError::Corruption {
                block: source.0,
                detail: format!("free list holds invalid block number {}", block.0),
            });
        }
        Ok(block)
    }

    /// Pop one free block.
    pub fn allocate(&mut self, dev: &dyn BlockDevice) -> Result<BlockNumber> {
        if self.head.is_null() {
            return Err(CfsError::DiskFull);
        }
        let head_buf = dev.read_block(self.head)?;
        let bytes = head_buf.as_slice();

        if self.fill > 0 {
            let raw = read_be_u32(bytes, slot_offset(self.fill)).map_err(|e| corruption(self.head, &e))?;
            let block = self.check_block(BlockNumber(raw), self.head)?;
            self.fill -= 1;
            trace!(block = block.0, fill = self.fill, "free_block_pop");
            return Ok(block);
        }

        let taken = self.head;
        let prev = BlockNumber(read_be_u32(bytes, 0).map_err(|e| corruption(taken, &e))?);
        if prev.is_null() {
            self.head = BlockNumber::NULL;
            self.fill = 0;
        } else {
            self.head = self.check_block(prev, taken)?;
            self.fill = self.stack_slots;
        }
        trace!(block = taken.0, new_head = self.head.0, "free_block_take_head");
        Ok(taken)
    }

    /// Push `block` onto the list.
    pub fn free(&mut self, dev: &dyn BlockDevice, block: BlockNumber) -> Result<()> {
        if block.is_null() || block.0 >= self.capacity {
            return Err(CfsError::InvalidBlockNumber {
                block: block.0,
                capacity: self.capacity,
            });
        }

        if self.head.is_null() || self.fill == self.stack_slots {
            let mut buf = vec![0_u8; dev.block_size() as usize];
            write_be_u32(&mut buf, 0, self.head.0).map_err(|e| corruption(block, &e))?;
            dev.write_block(block, &buf)?;
            trace!(block = block.0, prev_head = self.head.0, "free_block_new_head");
            self.head = block;
            self.fill = 0;
            return Ok(());
        }

        let mut head_buf = dev.read_block(self.head)?;
        self.fill += 1;
        write_be_u32(head_buf.as_mut_slice(), slot_offset(self.fill), block.0)
            .map_err(|e| corruption(self.head, &e))?;
        dev.write_block(self.head, head_buf.as_slice())?;
        trace!(block = block.0, fill = self.fill, "free_block_push");
        Ok(())
    }

    /// Enumerate every free block, head first.
    ///
    /// Every list block below the head has a full stack.
    pub fn free_blocks(&self, dev: &dyn BlockDevice) -> Result<Vec<BlockNumber>> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut node = self.head;
        let mut fill = self.fill;
        while !node.is_null() {
            if !seen.insert(node) {
                return Err(CfsError::Corruption {
                    block: node.0,
                    detail: "free list contains a cycle".to_owned(),
                });
            }
            out.push(node);
            let buf = dev.read_block(node)?;
            for slot in 1..=fill {
                let raw =
                    read_be_u32(buf.as_slice(), slot_offset(slot)).map_err(|e| corruption(node, &e))?;
                out.push(self.check_block(BlockNumber(raw), node)?);
            }
            let prev = BlockNumber(read_be_u32(buf.as_slice(), 0).map_err(|e| corruption(node, &e))?);
            node = if prev.is_null() {
                prev
            } else {
                self.check_block(prev, node)?
            };
            fill = self.stack_slots;
        }
        Ok(out)
    }

    /// Number of free blocks.
    pub fn count_free(&self, dev: &dyn BlockDevice) -> Result<usize> {
        self.free_blocks(dev).map(|blocks| blocks.len())
    }
}

impl BlockAllocator for FreeList {
    fn alloc_block(&mut self, dev: &dyn BlockDevice) -> Result<BlockNumber> {
        self.allocate(dev)
    }

    fn free_block(&mut self, dev: &dyn BlockDevice, block: BlockNumber) -> Result<()> {
        self.free(dev, block)
    }
}

// ── Free-inode stack ────────────────────────────────────────────────────────

/// Stack of unused inode numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InodeAllocator {
    /// Top of stack is the last element.
    free: Vec<InodeNumber>,
}

impl InodeAllocator {
    /// Build from the set of free inodes found by scanning the table.
    #[must_use]
    pub fn rebuild(free: impl IntoIterator<Item = InodeNumber>) -> Self {
        let mut free: Vec<InodeNumber> = free
            .into_iter()
            .filter(|ino| *ino != InodeNumber::ROOT)
            .collect();
        free.sort_unstable_by(|a, b| b.cmp(a));
        free.dedup();
        Self { free }
    }

    /// Take the next unused inode.
    pub fn allocate(&mut self) -> Result<InodeNumber> {
        let ino = self.free.pop().ok_or(CfsError::NoFreeInodes)?;
        trace!(ino = ino.0, remaining = self.free.len(), "inode_alloc");
        Ok(ino)
    }

    /// Return `ino` to the stack. The caller resets its record.
    pub fn release(&mut self, ino: InodeNumber) {
        if ino == InodeNumber::ROOT || self.free.contains(&ino) {
            warn!(ino = ino.0, "inode_release_ignored");
            return;
        }
        self.free.push(ino);
        trace!(ino = ino.0, remaining = self.free.len(), "inode_release");
    }

    /// The inode the next `allocate` would return.
    #[must_use]
    pub fn peek(&self) -> Option<InodeNumber> {
        self.free.last().copied()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
