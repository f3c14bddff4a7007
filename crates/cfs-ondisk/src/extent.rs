//! File extent chain layout.
//!
//! A file starts with a head block: `bs - 20` payload bytes followed by five
//! pointer slots. Slots 0..4 address pure data blocks; slot 4 addresses a
//! continuation block. A continuation block holds `bs/4 - 1` data pointers
//! and a final slot linking to the next continuation block. A zero pointer
//! ends the chain.

use cfs_types::{BlockNumber, POINTER_SIZE, ParseError, read_be_u32, write_be_u32};

/// Bytes at the end of the head block reserved for pointers.
pub const HEAD_POINTER_BYTES: u32 = 20;

/// Data pointers carried by the head block.
pub const HEAD_DATA_POINTERS: u32 = 4;

/// Geometry-dependent extent arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentLayout {
    block_size: u32,
}

impl ExtentLayout {
    #[must_use]
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    #[must_use]
    pub fn block_size(self) -> u32 {
        self.block_size
    }

    /// Payload bytes stored inline in the head block.
    #[must_use]
    pub fn head_payload(self) -> usize {
        (self.block_size - HEAD_POINTER_BYTES) as usize
    }

    /// Data pointers per continuation block.
    #[must_use]
    pub fn continuation_data_pointers(self) -> u32 {
        self.block_size / POINTER_SIZE - 1
    }

    /// Data pointer slots of a pointer block (head or continuation).
    #[must_use]
    pub fn data_slots(self, is_head: bool) -> u32 {
        if is_head {
            HEAD_DATA_POINTERS
        } else {
            self.continuation_data_pointers()
        }
    }

    /// Byte offset of pointer `slot` inside a pointer block.
    ///
    /// Slot `data_slots(is_head)` is the continuation link.
    #[must_use]
    pub fn slot_offset(self, is_head: bool, slot: u32) -> usize {
        let base = if is_head {
            self.head_payload()
        } else {
            0
        };
        base + (slot * POINTER_SIZE) as usize
    }

    /// Pure data blocks needed to hold `len` bytes.
    #[must_use]
    pub fn data_blocks_for(self, len: usize) -> u32 {
        let rest = len.saturating_sub(self.head_payload());
        u32::try_from(rest.div_ceil(self.block_size as usize)).unwrap_or(u32::MAX)
    }

    /// Continuation blocks needed to address `data_blocks` data blocks.
    #[must_use]
    pub fn continuation_blocks_for(self, data_blocks: u32) -> u32 {
        data_blocks
            .saturating_sub(HEAD_DATA_POINTERS)
            .div_ceil(self.continuation_data_pointers())
    }

    /// Every block a file of `len` bytes occupies, head included.
    #[must_use]
    pub fn total_blocks_for(self, len: usize) -> u32 {
        let data = self.data_blocks_for(len);
        1_u32
            .saturating_add(data)
            .saturating_add(self.continuation_blocks_for(data))
    }

    pub fn read_slot(self, block: &[u8], is_head: bool, slot: u32) -> Result<BlockNumber, ParseError> {
        read_be_u32(block, self.slot_offset(is_head, slot)).map(BlockNumber)
    }

    pub fn write_slot(
        self,
        block: &mut [u8],
        is_head: bool,
        slot: u32,
        target: BlockNumber,
    ) -> Result<(), ParseError> {
        write_be_u32(block, self.slot_offset(is_head, slot), target.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_counts_at_boundaries() {
        let layout = ExtentLayout::new(64);
        assert_eq!(layout.head_payload(), 44);
        assert_eq!(layout.continuation_data_pointers(), 15);

        assert_eq!(layout.total_blocks_for(0), 1);
        assert_eq!(layout.total_blocks_for(44), 1);
        assert_eq!(layout.total_blocks_for(45), 2);
        // Head plus four full data blocks, no continuation yet.
        assert_eq!(layout.total_blocks_for(44 + 4 * 64), 5);
        // Fifth data block forces the first continuation block.
        assert_eq!(layout.total_blocks_for(44 + 4 * 64 + 1), 7);
        // 4 + 15 data blocks fill exactly one continuation block.
        assert_eq!(layout.data_blocks_for(44 + 19 * 64), 19);
        assert_eq!(layout.continuation_blocks_for(19), 1);
        assert_eq!(layout.continuation_blocks_for(20), 2);
    }

    #[test]
    fn slot_offsets() {
        let layout = ExtentLayout::new(256);
        assert_eq!(layout.slot_offset(true, 0), 236);
        assert_eq!(layout.slot_offset(true, 4), 252);
        assert_eq!(layout.slot_offset(false, 0), 0);
        assert_eq!(layout.slot_offset(false, 63), 252);

        let mut block = vec![0_u8; 256];
        layout
            .write_slot(&mut block, true, 2, BlockNumber(513))
            .expect("write slot");
        assert_eq!(&block[244..248], &[0, 0, 2, 1]);
        assert_eq!(
            layout.read_slot(&block, true, 2).expect("read slot"),
            BlockNumber(513)
        );
    }
}
