#![forbid(unsafe_code)]
//! File extent chains.
//!
//! Maps a file's byte stream onto its head block, pure data blocks, and
//! continuation pointer blocks (layout in [`cfs_ondisk::ExtentLayout`]).
//! The inode's `size` is authoritative: trailing bytes of the last data
//! block are ignored on read.
//!
//! ## Write staging
//!
//! [`write`] secures every block the new content needs before touching the
//! disk. Blocks of the existing chain are reused in traversal order (head
//! first) and only the shortfall is allocated. If allocation runs out, the
//! fresh blocks go back to the free list and the file is left exactly as it
//! was. Surplus blocks of a shrinking file are freed after the new chain
//! and inode are written.

use cfs_alloc::{BlockAllocator, InodeAllocator};
use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_inode::InodeTable;
use cfs_ondisk::{ExtentLayout, InodeKind, InodeRecord, corruption};
use cfs_types::{BlockNumber, InodeNumber};
use tracing::{debug, trace};

/// Read `ino`'s record, failing unless it is a file.
pub fn file_record(dev: &dyn BlockDevice, table: &InodeTable, ino: InodeNumber) -> Result<InodeRecord> {
    let record = table.get(dev, ino)?;
    if record.kind != InodeKind::File {
        return Err(CfsError::NotAFile(format!("inode {ino}")));
    }
    Ok(record)
}

fn has_chain(record: &InodeRecord) -> bool {
    !record.first_block.is_null() && !record.is_free()
}

fn checked_pointer(dev: &dyn BlockDevice, block: BlockNumber, holder: BlockNumber) -> Result<BlockNumber> {
    if block.0 >= dev.block_count() {
        return Err(CfsError::Corruption {
            block: holder.0,
            detail: format!("extent pointer {} beyond capacity {}", block.0, dev.block_count()),
        });
    }
    Ok(block)
}

/// Visit the chain rooted at `head` in traversal order.
///
/// `visit` receives each block and whether it holds file payload
/// (head and data blocks) together with its contents.
fn walk_chain(
    dev: &dyn BlockDevice,
    head: BlockNumber,
    mut visit: impl FnMut(BlockNumber, &[u8]) -> Result<()>,
) -> Result<()> {
    let layout = ExtentLayout::new(dev.block_size());
    let mut budget = dev.block_count();
    let mut pointer_block = head;
    let mut pointer_buf = dev.read_block(head)?;
    visit(head, pointer_buf.as_slice())?;
    let mut is_head = true;

    loop {
        for slot in 0..layout.data_slots(is_head) {
            let data = layout
                .read_slot(pointer_buf.as_slice(), is_head, slot)
                .map_err(|e| corruption(pointer_block, &e))?;
            if data.is_null() {
                return Ok(());
            }
            let data = checked_pointer(dev, data, pointer_block)?;
            budget = budget.checked_sub(1).ok_or_else(|| CfsError::Corruption {
                block: head.0,
                detail: "extent chain longer than the disk".to_owned(),
            })?;
            let buf = dev.read_block(data)?;
            visit(data, buf.as_slice())?;
        }

        let link_slot = layout.data_slots(is_head);
        let link = layout
            .read_slot(pointer_buf.as_slice(), is_head, link_slot)
            .map_err(|e| corruption(pointer_block, &e))?;
        if link.is_null() {
            return Ok(());
        }
        let link = checked_pointer(dev, link, pointer_block)?;
        budget = budget.checked_sub(1).ok_or_else(|| CfsError::Corruption {
            block: head.0,
            detail: "extent chain longer than the disk".to_owned(),
        })?;
        pointer_block = link;
        pointer_buf = dev.read_block(link)?;
        visit(link, &[])?;
        is_head = false;
    }
}

/// Every block of the chain rooted at `head`: head, then each pointer
/// block's data blocks followed by its continuation block.
pub fn chain_blocks(dev: &dyn BlockDevice, head: BlockNumber) -> Result<Vec<BlockNumber>> {
    let mut blocks = Vec::new();
    walk_chain(dev, head, |block, _| {
        blocks.push(block);
        Ok(())
    })?;
    Ok(blocks)
}

/// Full contents of file `ino`.
pub fn read(dev: &dyn BlockDevice, table: &InodeTable, ino: InodeNumber) -> Result<Vec<u8>> {
    let record = file_record(dev, table, ino)?;
    if !has_chain(&record) {
        return Ok(Vec::new());
    }
    let layout = ExtentLayout::new(dev.block_size());
    let size = record.size as usize;
    let mut out = Vec::with_capacity(size);
    let mut first = true;
    walk_chain(dev, record.first_block, |_, bytes| {
        if first {
            out.extend_from_slice(&bytes[..layout.head_payload()]);
            first = false;
        } else {
            // Continuation blocks are visited with an empty payload.
            out.extend_from_slice(bytes);
        }
        Ok(())
    })?;

    if out.len() < size {
        return Err(CfsError::Corruption {
            block: record.first_block.0,
            detail: format!("extent chain holds {} bytes, inode size is {size}", out.len()),
        });
    }
    out.truncate(size);
    Ok(out)
}

/// Lay `bytes` out over `blocks` (traversal order, head first).
fn write_chain(dev: &dyn BlockDevice, blocks: &[BlockNumber], bytes: &[u8]) -> Result<()> {
    let layout = ExtentLayout::new(dev.block_size());
    let bs = dev.block_size() as usize;
    let mut blocks = blocks.iter().copied();
    let mut next_block = |holder: BlockNumber| {
        blocks.next().ok_or_else(|| CfsError::Corruption {
            block: holder.0,
            detail: "extent plan ran out of blocks".to_owned(),
        })
    };

    let head = next_block(BlockNumber::NULL)?;
    let head_len = bytes.len().min(layout.head_payload());
    let mut pointer_block = head;
    let mut pointer_buf = vec![0_u8; bs];
    pointer_buf[..head_len].copy_from_slice(&bytes[..head_len]);
    let mut is_head = true;
    let mut slot = 0;

    let mut data_buf = vec![0_u8; bs];
    for chunk in bytes[head_len..].chunks(bs) {
        if slot == layout.data_slots(is_head) {
            let cont = next_block(pointer_block)?;
            layout
                .write_slot(&mut pointer_buf, is_head, slot, cont)
                .map_err(|e| corruption(pointer_block, &e))?;
            dev.write_block(pointer_block, &pointer_buf)?;
            trace!(block = cont.0, after = pointer_block.0, "extent_continuation");
            pointer_block = cont;
            pointer_buf.fill(0);
            is_head = false;
            slot = 0;
        }

        let data = next_block(pointer_block)?;
        layout
            .write_slot(&mut pointer_buf, is_head, slot, data)
            .map_err(|e| corruption(pointer_block, &e))?;
        slot += 1;

        data_buf.fill(0);
        data_buf[..chunk.len()].copy_from_slice(chunk);
        dev.write_block(data, &data_buf)?;
    }

    dev.write_block(pointer_block, &pointer_buf)
}

/// Replace the contents of file `ino` with `bytes`.
///
/// See the module docs for the staging guarantees.
pub fn write(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    ino: InodeNumber,
    bytes: &[u8],
) -> Result<()> {
    let record = file_record(dev, table, ino)?;
    let size = u32::try_from(bytes.len()).map_err(|_| CfsError::DiskFull)?;
    let layout = ExtentLayout::new(dev.block_size());
    let needed = layout.total_blocks_for(bytes.len()) as usize;

    let mut blocks = if has_chain(&record) {
        chain_blocks(dev, record.first_block)?
    } else {
        Vec::new()
    };
    let surplus = if blocks.len() > needed {
        blocks.split_off(needed)
    } else {
        Vec::new()
    };

    let reused = blocks.len();
    while blocks.len() < needed {
        match alloc.alloc_block(dev) {
            Ok(block) => blocks.push(block),
            Err(err) => {
                for block in blocks.drain(reused..).rev() {
                    alloc.free_block(dev, block)?;
                }
                debug!(ino = ino.0, size, needed, "extent_write_aborted");
                return Err(err);
            }
        }
    }

    write_chain(dev, &blocks, bytes)?;
    table.set(
        dev,
        ino,
        InodeRecord {
            kind: InodeKind::File,
            size,
            first_block: blocks[0],
        },
    )?;
    for block in surplus.iter().copied() {
        alloc.free_block(dev, block)?;
    }
    debug!(
        ino = ino.0,
        size,
        blocks = needed,
        reused,
        freed = surplus.len(),
        "extent_write"
    );
    Ok(())
}

/// Free every block of `ino`'s chain in traversal order and return the inode
/// to the free stack.
pub fn truncate_and_free(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    inodes: &mut InodeAllocator,
    ino: InodeNumber,
) -> Result<()> {
    let record = file_record(dev, table, ino)?;
    let blocks = if has_chain(&record) {
        chain_blocks(dev, record.first_block)?
    } else {
        Vec::new()
    };
    for block in &blocks {
        alloc.free_block(dev, *block)?;
    }
    table.release(dev, inodes, ino)?;
    debug!(ino = ino.0, freed = blocks.len(), "extent_truncate");
    Ok(())
}

/// Append `extra` to file `ino`. The whole chain is rewritten.
pub fn append(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    ino: InodeNumber,
    extra: &[u8],
) -> Result<()> {
    let mut content = read(dev, table, ino)?;
    content.extend_from_slice(extra);
    write(dev, table, alloc, ino, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_alloc::FreeList;
    use cfs_block::{ByteBlockDevice, MemoryByteDevice};
    use cfs_types::Geometry;
    use proptest::prelude::*;

    struct Fixture {
        dev: ByteBlockDevice<MemoryByteDevice>,
        table: InodeTable,
        alloc: FreeList,
        inodes: InodeAllocator,
    }

    impl Fixture {
        fn new(capacity: u32, block_size: u32) -> Self {
            let geometry = Geometry::new(capacity, block_size).expect("geometry");
            let mem = MemoryByteDevice::new(geometry.image_len() as usize);
            let dev = ByteBlockDevice::new(mem, block_size).expect("device");
            let table = InodeTable::new(geometry);
            table.format(&dev).expect("format");
            let inodes = InodeAllocator::rebuild(table.scan_free(&dev).expect("scan"));
            let mut alloc = FreeList::empty(geometry);
            alloc
                .seed(
                    &dev,
                    (geometry.first_data_block().0..capacity).map(BlockNumber),
                )
                .expect("seed");
            Self {
                dev,
                table,
                alloc,
                inodes,
            }
        }

        fn new_file(&mut self) -> InodeNumber {
            self.table
                .allocate(
                    &self.dev,
                    &mut self.inodes,
                    InodeRecord {
                        kind: InodeKind::File,
                        size: 0,
                        first_block: BlockNumber::NULL,
                    },
                )
                .expect("inode")
        }

        fn free_count(&self) -> usize {
            self.alloc.count_free(&self.dev).expect("count")
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect()
    }

    #[test]
    fn round_trip_across_layout_boundaries() {
        // 32-byte blocks: 12 inline bytes, 7 data pointers per continuation.
        let mut fx = Fixture::new(512, 32);
        let hp = 12;
        let bs = 32;
        for len in [
            0,
            hp - 1,
            hp,
            hp + 1,
            hp + 4 * bs,
            hp + 4 * bs + 1,
            hp + 11 * bs,
            hp + 11 * bs + 1,
            hp + 25 * bs + 17,
        ] {
            let ino = fx.new_file();
            let data = pattern(len);
            write(&fx.dev, &fx.table, &mut fx.alloc, ino, &data).expect("write");
            assert_eq!(read(&fx.dev, &fx.table, ino).expect("read"), data, "len {len}");
            let record = fx.table.get(&fx.dev, ino).expect("record");
            assert_eq!(record.size as usize, len);
            let layout = ExtentLayout::new(32);
            assert_eq!(
                chain_blocks(&fx.dev, record.first_block).expect("chain").len(),
                layout.total_blocks_for(len) as usize,
                "len {len}"
            );
        }
    }

    #[test]
    fn chain_is_visited_head_data_then_continuation() {
        let mut fx = Fixture::new(256, 32);
        let ino = fx.new_file();
        // 12 inline + 5 data blocks: head, d1..d4, continuation, d5.
        write(&fx.dev, &fx.table, &mut fx.alloc, ino, &pattern(12 + 5 * 32)).expect("write");
        let record = fx.table.get(&fx.dev, ino).expect("record");
        let chain = chain_blocks(&fx.dev, record.first_block).expect("chain");
        assert_eq!(chain.len(), 7);

        let layout = ExtentLayout::new(32);
        let head = fx.dev.read_block(chain[0]).expect("head");
        for slot in 0..4 {
            assert_eq!(
                layout.read_slot(head.as_slice(), true, slot).expect("slot"),
                chain[1 + slot as usize]
            );
        }
        assert_eq!(layout.read_slot(head.as_slice(), true, 4).expect("link"), chain[5]);
        let cont = fx.dev.read_block(chain[5]).expect("continuation");
        assert_eq!(layout.read_slot(cont.as_slice(), false, 0).expect("slot"), chain[6]);
        assert!(layout.read_slot(cont.as_slice(), false, 1).expect("end").is_null());
    }

    #[test]
    fn rewrite_reuses_head_and_frees_surplus() {
        let mut fx = Fixture::new(256, 32);
        let ino = fx.new_file();
        let baseline = fx.free_count();

        write(&fx.dev, &fx.table, &mut fx.alloc, ino, &pattern(400)).expect("long");
        let long = fx.table.get(&fx.dev, ino).expect("record");
        let long_blocks = ExtentLayout::new(32).total_blocks_for(400) as usize;
        assert_eq!(fx.free_count(), baseline - long_blocks);

        write(&fx.dev, &fx.table, &mut fx.alloc, ino, b"short").expect("short");
        let short = fx.table.get(&fx.dev, ino).expect("record");
        assert_eq!(short.first_block, long.first_block);
        assert_eq!(short.size, 5);
        assert_eq!(fx.free_count(), baseline - 1);
        assert_eq!(read(&fx.dev, &fx.table, ino).expect("read"), b"short");
    }

    #[test]
    fn truncate_returns_every_block_and_inode() {
        let mut fx = Fixture::new(256, 32);
        let baseline = fx.free_count();
        let free_inodes = fx.inodes.free_count();
        let ino = fx.new_file();
        write(&fx.dev, &fx.table, &mut fx.alloc, ino, &pattern(700)).expect("write");
        assert!(fx.free_count() < baseline);

        truncate_and_free(&fx.dev, &fx.table, &mut fx.alloc, &mut fx.inodes, ino).expect("truncate");
        assert_eq!(fx.free_count(), baseline);
        assert_eq!(fx.inodes.free_count(), free_inodes);
        assert!(fx.table.get(&fx.dev, ino).expect("record").is_free());
    }

    #[test]
    fn disk_full_leaves_file_untouched() {
        let mut fx = Fixture::new(64, 32);
        let ino = fx.new_file();
        write(&fx.dev, &fx.table, &mut fx.alloc, ino, b"keep me").expect("write");
        let record = fx.table.get(&fx.dev, ino).expect("record");
        let free_before = fx.free_count();

        let too_big = pattern(12 + 64 * 32);
        let err = write(&fx.dev, &fx.table, &mut fx.alloc, ino, &too_big).expect_err("full");
        assert!(matches!(err, CfsError::DiskFull));
        assert_eq!(fx.table.get(&fx.dev, ino).expect("record"), record);
        assert_eq!(read(&fx.dev, &fx.table, ino).expect("read"), b"keep me");
        assert_eq!(fx.free_count(), free_before);
    }

    #[test]
    fn append_concatenates() {
        let mut fx = Fixture::new(256, 32);
        let ino = fx.new_file();
        write(&fx.dev, &fx.table, &mut fx.alloc, ino, b"hello").expect("write");
        append(&fx.dev, &fx.table, &mut fx.alloc, ino, b" world, this spills into data blocks")
            .expect("append");
        assert_eq!(
            read(&fx.dev, &fx.table, ino).expect("read"),
            b"hello world, this spills into data blocks"
        );
    }

    #[test]
    fn directory_inode_is_not_a_file() {
        let mut fx = Fixture::new(64, 32);
        assert!(matches!(
            read(&fx.dev, &fx.table, InodeNumber::ROOT),
            Err(CfsError::NotAFile(_))
        ));
        assert!(matches!(
            write(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, b"x"),
            Err(CfsError::NotAFile(_))
        ));
    }

    #[test]
    fn short_chain_is_corruption() {
        let mut fx = Fixture::new(64, 32);
        let ino = fx.new_file();
        write(&fx.dev, &fx.table, &mut fx.alloc, ino, b"abc").expect("write");
        fx.table.set_size(&fx.dev, ino, 500).expect("size");
        assert!(matches!(
            read(&fx.dev, &fx.table, ino),
            Err(CfsError::Corruption { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn rewrites_round_trip_and_conserve_blocks(lens in proptest::collection::vec(0_usize..3000, 1..6)) {
            let mut fx = Fixture::new(1024, 64);
            let ino = fx.new_file();
            let baseline = fx.free_count();
            let layout = ExtentLayout::new(64);

            for len in lens {
                let data = pattern(len);
                write(&fx.dev, &fx.table, &mut fx.alloc, ino, &data).expect("write");
                prop_assert_eq!(read(&fx.dev, &fx.table, ino).expect("read"), data);
                prop_assert_eq!(
                    fx.free_count(),
                    baseline - layout.total_blocks_for(len) as usize
                );
            }
        }
    }
}
