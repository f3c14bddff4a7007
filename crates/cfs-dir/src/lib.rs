#![forbid(unsafe_code)]
//! Directory operations.
//!
//! A directory is a singly linked chain of entry blocks, one entry per
//! block, in insertion order. The directory inode's `first_block` points at
//! the head and its `size` holds the entry count. Lookups are linear scans.
//! Every removal goes through one excision step that rewrites either the
//! inode's head pointer or the predecessor's next pointer.

use cfs_alloc::BlockAllocator;
use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_inode::InodeTable;
use cfs_ondisk::{
    DirEntry, InodeRecord, corruption, decode_entry, encode_entry, set_entry_next,
    validate_entry_name,
};
use cfs_types::{BlockNumber, InodeNumber};
use tracing::{debug, trace};

/// Directory entry together with the block that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedEntry {
    pub block: BlockNumber,
    pub entry: DirEntry,
}

/// Read `dir`'s record, failing unless it is a directory.
pub fn dir_record(dev: &dyn BlockDevice, table: &InodeTable, dir: InodeNumber) -> Result<InodeRecord> {
    let record = table.get(dev, dir)?;
    if !record.is_dir() {
        return Err(CfsError::NotADirectory(format!("inode {dir}")));
    }
    Ok(record)
}

/// Lazy walk over a directory's entry chain.
///
/// Finite: a chain longer than the device is reported as corruption rather
/// than followed forever.
pub struct Entries<'a> {
    dev: &'a dyn BlockDevice,
    next: BlockNumber,
    budget: u32,
    failed: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<LocatedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next.is_null() {
            return None;
        }
        let block = self.next;
        if self.budget == 0 {
            self.failed = true;
            return Some(Err(CfsError::Corruption {
                block: block.0,
                detail: "directory chain longer than the disk".to_owned(),
            }));
        }
        self.budget -= 1;

        let result = self.dev.read_block(block).and_then(|buf| {
            decode_entry(buf.as_slice()).map_err(|e| corruption(block, &e))
        });
        match result {
            Ok(entry) => {
                self.next = entry.next;
                Some(Ok(LocatedEntry { block, entry }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Start a walk over `dir`'s entries.
pub fn entries<'a>(
    dev: &'a dyn BlockDevice,
    table: &InodeTable,
    dir: InodeNumber,
) -> Result<Entries<'a>> {
    let record = dir_record(dev, table, dir)?;
    Ok(Entries {
        dev,
        next: record.first_block,
        budget: dev.block_count(),
        failed: false,
    })
}

/// Entry names in insertion order.
pub fn list(dev: &dyn BlockDevice, table: &InodeTable, dir: InodeNumber) -> Result<Vec<String>> {
    entries(dev, table, dir)?
        .map(|item| item.map(|located| located.entry.name))
        .collect()
}

/// Child inode for `name`, if present.
pub fn lookup(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    dir: InodeNumber,
    name: &str,
) -> Result<Option<InodeNumber>> {
    for item in entries(dev, table, dir)? {
        let located = item?;
        if located.entry.name == name {
            return Ok(Some(located.entry.child));
        }
    }
    Ok(None)
}

/// Child inode for `name`, or `NotFound`.
pub fn find(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    dir: InodeNumber,
    name: &str,
) -> Result<InodeNumber> {
    lookup(dev, table, dir, name)?.ok_or_else(|| CfsError::NotFound(name.to_owned()))
}

/// Link a new entry `name -> child` at the tail of `dir`'s chain.
///
/// Returns the block holding the new entry.
pub fn append(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    dir: InodeNumber,
    name: &str,
    child: InodeNumber,
) -> Result<BlockNumber> {
    validate_entry_name(name, dev.block_size())?;
    let record = dir_record(dev, table, dir)?;

    let mut tail = None;
    for item in entries(dev, table, dir)? {
        let located = item?;
        if located.entry.name == name {
            return Err(CfsError::NameInUse(name.to_owned()));
        }
        tail = Some(located.block);
    }

    let block = alloc.alloc_block(dev)?;
    let mut buf = vec![0_u8; dev.block_size() as usize];
    encode_entry(&mut buf, name, child, BlockNumber::NULL).map_err(|e| corruption(block, &e))?;
    dev.write_block(block, &buf)?;

    let first_block = match tail {
        Some(tail) => {
            let mut tail_buf = dev.read_block(tail)?;
            set_entry_next(tail_buf.as_mut_slice(), block).map_err(|e| corruption(tail, &e))?;
            dev.write_block(tail, tail_buf.as_slice())?;
            record.first_block
        }
        None => block,
    };
    table.set(
        dev,
        dir,
        InodeRecord {
            size: record.size + 1,
            first_block,
            ..record
        },
    )?;
    debug!(dir = dir.0, name, child = child.0, block = block.0, "dir_entry_append");
    Ok(block)
}

/// Remove the entry called `name` from `dir`, free its block, and return
/// the child inode it referenced.
///
/// A miss fails with `NotFound` and writes nothing.
pub fn remove(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    dir: InodeNumber,
    name: &str,
) -> Result<InodeNumber> {
    let mut prev = None;
    for item in entries(dev, table, dir)? {
        let located = item?;
        if located.entry.name == name {
            let child = located.entry.child;
            unlink(dev, table, alloc, dir, prev, &located)?;
            return Ok(child);
        }
        prev = Some(located.block);
    }
    Err(CfsError::NotFound(name.to_owned()))
}

/// Excise `target` from the chain given its predecessor (`None` for the
/// head), free its block, and decrement the entry count.
fn unlink(
    dev: &dyn BlockDevice,
    table: &InodeTable,
    alloc: &mut dyn BlockAllocator,
    dir: InodeNumber,
    prev: Option<BlockNumber>,
    target: &LocatedEntry,
) -> Result<()> {
    let record = dir_record(dev, table, dir)?;
    let next = target.entry.next;

    let first_block = match prev {
        None => next,
        Some(prev) => {
            let mut prev_buf = dev.read_block(prev)?;
            set_entry_next(prev_buf.as_mut_slice(), next).map_err(|e| corruption(prev, &e))?;
            dev.write_block(prev, prev_buf.as_slice())?;
            record.first_block
        }
    };
    let size = record.size.checked_sub(1).ok_or_else(|| CfsError::Corruption {
        block: target.block.0,
        detail: format!("directory inode {dir} has an entry but a zero entry count"),
    })?;
    let first_block = if size == 0 {
        BlockNumber::NULL
    } else {
        first_block
    };
    table.set(
        dev,
        dir,
        InodeRecord {
            size,
            first_block,
            ..record
        },
    )?;
    alloc.free_block(dev, target.block)?;
    trace!(
        dir = dir.0,
        block = target.block.0,
        prev = prev.map_or(0, |b| b.0),
        next = next.0,
        "dir_entry_unlink"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_alloc::FreeList;
    use cfs_block::{ByteBlockDevice, MemoryByteDevice};
    use cfs_ondisk::InodeKind;
    use cfs_types::Geometry;

    struct Fixture {
        mem: MemoryByteDevice,
        dev: ByteBlockDevice<MemoryByteDevice>,
        table: InodeTable,
        alloc: FreeList,
    }

    fn fixture() -> Fixture {
        let geometry = Geometry::new(128, 32).expect("geometry");
        let mem = MemoryByteDevice::new(geometry.image_len() as usize);
        let dev = ByteBlockDevice::new(mem.clone(), 32).expect("device");
        let table = InodeTable::new(geometry);
        table.format(&dev).expect("format");
        let mut alloc = FreeList::empty(geometry);
        alloc
            .seed(
                &dev,
                (geometry.first_data_block().0..128).map(BlockNumber),
            )
            .expect("seed");
        Fixture {
            mem,
            dev,
            table,
            alloc,
        }
    }

    fn root_with(fx: &mut Fixture, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            let child = InodeNumber(u32::try_from(i).expect("index") + 10);
            append(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, name, child)
                .expect("append");
        }
    }

    fn root(fx: &Fixture) -> InodeRecord {
        fx.table.get(&fx.dev, InodeNumber::ROOT).expect("root")
    }

    #[test]
    fn append_links_in_insertion_order() {
        let mut fx = fixture();
        root_with(&mut fx, &["alpha", "beta", "gamma"]);

        assert_eq!(
            list(&fx.dev, &fx.table, InodeNumber::ROOT).expect("list"),
            vec!["alpha", "beta", "gamma"]
        );
        assert_eq!(root(&fx).size, 3);
        assert_eq!(
            find(&fx.dev, &fx.table, InodeNumber::ROOT, "beta").expect("find"),
            InodeNumber(11)
        );
        assert!(matches!(
            find(&fx.dev, &fx.table, InodeNumber::ROOT, "delta"),
            Err(CfsError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut fx = fixture();
        root_with(&mut fx, &["alpha"]);
        let err = append(
            &fx.dev,
            &fx.table,
            &mut fx.alloc,
            InodeNumber::ROOT,
            "alpha",
            InodeNumber(3),
        )
        .expect_err("duplicate");
        assert!(matches!(err, CfsError::NameInUse(_)));
        assert_eq!(root(&fx).size, 1);
    }

    #[test]
    fn invalid_names_are_rejected_before_allocation() {
        let mut fx = fixture();
        let free_before = fx.alloc.count_free(&fx.dev).expect("count");
        let long = "x".repeat(24);
        for bad in ["", "a.b", "with space", long.as_str()] {
            let err = append(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, bad, InodeNumber(1))
                .expect_err("invalid");
            assert!(matches!(err, CfsError::InvalidName(_)));
        }
        assert_eq!(fx.alloc.count_free(&fx.dev).expect("count"), free_before);
    }

    #[test]
    fn append_to_file_inode_fails() {
        let mut fx = fixture();
        let file = InodeNumber(4);
        fx.table
            .set(
                &fx.dev,
                file,
                InodeRecord {
                    kind: InodeKind::File,
                    size: 0,
                    first_block: BlockNumber(100),
                },
            )
            .expect("set");
        let err = append(&fx.dev, &fx.table, &mut fx.alloc, file, "x", InodeNumber(5))
            .expect_err("not a dir");
        assert!(matches!(err, CfsError::NotADirectory(_)));
    }

    #[test]
    fn remove_each_position() {
        for (victim, rest) in [
            ("a", vec!["b", "c", "d"]),
            ("b", vec!["a", "c", "d"]),
            ("d", vec!["a", "b", "c"]),
        ] {
            let mut fx = fixture();
            root_with(&mut fx, &["a", "b", "c", "d"]);
            let free_before = fx.alloc.count_free(&fx.dev).expect("count");

            let child = remove(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, victim)
                .expect("remove");
            let expected_child = match victim {
                "a" => 10,
                "b" => 11,
                _ => 13,
            };
            assert_eq!(child, InodeNumber(expected_child));
            assert_eq!(list(&fx.dev, &fx.table, InodeNumber::ROOT).expect("list"), rest);
            assert_eq!(root(&fx).size, 3);
            assert_eq!(fx.alloc.count_free(&fx.dev).expect("count"), free_before + 1);
        }
    }

    #[test]
    fn removing_sole_entry_empties_directory() {
        let mut fx = fixture();
        root_with(&mut fx, &["only"]);
        remove(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, "only").expect("remove");
        assert_eq!(root(&fx), InodeRecord::EMPTY_DIR);
        assert!(list(&fx.dev, &fx.table, InodeNumber::ROOT).expect("list").is_empty());
    }

    #[test]
    fn append_then_remove_restores_count_and_chain() {
        let mut fx = fixture();
        root_with(&mut fx, &["a", "b"]);
        let before = root(&fx);
        append(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, "tmp", InodeNumber(30))
            .expect("append");
        remove(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, "tmp").expect("remove");
        assert_eq!(root(&fx), before);
        let walked: Vec<_> = entries(&fx.dev, &fx.table, InodeNumber::ROOT)
            .expect("entries")
            .collect::<Result<_>>()
            .expect("walk");
        assert_eq!(walked.len(), 2);
        assert!(walked.last().expect("tail").entry.next.is_null());
    }

    #[test]
    fn missing_name_leaves_image_untouched() {
        let mut fx = fixture();
        root_with(&mut fx, &["a", "b", "c"]);
        let before = fx.mem.snapshot();
        let alloc_before = fx.alloc;
        let err = remove(&fx.dev, &fx.table, &mut fx.alloc, InodeNumber::ROOT, "zzz")
            .expect_err("missing");
        assert!(matches!(err, CfsError::NotFound(_)));
        assert_eq!(fx.mem.snapshot(), before);
        assert_eq!(fx.alloc, alloc_before);
    }

    #[test]
    fn looping_chain_is_reported_as_corruption() {
        let mut fx = fixture();
        root_with(&mut fx, &["a", "b"]);
        let walked: Vec<_> = entries(&fx.dev, &fx.table, InodeNumber::ROOT)
            .expect("entries")
            .collect::<Result<_>>()
            .expect("walk");
        // Point the tail back at the head.
        let tail = walked[1].block;
        let mut buf = fx.dev.read_block(tail).expect("read");
        set_entry_next(buf.as_mut_slice(), walked[0].block).expect("set next");
        fx.dev.write_block(tail, buf.as_slice()).expect("write");

        let err = list(&fx.dev, &fx.table, InodeNumber::ROOT).expect_err("cycle");
        assert!(matches!(err, CfsError::Corruption { .. }));
    }
}
