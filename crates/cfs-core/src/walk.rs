//! Recursive traversal of the directory tree.
//!
//! The tree has no aliases (no hard links), so a plain depth-first walk
//! visits every inode once. Depth is still bounded by the inode count so a
//! corrupted image with a directory cycle fails instead of recursing
//! forever.

use cfs_alloc::{BlockAllocator, InodeAllocator};
use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_inode::InodeTable;
use cfs_ondisk::InodeKind;
use cfs_types::InodeNumber;
use tracing::debug;

/// Depth-first walker over one disk's directory tree.
pub struct TreeWalker<'a> {
    dev: &'a dyn BlockDevice,
    table: &'a InodeTable,
}

/// What a subtree deletion released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalCounts {
    pub files: usize,
    pub dirs: usize,
}

impl<'a> TreeWalker<'a> {
    #[must_use]
    pub fn new(dev: &'a dyn BlockDevice, table: &'a InodeTable) -> Self {
        Self { dev, table }
    }

    fn check_depth(&self, dir: InodeNumber, depth: u32) -> Result<()> {
        if depth > self.table.inode_count() {
            return Err(CfsError::Corruption {
                block: 0,
                detail: format!("directory tree deeper than the inode count at inode {dir}"),
            });
        }
        Ok(())
    }

    /// Every entry named `target` under `dir`, in pre-order.
    ///
    /// Paths are `prefix/...`. A matching directory is reported and still
    /// descended into.
    pub fn find_all(&self, dir: InodeNumber, target: &str, prefix: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        self.find_into(dir, target, prefix, 0, &mut found)?;
        Ok(found)
    }

    fn find_into(
        &self,
        dir: InodeNumber,
        target: &str,
        prefix: &str,
        depth: u32,
        found: &mut Vec<String>,
    ) -> Result<()> {
        self.check_depth(dir, depth)?;
        for item in cfs_dir::entries(self.dev, self.table, dir)? {
            let entry = item?.entry;
            let path = format!("{prefix}/{}", entry.name);
            if entry.name == target {
                found.push(path.clone());
            }
            if self.table.get(self.dev, entry.child)?.is_dir() {
                self.find_into(entry.child, target, &path, depth + 1, found)?;
            }
        }
        Ok(())
    }

    /// Delete everything inside `dir`, children before their parents.
    ///
    /// Files have their chains freed, directories are emptied first, and
    /// every entry is unlinked from its parent. `dir` itself survives with
    /// no entries.
    pub fn delete_subtree(
        &self,
        alloc: &mut dyn BlockAllocator,
        inodes: &mut InodeAllocator,
        dir: InodeNumber,
    ) -> Result<RemovalCounts> {
        let mut counts = RemovalCounts::default();
        self.delete_into(alloc, inodes, dir, 0, &mut counts)?;
        Ok(counts)
    }

    fn delete_into(
        &self,
        alloc: &mut dyn BlockAllocator,
        inodes: &mut InodeAllocator,
        dir: InodeNumber,
        depth: u32,
        counts: &mut RemovalCounts,
    ) -> Result<()> {
        self.check_depth(dir, depth)?;
        // Snapshot first: unlinking rewrites the chain under the iterator.
        let children = cfs_dir::entries(self.dev, self.table, dir)?
            .map(|item| item.map(|located| (located.entry.name, located.entry.child)))
            .collect::<Result<Vec<_>>>()?;

        for (name, child) in children {
            let record = self.table.get(self.dev, child)?;
            match record.kind {
                InodeKind::Directory => {
                    if record.size > 0 {
                        self.delete_into(alloc, inodes, child, depth + 1, counts)?;
                    }
                    self.table.release(self.dev, inodes, child)?;
                    counts.dirs += 1;
                }
                InodeKind::File => {
                    cfs_extent::truncate_and_free(self.dev, self.table, alloc, inodes, child)?;
                    counts.files += 1;
                }
            }
            cfs_dir::remove(self.dev, self.table, alloc, dir, &name)?;
        }
        debug!(dir = dir.0, files = counts.files, dirs = counts.dirs, "subtree_deleted");
        Ok(())
    }

    /// Remove directory `name` from `parent` together with its whole subtree.
    pub fn remove_tree(
        &self,
        alloc: &mut dyn BlockAllocator,
        inodes: &mut InodeAllocator,
        parent: InodeNumber,
        name: &str,
    ) -> Result<RemovalCounts> {
        let child = cfs_dir::find(self.dev, self.table, parent, name)?;
        let record = self.table.get(self.dev, child)?;
        if !record.is_dir() {
            return Err(CfsError::NotADirectory(name.to_owned()));
        }
        let mut counts = if record.size > 0 {
            self.delete_subtree(alloc, inodes, child)?
        } else {
            RemovalCounts::default()
        };
        cfs_dir::remove(self.dev, self.table, alloc, parent, name)?;
        self.table.release(self.dev, inodes, child)?;
        counts.dirs += 1;
        debug!(
            parent = parent.0,
            name,
            files = counts.files,
            dirs = counts.dirs,
            "tree_removed"
        );
        Ok(counts)
    }
}
