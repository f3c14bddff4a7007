//! Disk lifecycle: format, create, mount, unmount, delete.

use cfs_alloc::{FreeList, InodeAllocator};
use cfs_block::{BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice};
use cfs_error::{CfsError, Result};
use cfs_inode::InodeTable;
use cfs_ondisk::superblock::SUPERBLOCK_LEN;
use cfs_ondisk::{Superblock, geometry_error};
use cfs_types::{BlockNumber, Geometry, InodeNumber, ParseError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Disk image backed by a host file.
pub type FileDisk = Disk<ByteBlockDevice<FileByteDevice>>;

/// Point-in-time usage figures for a mounted disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    pub capacity: u32,
    pub block_size: u32,
    pub inode_count: u32,
    pub first_data_block: u32,
    pub free_blocks: usize,
    pub free_inodes: usize,
}

/// A mounted disk.
///
/// Owns the block device together with the in-memory allocator state. The
/// free-list position and inode cursor only reach block 0 on
/// [`Disk::unmount`] (or [`Disk::flush`]); dropping a disk without
/// unmounting leaves the superblock stale.
pub struct Disk<D: BlockDevice> {
    pub(crate) dev: D,
    pub(crate) geometry: Geometry,
    pub(crate) table: InodeTable,
    pub(crate) free: FreeList,
    pub(crate) inodes: InodeAllocator,
}

impl<D: BlockDevice> std::fmt::Debug for Disk<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("geometry", &self.geometry)
            .field("free_head", &self.free.head())
            .field("free_fill", &self.free.fill())
            .field("free_inodes", &self.inodes.free_count())
            .finish_non_exhaustive()
    }
}

fn superblock_corruption(err: &ParseError) -> CfsError {
    CfsError::Corruption {
        block: BlockNumber::SUPERBLOCK.0,
        detail: err.to_string(),
    }
}

fn check_device(dev: &dyn BlockDevice, geometry: Geometry) -> Result<()> {
    if dev.block_size() != geometry.block_size() || dev.block_count() != geometry.capacity() {
        return Err(CfsError::Format(format!(
            "device has {} blocks of {} bytes, geometry wants {} blocks of {} bytes",
            dev.block_count(),
            dev.block_size(),
            geometry.capacity(),
            geometry.block_size()
        )));
    }
    Ok(())
}

impl<D: BlockDevice> Disk<D> {
    /// Lay a fresh disk out on `dev`.
    ///
    /// Zeroes every block after block 0, writes the inode table (root is an
    /// empty directory), registers every block after the table as free, and
    /// persists the superblock.
    pub fn format(dev: D, geometry: Geometry) -> Result<Self> {
        check_device(&dev, geometry)?;

        let zero = vec![0_u8; geometry.block_len()];
        for block in 1..geometry.capacity() {
            dev.write_block(BlockNumber(block), &zero)?;
        }

        let table = InodeTable::new(geometry);
        table.format(&dev)?;

        // Seed high to low so early allocations come from the low end.
        let mut free = FreeList::empty(geometry);
        free.seed(
            &dev,
            (geometry.first_data_block().0..geometry.capacity())
                .rev()
                .map(BlockNumber),
        )?;
        let inodes = InodeAllocator::rebuild(table.scan_free(&dev)?);

        let disk = Self {
            dev,
            geometry,
            table,
            free,
            inodes,
        };
        disk.flush()?;
        info!(
            capacity = geometry.capacity(),
            block_size = geometry.block_size(),
            inode_count = geometry.inode_count(),
            first_data_block = geometry.first_data_block().0,
            "disk_formatted"
        );
        Ok(disk)
    }

    /// Mount an already formatted device.
    pub fn open(dev: D) -> Result<Self> {
        let block0 = dev.read_block(BlockNumber::SUPERBLOCK)?;
        let sb = Superblock::parse(block0.as_slice()).map_err(|e| superblock_corruption(&e))?;
        let geometry = sb.validate().map_err(|e| superblock_corruption(&e))?;
        check_device(&dev, geometry)?;

        let table = InodeTable::new(geometry);
        let free = FreeList::from_superblock(&sb, geometry);
        let inodes = InodeAllocator::rebuild(table.scan_free(&dev)?);
        if sb.next_inode.0 != inodes.peek().map_or(0, |ino| ino.0) {
            debug!(
                stored = sb.next_inode.0,
                rebuilt = inodes.peek().map_or(0, |ino| ino.0),
                "inode_cursor_rebuilt"
            );
        }
        debug!(
            capacity = geometry.capacity(),
            block_size = geometry.block_size(),
            free_head = free.head().0,
            free_fill = free.fill(),
            free_inodes = inodes.free_count(),
            "disk_mounted"
        );
        Ok(Self {
            dev,
            geometry,
            table,
            free,
            inodes,
        })
    }

    /// Write the superblock fields back to block 0 and sync.
    pub fn flush(&self) -> Result<()> {
        let mut sb = Superblock::new(self.geometry);
        self.free.store(&mut sb);
        sb.next_inode = self.inodes.peek().unwrap_or(InodeNumber(0));

        let mut block0 = self.dev.read_block(BlockNumber::SUPERBLOCK)?;
        sb.write_to(block0.as_mut_slice())
            .map_err(|e| superblock_corruption(&e))?;
        self.dev.write_block(BlockNumber::SUPERBLOCK, block0.as_slice())?;
        self.dev.sync()
    }

    /// Persist the superblock and release the device.
    pub fn unmount(self) -> Result<()> {
        self.flush()?;
        info!(
            free_head = self.free.head().0,
            free_fill = self.free.fill(),
            "disk_unmounted"
        );
        Ok(())
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Walks the free list, so cost grows with the number of free blocks.
    pub fn stats(&self) -> Result<DiskStats> {
        Ok(DiskStats {
            capacity: self.geometry.capacity(),
            block_size: self.geometry.block_size(),
            inode_count: self.geometry.inode_count(),
            first_data_block: self.geometry.first_data_block().0,
            free_blocks: self.free.count_free(&self.dev)?,
            free_inodes: self.inodes.free_count(),
        })
    }
}

impl FileDisk {
    /// Create and format a new image at `path`, then close it.
    pub fn create(path: impl AsRef<Path>, geometry: Geometry) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(CfsError::ExistingStore(path.display().to_string()));
        }
        let file = FileByteDevice::create(path, geometry.image_len())?;
        let dev = ByteBlockDevice::new(file, geometry.block_size())?;
        Self::format(dev, geometry)?.unmount()?;
        info!(
            path = %path.display(),
            capacity = geometry.capacity(),
            block_size = geometry.block_size(),
            "disk_created"
        );
        Ok(())
    }

    /// Validate `(capacity, block_size)` and create the image.
    pub fn create_with(path: impl AsRef<Path>, capacity: u32, block_size: u32) -> Result<()> {
        let geometry = Geometry::new(capacity, block_size).map_err(|e| geometry_error(&e))?;
        Self::create(path, geometry)
    }

    /// Open the image at `path`.
    ///
    /// The block size is read from the stored superblock, and the stored
    /// geometry must account for exactly the image length.
    pub fn mount(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CfsError::NoSuchStore(path.display().to_string()));
        }
        let file = FileByteDevice::open(path)?;
        if file.len_bytes() < SUPERBLOCK_LEN as u64 {
            return Err(CfsError::Format(format!(
                "image is {} bytes, too short for a superblock",
                file.len_bytes()
            )));
        }
        let mut head = [0_u8; SUPERBLOCK_LEN];
        file.read_exact_at(0, &mut head)?;
        let sb = Superblock::parse(&head).map_err(|e| superblock_corruption(&e))?;
        let geometry = sb.validate().map_err(|e| superblock_corruption(&e))?;
        if geometry.image_len() != file.len_bytes() {
            warn!(
                path = %path.display(),
                stored = geometry.image_len(),
                actual = file.len_bytes(),
                "image_length_mismatch"
            );
            return Err(CfsError::Corruption {
                block: BlockNumber::SUPERBLOCK.0,
                detail: format!(
                    "superblock describes {} bytes but image holds {}",
                    geometry.image_len(),
                    file.len_bytes()
                ),
            });
        }
        let dev = ByteBlockDevice::new(file, geometry.block_size())?;
        Self::open(dev)
    }

    /// Remove the image at `path`.
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CfsError::NoSuchStore(path.display().to_string()));
        }
        std::fs::remove_file(path)?;
        info!(path = %path.display(), "disk_deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_block::MemoryByteDevice;

    type MemoryDisk = Disk<ByteBlockDevice<MemoryByteDevice>>;

    fn memory_disk(capacity: u32, block_size: u32) -> (MemoryByteDevice, MemoryDisk) {
        let geometry = Geometry::new(capacity, block_size).expect("geometry");
        let mem = MemoryByteDevice::new(geometry.image_len() as usize);
        let dev = ByteBlockDevice::new(mem.clone(), block_size).expect("device");
        (mem, Disk::format(dev, geometry).expect("format"))
    }

    #[test]
    fn format_writes_superblock_fields() {
        let (mem, disk) = memory_disk(1024, 256);
        let image = mem.snapshot();
        let sb = Superblock::parse(&image[..SUPERBLOCK_LEN]).expect("parse");
        assert_eq!(sb.capacity, 1024);
        assert_eq!(sb.block_size, 256);
        assert_eq!(sb.inode_count, 2621);
        assert_eq!(sb.next_inode, InodeNumber(1));
        assert!(!sb.free_list_head.is_null());

        let stats = disk.stats().expect("stats");
        assert_eq!(stats.first_data_block, 96);
        assert_eq!(stats.free_blocks, 1024 - 96);
        assert_eq!(stats.free_inodes, 2620);
    }

    #[test]
    fn reopen_preserves_allocator_position() {
        let (mem, mut disk) = memory_disk(128, 32);
        let a = disk.free.allocate(&disk.dev).expect("alloc");
        let b = disk.free.allocate(&disk.dev).expect("alloc");
        disk.free.free(&disk.dev, a).expect("free");
        let before = disk.free;
        disk.unmount().expect("unmount");

        let dev = ByteBlockDevice::new(mem, 32).expect("device");
        let mut disk = Disk::open(dev).expect("open");
        assert_eq!(disk.free, before);
        assert_eq!(disk.free.allocate(&disk.dev).expect("alloc"), a);
        assert_ne!(disk.free.allocate(&disk.dev).expect("alloc"), b);
    }

    #[test]
    fn open_rejects_garbage_superblock() {
        let mem = MemoryByteDevice::new(128 * 32);
        let dev = ByteBlockDevice::new(mem, 32).expect("device");
        let err = Disk::open(dev).expect_err("zeroed image");
        assert!(matches!(err, CfsError::Corruption { block: 0, .. }));
    }

    #[test]
    fn open_rejects_device_of_wrong_shape() {
        let (mem, disk) = memory_disk(128, 32);
        disk.unmount().expect("unmount");
        // Same bytes viewed as 64-byte blocks.
        let dev = ByteBlockDevice::new(mem, 64).expect("device");
        assert!(matches!(Disk::open(dev), Err(CfsError::Format(_))));
    }
}
