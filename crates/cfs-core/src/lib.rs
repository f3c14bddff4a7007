#![forbid(unsafe_code)]
//! chainfs core: mounted disks and the operations run against them.
//!
//! A [`Disk`] owns a block device plus the allocator state that is only
//! persisted at unmount. Navigation lives in a caller-owned [`Session`], so
//! one disk can serve any number of independent working directories as long
//! as the caller serializes the calls.
//!
//! ```ignore
//! let catalog = DiskCatalog::new(StoreConfig::new("/srv/chainfs"));
//! catalog.create_disk("disk1", Geometry::default())?;
//! let (mut disk, mut session) = catalog.mount_disk("disk1")?;
//! disk.mkdir(&session, "docs")?;
//! disk.cd(&mut session, "docs")?;
//! disk.write_file(&session, "readme", b"hello")?;
//! disk.unmount()?;
//! ```

mod disk;
mod ops;
mod session;
mod store;
mod walk;

pub use disk::{Disk, DiskStats, FileDisk};
pub use ops::{APPEND_SEPARATOR, DirListing, EntryKind};
pub use session::Session;
pub use store::{
    DISK_DIR, DiskCatalog, DiskSummary, FILES_DIR, FileLoader, REGISTRY_FILE, StoreConfig,
};
pub use walk::{RemovalCounts, TreeWalker};

pub use cfs_block::{BlockDevice, ByteBlockDevice, FileByteDevice, MemoryByteDevice};
pub use cfs_error::{CfsError, Result};
pub use cfs_types::{
    BlockNumber, DEFAULT_BLOCK_SIZE, DEFAULT_CAPACITY, Geometry, InodeNumber, MIN_BLOCK_SIZE,
};
