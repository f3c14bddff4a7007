#![forbid(unsafe_code)]
//! On-disk format for chainfs images.
//!
//! Pure encoding and decoding over byte slices. Nothing here performs I/O;
//! callers read a block through `cfs-block` and hand the bytes to these
//! codecs. Every multi-byte field is a big-endian `u32`.
//!
//! | Structure | Location |
//! |-----------|----------|
//! | [`Superblock`] | block 0, six `u32` fields |
//! | [`InodeRecord`] | 9-byte records packed from block 1 |
//! | [`DirEntry`] | one per directory-entry block |
//! | [`ExtentLayout`] | file head, data, and continuation blocks |

pub mod dirent;
pub mod extent;
pub mod inode;
pub mod superblock;

pub use dirent::{DirEntry, decode_entry, encode_entry, set_entry_next, validate_entry_name};
pub use extent::ExtentLayout;
pub use inode::{InodeKind, InodeRecord};
pub use superblock::Superblock;

use cfs_error::CfsError;
use cfs_types::{BlockNumber, ParseError};

/// Convert a decoding failure on a live block into `CfsError::Corruption`.
#[must_use]
pub fn corruption(block: BlockNumber, err: &ParseError) -> CfsError {
    CfsError::Corruption {
        block: block.0,
        detail: err.to_string(),
    }
}

/// Convert a geometry validation failure into `CfsError::InvalidGeometry`.
#[must_use]
pub fn geometry_error(err: &ParseError) -> CfsError {
    CfsError::InvalidGeometry(err.to_string())
}
