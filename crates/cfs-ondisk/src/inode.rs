//! Packed 9-byte inode records.

use cfs_types::{BlockNumber, INODE_RECORD_SIZE, ParseError, ensure_slice, read_be_u32};
use serde::{Deserialize, Serialize};

const RECORD_LEN: usize = INODE_RECORD_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeKind {
    Directory,
    File,
}

impl InodeKind {
    #[must_use]
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Directory => 0,
            Self::File => 1,
        }
    }

    pub fn from_raw(raw: u8) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Directory),
            1 => Ok(Self::File),
            _ => Err(ParseError::InvalidField {
                field: "inode_type",
                reason: "must be 0 (directory) or 1 (file)",
            }),
        }
    }
}

/// One inode record.
///
/// For files `size` is the exact byte length. For directories it is the
/// number of entries in the chain, `0` when empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
    pub kind: InodeKind,
    pub size: u32,
    pub first_block: BlockNumber,
}

impl InodeRecord {
    /// Reset state of an unused inode. Block 1 always belongs to the inode
    /// table, so no live file can point at it.
    pub const FREE: Self = Self {
        kind: InodeKind::File,
        size: 1,
        first_block: BlockNumber::INODE_TABLE_START,
    };

    /// A directory with no entries.
    pub const EMPTY_DIR: Self = Self {
        kind: InodeKind::Directory,
        size: 0,
        first_block: BlockNumber::NULL,
    };

    #[must_use]
    pub fn is_free(&self) -> bool {
        *self == Self::FREE
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let record = ensure_slice(bytes, 0, RECORD_LEN)?;
        Ok(Self {
            kind: InodeKind::from_raw(record[0])?,
            size: read_be_u32(record, 1)?,
            first_block: BlockNumber(read_be_u32(record, 5)?),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0_u8; RECORD_LEN];
        out[0] = self.kind.to_raw();
        out[1..5].copy_from_slice(&self.size.to_be_bytes());
        out[5..9].copy_from_slice(&self.first_block.0.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_encoding() {
        let rec = InodeRecord {
            kind: InodeKind::File,
            size: 300,
            first_block: BlockNumber(97),
        };
        let raw = rec.encode();
        assert_eq!(raw, [1, 0, 0, 1, 44, 0, 0, 0, 97]);
        assert_eq!(InodeRecord::parse(&raw).expect("parse"), rec);

        assert_eq!(InodeRecord::EMPTY_DIR.encode(), [0; 9]);
        assert_eq!(InodeRecord::FREE.encode(), [1, 0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn free_sentinel_is_distinct() {
        assert!(InodeRecord::FREE.is_free());
        assert!(!InodeRecord::EMPTY_DIR.is_free());
        let empty_file = InodeRecord {
            kind: InodeKind::File,
            size: 0,
            first_block: BlockNumber(200),
        };
        assert!(!empty_file.is_free());
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let raw = [7_u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            InodeRecord::parse(&raw),
            Err(ParseError::InvalidField {
                field: "inode_type",
                ..
            })
        ));
        assert!(InodeRecord::parse(&raw[..8]).is_err());
    }
}
