//! Directory-entry blocks.
//!
//! One entry per block:
//!
//! ```text
//! [0, bs-9)     name, ASCII alphanumeric, space padded
//! [bs-9]        pad
//! [bs-8, bs-4)  child inode (u32 BE)
//! [bs-4, bs)    next entry block (u32 BE, 0 ends the chain)
//! ```

use cfs_error::CfsError;
use cfs_types::{BlockNumber, InodeNumber, ParseError, read_be_u32, write_be_u32};

/// Trailing bytes reserved after the name field.
const ENTRY_TAIL: usize = 9;

fn name_field_len(block_len: usize) -> usize {
    block_len.saturating_sub(ENTRY_TAIL)
}

fn child_offset(block_len: usize) -> usize {
    block_len.saturating_sub(8)
}

fn next_offset(block_len: usize) -> usize {
    block_len.saturating_sub(4)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub child: InodeNumber,
    pub next: BlockNumber,
}

/// Check that `name` can be stored in an entry block of `block_size` bytes.
pub fn validate_entry_name(name: &str, block_size: u32) -> Result<(), CfsError> {
    let max = name_field_len(block_size as usize);
    if name.is_empty() || name.len() > max || !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(CfsError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Overwrite `block` with a single entry.
pub fn encode_entry(
    block: &mut [u8],
    name: &str,
    child: InodeNumber,
    next: BlockNumber,
) -> Result<(), ParseError> {
    let field = name_field_len(block.len());
    if name.len() > field {
        return Err(ParseError::InvalidField {
            field: "entry_name",
            reason: "longer than the name field",
        });
    }
    let len = block.len();
    block[..child_offset(len)].fill(b' ');
    block[..name.len()].copy_from_slice(name.as_bytes());
    write_be_u32(block, child_offset(len), child.0)?;
    write_be_u32(block, next_offset(len), next.0)?;
    Ok(())
}

pub fn decode_entry(block: &[u8]) -> Result<DirEntry, ParseError> {
    if block.len() <= ENTRY_TAIL {
        return Err(ParseError::InsufficientData {
            needed: ENTRY_TAIL + 1,
            offset: 0,
            actual: block.len(),
        });
    }
    let len = block.len();
    let name: String = block[..name_field_len(len)]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric())
        .map(|b| char::from(*b))
        .collect();
    Ok(DirEntry {
        name,
        child: InodeNumber(read_be_u32(block, child_offset(len))?),
        next: BlockNumber(read_be_u32(block, next_offset(len))?),
    })
}

/// Rewrite only the next-entry pointer.
pub fn set_entry_next(block: &mut [u8], next: BlockNumber) -> Result<(), ParseError> {
    let off = next_offset(block.len());
    write_be_u32(block, off, next.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout() {
        let mut block = vec![0xAA_u8; 32];
        encode_entry(&mut block, "notes1", InodeNumber(5), BlockNumber(300)).expect("encode");

        assert_eq!(&block[..6], b"notes1");
        assert!(block[6..24].iter().all(|b| *b == b' '));
        assert_eq!(&block[24..28], &[0, 0, 0, 5]);
        assert_eq!(&block[28..32], &[0, 0, 1, 44]);

        let entry = decode_entry(&block).expect("decode");
        assert_eq!(entry.name, "notes1");
        assert_eq!(entry.child, InodeNumber(5));
        assert_eq!(entry.next, BlockNumber(300));
    }

    #[test]
    fn name_stops_at_first_non_alphanumeric() {
        let mut block = vec![0_u8; 32];
        block[..7].copy_from_slice(b"abc.def");
        assert_eq!(decode_entry(&block).expect("decode").name, "abc");
    }

    #[test]
    fn next_pointer_rewrite_keeps_name_and_child() {
        let mut block = vec![0_u8; 64];
        encode_entry(&mut block, "a", InodeNumber(9), BlockNumber::NULL).expect("encode");
        set_entry_next(&mut block, BlockNumber(77)).expect("set next");
        let entry = decode_entry(&block).expect("decode");
        assert_eq!(entry.next, BlockNumber(77));
        assert_eq!(entry.name, "a");
        assert_eq!(entry.child, InodeNumber(9));
    }

    #[test]
    fn name_validation() {
        assert!(validate_entry_name("docs", 32).is_ok());
        assert!(validate_entry_name("A1b2C3", 32).is_ok());
        // 32-byte block leaves 23 name bytes.
        assert!(validate_entry_name(&"x".repeat(23), 32).is_ok());
        assert!(validate_entry_name(&"x".repeat(24), 32).is_err());
        assert!(validate_entry_name("", 256).is_err());
        assert!(validate_entry_name("a b", 256).is_err());
        assert!(validate_entry_name("..", 256).is_err());
        assert!(validate_entry_name("file.txt", 256).is_err());

        let mut block = vec![0_u8; 32];
        assert!(encode_entry(&mut block, &"x".repeat(24), InodeNumber(1), BlockNumber(0)).is_err());
    }
}
