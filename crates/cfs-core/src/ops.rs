//! Directory and file operations against a [`Session`]'s current directory.

use crate::disk::Disk;
use crate::session::Session;
use crate::walk::{RemovalCounts, TreeWalker};
use cfs_block::BlockDevice;
use cfs_error::{CfsError, Result};
use cfs_ondisk::{InodeKind, InodeRecord, validate_entry_name};
use cfs_types::{BlockNumber, InodeNumber};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Separator inserted between old content and appended content.
pub const APPEND_SEPARATOR: u8 = b'\n';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

impl From<InodeKind> for EntryKind {
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::Directory => Self::Directory,
            InodeKind::File => Self::File,
        }
    }
}

/// One line of `ls`.
///
/// `size` is the byte length of a file or the entry count of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirListing {
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
}

impl fmt::Display for DirListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Directory => write!(f, "{}/ {}", self.name, self.size),
            EntryKind::File => write!(f, "{} {}", self.name, self.size),
        }
    }
}

const NEW_FILE: InodeRecord = InodeRecord {
    kind: InodeKind::File,
    size: 0,
    first_block: BlockNumber::NULL,
};

impl<D: BlockDevice> Disk<D> {
    fn child(&self, session: &Session, name: &str) -> Result<(InodeNumber, InodeRecord)> {
        let ino = cfs_dir::find(&self.dev, &self.table, session.cwd(), name)?;
        Ok((ino, self.table.get(&self.dev, ino)?))
    }

    fn child_file(&self, session: &Session, name: &str) -> Result<InodeNumber> {
        let (ino, record) = self.child(session, name)?;
        if record.kind != InodeKind::File {
            return Err(CfsError::NotAFile(name.to_owned()));
        }
        Ok(ino)
    }

    fn child_dir(&self, session: &Session, name: &str) -> Result<(InodeNumber, InodeRecord)> {
        let (ino, record) = self.child(session, name)?;
        if !record.is_dir() {
            return Err(CfsError::NotADirectory(name.to_owned()));
        }
        Ok((ino, record))
    }

    /// Reject bad or taken names before anything is allocated.
    fn check_new_name(&self, session: &Session, name: &str) -> Result<()> {
        validate_entry_name(name, self.geometry.block_size())?;
        if cfs_dir::lookup(&self.dev, &self.table, session.cwd(), name)?.is_some() {
            return Err(CfsError::NameInUse(name.to_owned()));
        }
        Ok(())
    }

    /// Create an empty directory `name` in the cwd.
    pub fn mkdir(&mut self, session: &Session, name: &str) -> Result<InodeNumber> {
        self.check_new_name(session, name)?;
        let ino = self
            .table
            .allocate(&self.dev, &mut self.inodes, InodeRecord::EMPTY_DIR)?;
        if let Err(err) = cfs_dir::append(
            &self.dev,
            &self.table,
            &mut self.free,
            session.cwd(),
            name,
            ino,
        ) {
            self.table.release(&self.dev, &mut self.inodes, ino)?;
            return Err(err);
        }
        info!(parent = session.cwd().0, name, ino = ino.0, "mkdir");
        Ok(ino)
    }

    /// Remove the empty directory `name`.
    pub fn rmdir(&mut self, session: &Session, name: &str) -> Result<()> {
        let (ino, record) = self.child_dir(session, name)?;
        if record.size > 0 {
            return Err(CfsError::NotEmpty(name.to_owned()));
        }
        cfs_dir::remove(&self.dev, &self.table, &mut self.free, session.cwd(), name)?;
        self.table.release(&self.dev, &mut self.inodes, ino)?;
        info!(parent = session.cwd().0, name, ino = ino.0, "rmdir");
        Ok(())
    }

    /// Remove directory `name` and everything below it.
    pub fn rrmdir(&mut self, session: &Session, name: &str) -> Result<RemovalCounts> {
        let walker = TreeWalker::new(&self.dev, &self.table);
        let counts = walker.remove_tree(&mut self.free, &mut self.inodes, session.cwd(), name)?;
        info!(
            parent = session.cwd().0,
            name,
            files = counts.files,
            dirs = counts.dirs,
            "rrmdir"
        );
        Ok(counts)
    }

    /// Create file `name` holding `bytes`, or replace the contents of an
    /// existing file of that name.
    pub fn write_file(&mut self, session: &Session, name: &str, bytes: &[u8]) -> Result<InodeNumber> {
        if let Some(ino) = cfs_dir::lookup(&self.dev, &self.table, session.cwd(), name)? {
            if self.table.get(&self.dev, ino)?.kind != InodeKind::File {
                return Err(CfsError::NotAFile(name.to_owned()));
            }
            cfs_extent::write(&self.dev, &self.table, &mut self.free, ino, bytes)?;
            debug!(ino = ino.0, name, len = bytes.len(), "file_rewritten");
            return Ok(ino);
        }

        validate_entry_name(name, self.geometry.block_size())?;
        let ino = self.table.allocate(&self.dev, &mut self.inodes, NEW_FILE)?;
        let linked = cfs_extent::write(&self.dev, &self.table, &mut self.free, ino, bytes)
            .and_then(|()| {
                cfs_dir::append(&self.dev, &self.table, &mut self.free, session.cwd(), name, ino)
            });
        if let Err(err) = linked {
            cfs_extent::truncate_and_free(&self.dev, &self.table, &mut self.free, &mut self.inodes, ino)?;
            return Err(err);
        }
        info!(parent = session.cwd().0, name, ino = ino.0, len = bytes.len(), "file_created");
        Ok(ino)
    }

    /// Copy file `src` to `dst` within the cwd.
    pub fn cp(&mut self, session: &Session, src: &str, dst: &str) -> Result<InodeNumber> {
        let bytes = self.cat(session, src)?;
        self.write_file(session, dst, &bytes)
    }

    /// Append a line break and `extra` to file `name`.
    pub fn append(&mut self, session: &Session, name: &str, extra: &[u8]) -> Result<()> {
        let ino = self.child_file(session, name)?;
        let mut tail = Vec::with_capacity(extra.len() + 1);
        tail.push(APPEND_SEPARATOR);
        tail.extend_from_slice(extra);
        cfs_extent::append(&self.dev, &self.table, &mut self.free, ino, &tail)?;
        debug!(ino = ino.0, name, extra = extra.len(), "file_appended");
        Ok(())
    }

    /// Contents of file `name`.
    pub fn cat(&self, session: &Session, name: &str) -> Result<Vec<u8>> {
        let ino = self.child_file(session, name)?;
        cfs_extent::read(&self.dev, &self.table, ino)
    }

    /// Delete file `name`.
    pub fn rm(&mut self, session: &Session, name: &str) -> Result<()> {
        let ino = self.child_file(session, name)?;
        cfs_dir::remove(&self.dev, &self.table, &mut self.free, session.cwd(), name)?;
        cfs_extent::truncate_and_free(&self.dev, &self.table, &mut self.free, &mut self.inodes, ino)?;
        info!(parent = session.cwd().0, name, ino = ino.0, "rm");
        Ok(())
    }

    /// Entries of the cwd in insertion order.
    pub fn ls(&self, session: &Session) -> Result<Vec<DirListing>> {
        cfs_dir::entries(&self.dev, &self.table, session.cwd())?
            .map(|item| {
                let entry = item?.entry;
                let record = self.table.get(&self.dev, entry.child)?;
                Ok(DirListing {
                    name: entry.name,
                    kind: record.kind.into(),
                    size: record.size,
                })
            })
            .collect()
    }

    /// Change directory. `..` steps back to the parent and is a no-op at
    /// the root. A failure leaves `session` untouched.
    pub fn cd(&self, session: &mut Session, name: &str) -> Result<()> {
        if name == ".." {
            session.leave();
            return Ok(());
        }
        let (ino, _) = self.child_dir(session, name)?;
        session.enter(ino, name);
        Ok(())
    }

    /// Paths of every entry called `name`, searching from the root.
    pub fn find(&self, session: &Session, name: &str) -> Result<Vec<String>> {
        let walker = TreeWalker::new(&self.dev, &self.table);
        walker.find_all(InodeNumber::ROOT, name, &Session::root_path(session.disk_name()))
    }
}
