//! Per-caller navigation state.

use cfs_types::InodeNumber;

/// Current directory and the way back to the root.
///
/// Owned by the caller, never stored on the disk. `cd name` pushes a frame
/// and `cd ..` pops one; the root has no frame to pop. A frame keeps the
/// parent inode and the length of the parent's path, so `path` is the only
/// copy of the display path at any depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    disk: String,
    cwd: InodeNumber,
    path: String,
    stack: Vec<(InodeNumber, usize)>,
}

impl Session {
    /// A session positioned at the root of `disk`.
    #[must_use]
    pub fn new(disk: impl Into<String>) -> Self {
        let disk = disk.into();
        let path = Self::root_path(&disk);
        Self {
            disk,
            cwd: InodeNumber::ROOT,
            path,
            stack: Vec::new(),
        }
    }

    /// Display path of the root directory, e.g. `disk1:/root`.
    #[must_use]
    pub fn root_path(disk: &str) -> String {
        format!("{disk}:/root")
    }

    #[must_use]
    pub fn disk_name(&self) -> &str {
        &self.disk
    }

    #[must_use]
    pub fn cwd(&self) -> InodeNumber {
        self.cwd
    }

    #[must_use]
    pub fn pwd(&self) -> &str {
        &self.path
    }

    /// Directories between the root and the cwd.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn at_root(&self) -> bool {
        self.stack.is_empty()
    }

    pub(crate) fn enter(&mut self, dir: InodeNumber, name: &str) {
        self.stack.push((self.cwd, self.path.len()));
        self.path.push('/');
        self.path.push_str(name);
        self.cwd = dir;
    }

    /// Step back to the parent. Returns `false` at the root.
    pub(crate) fn leave(&mut self) -> bool {
        match self.stack.pop() {
            Some((dir, len)) => {
                self.cwd = dir;
                self.path.truncate(len);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_leave_restore_previous_frame() {
        let mut s = Session::new("disk1");
        assert_eq!(s.pwd(), "disk1:/root");
        assert!(s.at_root());

        s.enter(InodeNumber(3), "a");
        s.enter(InodeNumber(7), "b");
        assert_eq!(s.pwd(), "disk1:/root/a/b");
        assert_eq!(s.cwd(), InodeNumber(7));
        assert_eq!(s.depth(), 2);

        assert!(s.leave());
        assert_eq!(s.pwd(), "disk1:/root/a");
        assert_eq!(s.cwd(), InodeNumber(3));
        assert!(s.leave());
        assert!(!s.leave());
        assert_eq!(s.cwd(), InodeNumber::ROOT);
        assert_eq!(s.pwd(), "disk1:/root");
    }

    #[test]
    fn deep_chain_keeps_one_path_buffer() {
        const DEPTH: usize = 50_000;
        let mut s = Session::new("disk1");
        for i in 0..DEPTH {
            s.enter(InodeNumber(u32::try_from(i + 1).expect("fits")), "d");
        }
        assert_eq!(s.depth(), DEPTH);
        assert_eq!(s.pwd().len(), "disk1:/root".len() + 2 * DEPTH);
        assert!(s.pwd().ends_with("/d/d/d"));

        for _ in 0..DEPTH {
            assert!(s.leave());
        }
        assert!(s.at_root());
        assert_eq!(s.pwd(), "disk1:/root");
        assert_eq!(s.cwd(), InodeNumber::ROOT);
    }
}
