//! Line-oriented command interpreter over one mounted disk.

use cfs::{BlockDevice, CfsError, Disk, FileLoader, Session};
use std::io::{self, Write};
use thiserror::Error;

/// Width of one `cat` output line.
pub const CAT_WIDTH: usize = 64;

const HELP: &str = "\
commands:
  ls                          list the current directory
  pwd                         print the current directory
  cd <dir> | cd ..            change directory
  find <name>                 every path named <name>, from the root
  mkdir <dir>                 create a directory
  rmdir <dir>                 remove an empty directory
  rrmdir <dir>                remove a directory and everything in it
  loadfile <file> <ext>       create or replace <file> with Files/<ext>
  append <ext> <file>         append a line break and Files/<ext> to <file>
  cp <src> <dst>              copy a file
  cat <file>                  show a file
  rm <file>                   remove a file
  exit                        unmount and leave";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Why a shell command line failed.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The command line itself was malformed; nothing touched the disk.
    #[error("missing operand, usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    Fs(#[from] CfsError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl ShellError {
    /// Whether the session has to end; see [`CfsError::is_fatal`].
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Usage(_) => false,
            Self::Fs(err) => err.is_fatal(),
            Self::Output(_) => true,
        }
    }

    /// Convert for `main`, keeping a filesystem error on top so its errno
    /// reaches the exit status.
    #[must_use]
    pub fn into_report(self) -> anyhow::Error {
        match self {
            Self::Fs(err) => err.into(),
            other => other.into(),
        }
    }
}

pub struct Shell<D: BlockDevice> {
    disk: Disk<D>,
    session: Session,
    loader: FileLoader,
}

fn operand<'a>(
    words: &[&'a str],
    index: usize,
    usage: &'static str,
) -> Result<&'a str, ShellError> {
    words.get(index).copied().ok_or(ShellError::Usage(usage))
}

/// Break text into lines of at most [`CAT_WIDTH`] characters.
#[must_use]
pub fn render_cat(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
        }
        for chunk in chars.chunks(CAT_WIDTH) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

impl<D: BlockDevice> Shell<D> {
    pub fn new(disk: Disk<D>, session: Session, loader: FileLoader) -> Self {
        Self {
            disk,
            session,
            loader,
        }
    }

    pub fn prompt(&self) -> String {
        format!("{}> ", self.session.pwd())
    }

    pub fn into_disk(self) -> Disk<D> {
        self.disk
    }

    /// Run one command line, writing its output to `out`.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> Result<Flow, ShellError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = words.first() else {
            return Ok(Flow::Continue);
        };
        let disk = &mut self.disk;
        let s = &mut self.session;

        match command {
            "ls" => {
                let listing = disk.ls(s)?;
                if listing.is_empty() {
                    writeln!(out, "Directory is Empty")?;
                }
                for entry in listing {
                    writeln!(out, "{entry}")?;
                }
            }
            "pwd" => writeln!(out, "{}", s.pwd())?,
            "cd" => {
                disk.cd(s, operand(&words, 1, "cd <dir>")?)?;
                writeln!(out, "{}", s.pwd())?;
            }
            "find" => {
                let found = disk.find(s, operand(&words, 1, "find <name>")?)?;
                if found.is_empty() {
                    writeln!(out, "No instance found")?;
                }
                for path in found {
                    writeln!(out, "{path}")?;
                }
            }
            "mkdir" => {
                disk.mkdir(s, operand(&words, 1, "mkdir <dir>")?)?;
                writeln!(out, "Directory has been created")?;
            }
            "rmdir" => {
                disk.rmdir(s, operand(&words, 1, "rmdir <dir>")?)?;
                writeln!(out, "Directory has been removed")?;
            }
            "rrmdir" | "drmdir" => {
                let counts = disk.rrmdir(s, operand(&words, 1, "rrmdir <dir>")?)?;
                writeln!(
                    out,
                    "Directory has been removed ({} files, {} directories)",
                    counts.files, counts.dirs
                )?;
            }
            "loadfile" => {
                let name = operand(&words, 1, "loadfile <file> <ext>")?;
                let ext = operand(&words, 2, "loadfile <file> <ext>")?;
                let bytes = self.loader.load(ext)?;
                disk.write_file(s, name, &bytes)?;
                writeln!(out, "File has been loaded")?;
            }
            "append" => {
                let ext = operand(&words, 1, "append <ext> <file>")?;
                let name = operand(&words, 2, "append <ext> <file>")?;
                let bytes = self.loader.load(ext)?;
                disk.append(s, name, &bytes)?;
                writeln!(out, "Content has been appended to the file")?;
            }
            "cp" => {
                let src = operand(&words, 1, "cp <src> <dst>")?;
                let dst = operand(&words, 2, "cp <src> <dst>")?;
                disk.cp(s, src, dst)?;
                writeln!(out, "File has been copied")?;
            }
            "cat" => {
                let bytes = disk.cat(s, operand(&words, 1, "cat <file>")?)?;
                for line in render_cat(&bytes) {
                    writeln!(out, "{line}")?;
                }
            }
            "rm" => {
                disk.rm(s, operand(&words, 1, "rm <file>")?)?;
                writeln!(out, "File has been removed")?;
            }
            "help" => writeln!(out, "{HELP}")?,
            "exit" | "quit" => return Ok(Flow::Exit),
            other => writeln!(out, "unknown command: {other} (try help)")?,
        }
        Ok(Flow::Continue)
    }
}
