//! Host-side layout: where disk images, the disk registry, and loadable
//! files live.
//!
//! ```text
//! <root>/DiskUnits/<name>          disk images
//! <root>/DiskUnits/DiskNames.txt   one registered disk name per line
//! <root>/Files/<name>              external files for loadfile/append
//! ```

use crate::disk::FileDisk;
use crate::session::Session;
use cfs_error::{CfsError, Result};
use cfs_types::Geometry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DISK_DIR: &str = "DiskUnits";
pub const REGISTRY_FILE: &str = "DiskNames.txt";
pub const FILES_DIR: &str = "Files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Host names must stay inside their directory.
fn check_host_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name == REGISTRY_FILE
        || name.contains(['/', '\\', '\0'])
    {
        return Err(CfsError::InvalidName(name.to_owned()));
    }
    Ok(())
}

impl StoreConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn disk_dir(&self) -> PathBuf {
        self.root.join(DISK_DIR)
    }

    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.disk_dir().join(REGISTRY_FILE)
    }

    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn disk_path(&self, name: &str) -> Result<PathBuf> {
        check_host_name(name)?;
        Ok(self.disk_dir().join(name))
    }

    pub fn file_path(&self, name: &str) -> Result<PathBuf> {
        check_host_name(name)?;
        Ok(self.files_dir().join(name))
    }
}

/// What `showdisks` reports for one registered name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for DiskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.block_size, self.capacity, &self.error) {
            (Some(bs), Some(cap), _) => {
                write!(f, "{} : BlockSize is {bs} Capacity is {cap}", self.name)
            }
            (_, _, Some(err)) => write!(f, "{} : {err}", self.name),
            _ => write!(f, "{}", self.name),
        }
    }
}

/// Registry of disk names kept beside the images.
///
/// The registry is a side catalogue: an image can exist without being
/// listed and vice versa. A missing registry file is an empty catalogue.
#[derive(Debug, Clone)]
pub struct DiskCatalog {
    config: StoreConfig,
}

impl DiskCatalog {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Registered names in registration order.
    pub fn list(&self) -> Result<Vec<String>> {
        match fs::read_to_string(self.config.registry_path()) {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, names: &[String]) -> Result<()> {
        fs::create_dir_all(self.config.disk_dir())?;
        let mut text = names.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(self.config.registry_path(), text)?;
        Ok(())
    }

    /// Register `name`. Already registered names are left alone.
    pub fn add(&self, name: &str) -> Result<()> {
        check_host_name(name)?;
        let mut names = self.list()?;
        if names.iter().any(|n| n == name) {
            return Ok(());
        }
        names.push(name.to_owned());
        self.store(&names)?;
        debug!(name, "disk_registered");
        Ok(())
    }

    /// Unregister `name`. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut names = self.list()?;
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        self.store(&names)?;
        debug!(name, "disk_unregistered");
        Ok(true)
    }

    /// Create image `name` and register it.
    pub fn create_disk(&self, name: &str, geometry: Geometry) -> Result<()> {
        let path = self.config.disk_path(name)?;
        fs::create_dir_all(self.config.disk_dir())?;
        FileDisk::create(&path, geometry)?;
        self.add(name)
    }

    /// Delete image `name` and drop it from the registry.
    pub fn delete_disk(&self, name: &str) -> Result<()> {
        let path = self.config.disk_path(name)?;
        FileDisk::delete(&path)?;
        self.remove(name)?;
        Ok(())
    }

    /// Mount image `name` with a fresh session at its root.
    pub fn mount_disk(&self, name: &str) -> Result<(FileDisk, Session)> {
        let path = self.config.disk_path(name)?;
        let disk = FileDisk::mount(&path)?;
        info!(name, "disk_mounted");
        Ok((disk, Session::new(name)))
    }

    /// Mount and unmount each registered disk to report its geometry.
    ///
    /// A disk that fails to open is reported with its error; the listing
    /// carries on.
    pub fn show_disks(&self) -> Result<Vec<DiskSummary>> {
        let mut summaries = Vec::new();
        for name in self.list()? {
            let summary = match self.mount_disk(&name).and_then(|(disk, _)| {
                let geometry = disk.geometry();
                disk.unmount()?;
                Ok(geometry)
            }) {
                Ok(geometry) => DiskSummary {
                    name,
                    block_size: Some(geometry.block_size()),
                    capacity: Some(geometry.capacity()),
                    error: None,
                },
                Err(err) => {
                    warn!(name, error = %err, "disk_unreadable");
                    DiskSummary {
                        name,
                        block_size: None,
                        capacity: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

/// Reads host files that seed file contents inside a disk.
#[derive(Debug, Clone)]
pub struct FileLoader {
    config: StoreConfig,
}

impl FileLoader {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Raw bytes of `<root>/Files/<name>`.
    pub fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.config.file_path(name)?;
        read_host_file(&path, name)
    }
}

fn read_host_file(path: &Path, name: &str) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => {
            debug!(path = %path.display(), len = bytes.len(), "host_file_loaded");
            Ok(bytes)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Err(CfsError::NotFound(name.to_owned())),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_add_is_idempotent_and_remove_reports_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = DiskCatalog::new(StoreConfig::new(dir.path()));
        assert!(catalog.list().expect("empty").is_empty());

        catalog.add("alpha").expect("add");
        catalog.add("beta").expect("add");
        catalog.add("alpha").expect("add again");
        assert_eq!(catalog.list().expect("list"), ["alpha", "beta"]);

        assert!(catalog.remove("alpha").expect("remove"));
        assert!(!catalog.remove("alpha").expect("remove again"));
        assert_eq!(catalog.list().expect("list"), ["beta"]);
    }

    #[test]
    fn host_names_cannot_escape_their_directory() {
        let config = StoreConfig::new("/tmp/store");
        for bad in ["", "..", "a/b", REGISTRY_FILE] {
            assert!(matches!(config.disk_path(bad), Err(CfsError::InvalidName(_))), "{bad:?}");
        }
        assert_eq!(
            config.disk_path("disk1").expect("path"),
            PathBuf::from("/tmp/store/DiskUnits/disk1")
        );
    }

    #[test]
    fn loader_reads_raw_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig::new(dir.path());
        fs::create_dir_all(config.files_dir()).expect("mkdir");
        fs::write(config.files_dir().join("poem"), b"line one\nline two\n").expect("write");

        let loader = FileLoader::new(config);
        assert_eq!(loader.load("poem").expect("load"), b"line one\nline two\n");
        assert!(matches!(loader.load("absent"), Err(CfsError::NotFound(_))));
    }

    #[test]
    fn summary_display_matches_showdisks_line() {
        let summary = DiskSummary {
            name: "disk1".into(),
            block_size: Some(256),
            capacity: Some(1024),
            error: None,
        };
        assert_eq!(summary.to_string(), "disk1 : BlockSize is 256 Capacity is 1024");
    }
}
