//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the builder
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Installed template packages, one directory per template key
    pub fn templates_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("build-packs").join("packages"))
    }

    /// Parent of every per-deployment workspace
    pub fn builds_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("EXO_BUILDER_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/opt/exobase/builder"));
        Self::new(base_dir)
    }
}
