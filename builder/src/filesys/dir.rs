//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::BuildError;
use crate::filesys::file::File;

/// A directory wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), BuildError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents. Missing directories are fine.
    pub async fn delete(&self) -> Result<(), BuildError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of the immediate subdirectories, sorted
    pub async fn child_dir_names(&self) -> Result<Vec<String>, BuildError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Recursively copy everything inside this directory into `dest`
    /// (the equivalent of `cp -a src/. dest`).
    pub async fn copy_contents_to(&self, dest: &Dir) -> Result<(), BuildError> {
        let mut pending = vec![(self.path.clone(), dest.path.clone())];

        while let Some((from, to)) = pending.pop() {
            fs::create_dir_all(&to).await?;
            let mut entries = fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                let target = to.join(entry.file_name());
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    fs::copy(entry.path(), &target).await?;
                }
            }
        }

        Ok(())
    }

    /// Move this directory to a new path
    pub async fn rename(&self, to: impl Into<PathBuf>) -> Result<Dir, BuildError> {
        let to = to.into();
        fs::rename(&self.path, &to).await?;
        Ok(Dir::new(to))
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}
