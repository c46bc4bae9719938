//! Per-deployment working directories

use std::path::Path;

use tracing::{debug, info, warn};

use crate::errors::BuildError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::utils::safe_name;

/// Name the extracted source directory is renamed to
pub const SOURCE_DIR: &str = "source";

/// Name of the context snapshot inside a workspace
pub const CONTEXT_FILE: &str = "context.json";

/// Creates workspaces under the builds directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    builds_dir: Dir,
}

impl WorkspaceManager {
    pub fn new(builds_dir: Dir) -> Self {
        Self { builds_dir }
    }

    /// Deterministic location of a deployment's workspace
    pub fn path_for(&self, deployment_id: &str) -> Dir {
        self.builds_dir.subdir(&safe_name(deployment_id))
    }

    /// Create an empty workspace for `deployment_id`.
    ///
    /// The returned path is always absolute: tools run with the workspace
    /// as their working directory and are handed paths inside it.
    /// A directory left behind by an earlier attempt for the same id is
    /// removed first; callers serialize runs per deployment id.
    pub async fn create(&self, deployment_id: &str) -> Result<Workspace, BuildError> {
        let relative = self.path_for(deployment_id);
        let dir = std::path::absolute(relative.path()).map(Dir::new).map_err(|e| {
            BuildError::WorkspaceError(format!(
                "Cannot resolve {}: {}",
                relative.path().display(),
                e
            ))
        })?;
        if dir.exists().await {
            warn!("Removing stale workspace {}", dir.path().display());
            dir.delete().await?;
        }
        dir.create().await.map_err(|e| {
            BuildError::WorkspaceError(format!("Failed to create {}: {}", dir.path().display(), e))
        })?;

        info!("Created workspace {}", dir.path().display());
        Ok(Workspace { dir })
    }
}

/// An exclusively owned working directory for one deployment attempt
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: Dir,
}

impl Workspace {
    pub fn dir(&self) -> &Dir {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_dir(&self) -> Dir {
        self.dir.subdir(SOURCE_DIR)
    }

    pub fn context_file(&self) -> File {
        self.dir.file(CONTEXT_FILE)
    }

    /// Copy a template package into the workspace
    pub async fn copy_template(&self, template: &Dir) -> Result<(), BuildError> {
        debug!(
            "Copying template {} into {}",
            template.path().display(),
            self.path().display()
        );
        template.copy_contents_to(&self.dir).await.map_err(|e| {
            BuildError::WorkspaceError(format!(
                "Failed to copy template {}: {}",
                template.path().display(),
                e
            ))
        })
    }

    /// Remove the workspace. Failures are logged, never returned.
    pub async fn destroy(&self) {
        match self.dir.delete().await {
            Ok(()) => info!("Removed workspace {}", self.path().display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path().display(), e),
        }
    }
}
