//! Source acquisition
//!
//! Source code arrives as a zip archive holding exactly one top-level
//! directory (the layout produced by VCS archive exports). The archive is
//! downloaded into the workspace, checked, extracted and its root renamed
//! to `source/`.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use openapi_client::DeploymentContext;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::deploy::workspace::{Workspace, SOURCE_DIR};
use crate::errors::BuildError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::http::deployments::ControlPlane;

const SOURCE_ARCHIVE: &str = "source.zip";
const PACK_ARCHIVE: &str = "pack.zip";
const PACK_STAGING: &str = ".pack-staging";

/// Where a deployment's source archive comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Short-lived link issued by the control plane
    SignedLink {
        service_id: String,
        platform_id: String,
        deployment_id: String,
    },
    /// Archive URL fetched directly
    Archive { url: String },
}

impl SourceRef {
    /// Pick the source reference for a context. With `direct` set the
    /// repository's branch archive is fetched without asking the control
    /// plane for a link.
    pub fn for_context(context: &DeploymentContext, direct: bool) -> Result<Self, BuildError> {
        if direct {
            let location = context.service.source.as_ref().ok_or_else(|| {
                BuildError::DownloadError(format!(
                    "service {} has no source repository",
                    context.service.id
                ))
            })?;
            return Ok(SourceRef::Archive {
                url: format!(
                    "{}/archive/refs/heads/{}.zip",
                    location.repository.trim_end_matches('/'),
                    location.branch
                ),
            });
        }

        Ok(SourceRef::SignedLink {
            service_id: context.service.id.clone(),
            platform_id: context.platform.id.clone(),
            deployment_id: context.deployment.id.clone(),
        })
    }

    /// Resolve to a downloadable URL
    pub async fn url(&self, control_plane: &dyn ControlPlane) -> Result<String, BuildError> {
        match self {
            SourceRef::Archive { url } => Ok(url.clone()),
            SourceRef::SignedLink {
                service_id,
                platform_id,
                deployment_id,
            } => {
                let link = control_plane
                    .get_source_download_link(service_id, platform_id, deployment_id)
                    .await
                    .map_err(|e| {
                        BuildError::DownloadError(format!("failed to get source download link: {}", e))
                    })?;
                Ok(link.url)
            }
        }
    }
}

/// Downloads an archive to a local file
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Write the body at `url` into `dest`, returning the byte count
    async fn fetch(&self, url: &str, dest: &File) -> Result<u64, BuildError>;
}

/// Streams archives over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpArchiveFetcher {
    client: Client,
}

impl HttpArchiveFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, url: &str, dest: &File) -> Result<u64, BuildError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BuildError::DownloadError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BuildError::DownloadError(format!(
                "GET {} returned {}",
                redact_query(url),
                status
            )));
        }

        let mut file = tokio::fs::File::create(dest.path()).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BuildError::DownloadError(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Signed links carry credentials in the query string
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Download the source archive for `source` and extract it to
/// `{workspace}/source`
pub async fn acquire(
    source: &SourceRef,
    control_plane: &dyn ControlPlane,
    fetcher: &dyn ArchiveFetcher,
    workspace: &Workspace,
) -> Result<Dir, BuildError> {
    let url = source.url(control_plane).await?;
    let archive = workspace.dir().file(SOURCE_ARCHIVE);

    info!("Downloading source archive from {}", redact_query(&url));
    let size = fetcher.fetch(&url, &archive).await?;
    debug!("Downloaded {} bytes", size);

    let root = extract(&archive, workspace.dir()).await?;
    let source_dir = workspace
        .dir()
        .subdir(&root)
        .rename(workspace.source_dir().path())
        .await?;
    archive.delete().await?;

    info!("Extracted source into {}/", SOURCE_DIR);
    Ok(source_dir)
}

/// Download a remote build pack and copy its contents into `dest`
pub async fn flatten_pack(fetcher: &dyn ArchiveFetcher, url: &str, dest: &Dir) -> Result<(), BuildError> {
    let archive = dest.file(PACK_ARCHIVE);
    let staging = dest.subdir(PACK_STAGING);

    info!("Downloading build pack from {}", redact_query(url));
    fetcher.fetch(url, &archive).await?;
    let root = extract(&archive, &staging).await?;
    staging.subdir(&root).copy_contents_to(dest).await?;

    staging.delete().await?;
    archive.delete().await?;
    Ok(())
}

/// Extract `archive` into `dest`, returning the name of its single
/// top-level directory
pub async fn extract(archive: &File, dest: &Dir) -> Result<String, BuildError> {
    let archive = archive.path().to_path_buf();
    let dest = dest.path().to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| BuildError::Internal(format!("extraction task failed: {}", e)))?
}

fn extract_blocking(archive: &Path, dest: &Path) -> Result<String, BuildError> {
    let reader = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(reader)?;

    let root = single_root(&mut zip)?;
    std::fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut file)?;
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode & 0o777));
            }
        }
    }

    Ok(root)
}

/// The archive's only top-level entry, which must be a directory
fn single_root<R: std::io::Read + std::io::Seek>(zip: &mut zip::ZipArchive<R>) -> Result<String, BuildError> {
    let mut roots = BTreeSet::new();
    let mut root_files = BTreeSet::new();

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let Some(path) = entry.enclosed_name() else {
            continue;
        };
        let path: PathBuf = path.components().filter(|c| matches!(c, Component::Normal(_))).collect();
        let mut components = path.components();
        let Some(first) = components.next() else {
            continue;
        };
        let first = first.as_os_str().to_string_lossy().into_owned();
        if components.next().is_none() && !entry.is_dir() {
            root_files.insert(first.clone());
        }
        roots.insert(first);
    }

    if roots.len() != 1 {
        return Err(BuildError::ArchiveLayout(format!(
            "expected exactly one top-level directory, found {}",
            roots.len()
        )));
    }
    let root = roots.into_iter().next().unwrap_or_default();
    if root_files.contains(&root) {
        return Err(BuildError::ArchiveLayout(format!(
            "top-level entry {} is a file, not a directory",
            root
        )));
    }
    Ok(root)
}
