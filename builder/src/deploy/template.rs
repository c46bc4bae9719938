//! Template package lookup and preparation

use std::sync::OnceLock;

use openapi_client::{DeploymentContext, PackManifest};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::BuildError;
use crate::filesys::dir::Dir;
use crate::models::task::Action;
use crate::utils::safe_name;

/// Manifest file a build pack may ship at its root
pub const MANIFEST_FILE: &str = "pack.json";

const PROJECT_FILES: [&str; 2] = ["Pulumi.yaml", "Pulumi.yml"];

/// Template keys to try for `action`, most specific first
pub fn candidate_keys(action: Action, context: &DeploymentContext) -> Vec<String> {
    let service = &context.service;
    match action {
        Action::DeployDomain => {
            let provider = context
                .domain
                .as_ref()
                .map(|d| d.provider.as_str())
                .unwrap_or(service.provider.as_str());
            vec![format!("exo-domain-{}", provider)]
        }
        Action::ExecutePack => context
            .config
            .pack
            .as_ref()
            .map(|pack| vec![pack.name.clone()])
            .unwrap_or_default(),
        Action::DeployStack | Action::DestroyStack => {
            let base = format!(
                "exo-{}-{}-{}",
                service.service_type, service.provider, service.service
            );
            match service.language.as_deref().filter(|l| !l.is_empty()) {
                Some(language) => vec![format!("{}-{}", base, language), base],
                None => vec![base],
            }
        }
    }
}

/// First candidate present in `available`
pub fn resolve_key(available: &[String], candidates: &[String]) -> Result<String, BuildError> {
    candidates
        .iter()
        .find(|key| available.iter().any(|a| a == *key))
        .cloned()
        .ok_or_else(|| BuildError::TemplateNotFound {
            tried: candidates.to_vec(),
        })
}

/// Installed template packages, one directory per key
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    dir: Dir,
}

impl TemplateRegistry {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub async fn available(&self) -> Result<Vec<String>, BuildError> {
        if !self.dir.exists().await {
            warn!("Templates directory {} does not exist", self.dir.path().display());
            return Ok(Vec::new());
        }
        self.dir.child_dir_names().await
    }

    /// Directory of the first installed template matching `candidates`
    pub async fn resolve(&self, candidates: &[String]) -> Result<Dir, BuildError> {
        let available = self.available().await?;
        let key = resolve_key(&available, candidates)?;
        info!("Using template {}", key);
        Ok(self.dir.subdir(&key))
    }
}

/// Read `pack.json` from a template directory, if present
pub async fn read_manifest(dir: &Dir) -> Result<Option<PackManifest>, BuildError> {
    let file = dir.file(MANIFEST_FILE);
    if !file.exists().await {
        return Ok(None);
    }
    let manifest: PackManifest = file.read_json().await?;
    debug!(
        "Loaded manifest {} {}",
        manifest.name.as_deref().unwrap_or("?"),
        manifest.version.as_deref().unwrap_or("?")
    );
    Ok(Some(manifest))
}

fn project_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"exobase-(.+?)-template").expect("placeholder regex is valid"))
}

/// Project name used for a platform's service
pub fn project_name(context: &DeploymentContext) -> String {
    safe_name(&format!("{}_{}", context.platform.id, context.service.id))
}

/// Replace the `exobase-<x>-template` placeholder in the Pulumi project
/// file so every service gets its own project. Returns whether a file was
/// rewritten.
pub async fn rewrite_project_name(dir: &Dir, name: &str) -> Result<bool, BuildError> {
    for file_name in PROJECT_FILES {
        let file = dir.file(file_name);
        if !file.exists().await {
            continue;
        }
        let contents = file.read_string().await?;
        if !project_placeholder().is_match(&contents) {
            continue;
        }
        let rewritten = project_placeholder().replace_all(&contents, name);
        file.write_string(&rewritten).await?;
        debug!("Rewrote project name in {} to {}", file_name, name);
        return Ok(true);
    }
    Ok(false)
}
