//! Error types for the stack builder

use thiserror::Error;

/// Main error type for the stack builder
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid task arguments: {0}")]
    TaskArgsError(String),

    #[error(
        "Could not find a suitable template to create service stack. Tried {}",
        .tried.join(" and ")
    )]
    TemplateNotFound { tried: Vec<String> },

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Unexpected archive layout: {0}")]
    ArchiveLayout(String),

    #[error("Workspace error: {0}")]
    WorkspaceError(String),

    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Failed to start process: {0}")]
    SpawnError(String),

    #[error("{tool} {op} failed with exit code {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ToolFailed {
        tool: String,
        op: String,
        code: Option<i32>,
    },

    #[error("Build hook failed: {0}")]
    HookFailed(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
