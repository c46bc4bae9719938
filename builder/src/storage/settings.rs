//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::errors::BuildError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Builder settings, read once at startup
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_json: bool,

    /// Directory for the rolling operator log file
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Deployment environment name; `local` keeps workspaces around
    #[serde(default)]
    pub env: Option<String>,

    #[serde(default)]
    pub backend: BackendSettings,

    /// Overrides the layout's template directory
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,

    /// Overrides the layout's builds directory
    #[serde(default)]
    pub builds_dir: Option<PathBuf>,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub workspace_cleanup: CleanupPolicy,

    /// Push the log snapshot to the control plane after each tool command
    #[serde(default = "default_true")]
    pub stream_logs: bool,

    #[serde(default = "default_true")]
    pub refresh_before_mutation: bool,

    /// Download `{repository}/archive/refs/heads/{branch}.zip` directly
    /// instead of asking the control plane for a signed link
    #[serde(default)]
    pub direct_source_archives: bool,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

fn default_true() -> bool {
    true
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            env: None,
            backend: BackendSettings::default(),
            templates_dir: None,
            builds_dir: None,
            state: StateSettings::default(),
            workspace_cleanup: CleanupPolicy::default(),
            stream_logs: true,
            refresh_before_mutation: true,
            direct_source_archives: false,
            tools: ToolSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Read the settings file, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, BuildError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>()
            .await
            .map_err(|e| BuildError::ConfigError(format!("{}: {}", file.path().display(), e)))
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), BuildError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.parse().map_err(BuildError::ConfigError)?;
        }
        if let Some(dir) = get("EXOBASE_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(env) = get("EXO_ENV") {
            self.env = Some(env);
        }
        if let Some(url) = get("EXOBASE_API_URL") {
            self.backend.base_url = url;
        }
        if let Some(token) = get("EXOBASE_TOKEN") {
            self.backend.token = SecretString::from(token);
        }
        if let Some(dir) = get("EXO_TEMPLATES_DIR") {
            self.templates_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("EXO_BUILDS_DIR") {
            self.builds_dir = Some(PathBuf::from(dir));
        }
        if let Some(key_id) = get("EXO_STATE_ACCESS_KEY_ID") {
            self.state.access_key_id = SecretString::from(key_id);
        }
        if let Some(key) = get("EXO_STATE_ACCESS_KEY") {
            self.state.secret_access_key = SecretString::from(key);
        }
        if let Some(passphrase) = get("EXO_STATE_PASSPHRASE") {
            self.state.passphrase = SecretString::from(passphrase);
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| BuildError::ConfigError(format!("Invalid PORT: {}", port)))?;
        }
        if let Some(key) = get("EXO_BUILDER_API_KEY") {
            self.server.api_key = Some(SecretString::from(key));
        }

        if self.is_local() {
            self.workspace_cleanup = CleanupPolicy::Never;
        }

        Ok(())
    }

    pub fn is_local(&self) -> bool {
        self.env.as_deref() == Some("local")
    }
}

/// Control-plane API settings
#[derive(Debug, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub token: SecretString,
}

fn default_backend_url() -> String {
    "http://localhost:7700".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            token: empty_secret(),
        }
    }
}

/// Operator-owned remote state backend
#[derive(Debug, Deserialize)]
pub struct StateSettings {
    #[serde(default = "default_state_bucket")]
    pub bucket: String,

    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    #[serde(default = "default_state_region")]
    pub region: String,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub access_key_id: SecretString,

    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub secret_access_key: SecretString,

    /// Pulumi secrets passphrase
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub passphrase: SecretString,
}

fn default_state_bucket() -> String {
    "exobase-tf-state".to_string()
}

fn default_lock_table() -> String {
    "exobase-tf-state-lock".to_string()
}

fn default_state_region() -> String {
    "us-east-1".to_string()
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            bucket: default_state_bucket(),
            lock_table: default_lock_table(),
            region: default_state_region(),
            access_key_id: empty_secret(),
            secret_access_key: empty_secret(),
            passphrase: empty_secret(),
        }
    }
}

/// When the finalizer removes a deployment's workspace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    Always,
    /// Keep failed workspaces for diagnosis
    OnSuccess,
    Never,
}

/// Infra tool binaries
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,

    #[serde(default = "default_pulumi_bin")]
    pub pulumi_bin: String,
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_pulumi_bin() -> String {
    "pulumi".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            terraform_bin: default_terraform_bin(),
            pulumi_bin: default_pulumi_bin(),
        }
    }
}

/// Trigger server settings
#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bearer key required by the trigger routes when set
    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub api_key: Option<SecretString>,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    7705
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            api_key: None,
        }
    }
}
