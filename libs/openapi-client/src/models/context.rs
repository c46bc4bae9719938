use serde::{Deserialize, Serialize};

use super::deployment::Deployment;

/// Snapshot of everything a build needs to know about one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentContext {
    pub platform: Platform,
    #[serde(alias = "unit")]
    pub service: Service,
    #[serde(default)]
    pub environment: Option<Environment>,
    pub deployment: Deployment,
    #[serde(default)]
    pub config: ResolvedConfig,
    #[serde(default)]
    pub provider: ProviderCredentials,
    #[serde(default)]
    pub domain: Option<Domain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
}

/// The service (unit) being deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Cloud provider, e.g. `aws`
    pub provider: String,
    /// Cloud service, e.g. `lambda`
    pub service: String,
    /// Exobase service type, e.g. `api`
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source: Option<SourceLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    pub repository: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub domain: String,
    pub provider: String,
}

/// Configuration resolved by the control plane for this deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    #[serde(default)]
    pub stack: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub pack: Option<BuildPackRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

/// Build pack selected for a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPackRef {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Archive URL of the pack; installed templates are used when absent
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub manifest: PackManifest,
}

/// Contents of a build pack's `pack.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub inputs: Vec<PackInput>,
    #[serde(default)]
    pub build: Option<BuildHooks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackInput {
    pub name: String,
    #[serde(default)]
    pub ui: InputKind,
}

/// How a pack input is rendered into the variable file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    String,
    Number,
    Envars,
    Bool,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildHooks {
    #[serde(default)]
    pub before: Option<String>,
}

/// Credentials for the customer's cloud account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub aws: Option<AwsCredentials>,
    #[serde(default)]
    pub gcp: Option<GcpCredentials>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &"[REDACTED]")
            .field("access_key_secret", &"[REDACTED]")
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpCredentials {
    pub json_credentials: String,
}

impl std::fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("json_credentials", &"[REDACTED]")
            .finish()
    }
}
