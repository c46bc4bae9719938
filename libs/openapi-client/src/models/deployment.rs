use serde::{Deserialize, Serialize};

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Canceled,
    InProgress,
    Success,
    PartialSuccess,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Canceled => "canceled",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::PartialSuccess => "partial_success",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed out of this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Canceled
                | DeploymentStatus::Success
                | DeploymentStatus::PartialSuccess
                | DeploymentStatus::Failed
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the deployment status ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerItem {
    pub status: DeploymentStatus,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    pub source: String,
}

/// Whether the deployment provisions or tears down infrastructure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    #[default]
    Create,
    Destroy,
}

/// Deployment record as the control plane stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    #[serde(default, rename = "type")]
    pub deployment_type: DeploymentType,
    #[serde(default = "default_status")]
    pub status: DeploymentStatus,
    #[serde(default)]
    pub ledger: Vec<LedgerItem>,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
}

fn default_status() -> DeploymentStatus {
    DeploymentStatus::Queued
}

/// A callable function discovered in deployed source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    pub function: String,
}

/// Attributes reported once a deployment resolves its outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
    pub functions: Vec<FunctionRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// `deployments.getContext`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetContextRequest {
    pub deployment_id: String,
}

/// `deployments.updateStatus`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub deployment_id: String,
    pub status: DeploymentStatus,
    pub source: String,
}

/// `deployments.updateLogs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLogsRequest {
    pub deployment_id: String,
    pub logs: String,
}

/// `deployments.updateAttributes`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttributesRequest {
    pub deployment_id: String,
    pub attributes: DeploymentAttributes,
}

/// `units.getSourceDownloadLink`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDownloadLinkRequest {
    pub service_id: String,
    pub platform_id: String,
    pub deployment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDownloadLink {
    pub url: String,
}

/// `units.setBuildPackVersion`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBuildPackVersionRequest {
    pub platform_id: String,
    pub service_id: String,
    pub version: String,
}
