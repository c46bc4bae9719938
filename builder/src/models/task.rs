//! Task arguments handed to a build run

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::errors::BuildError;

/// What a build run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    DeployStack,
    DestroyStack,
    DeployDomain,
    ExecutePack,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::DeployStack => "deploy-stack",
            Action::DestroyStack => "destroy-stack",
            Action::DeployDomain => "deploy-domain",
            Action::ExecutePack => "execute-pack",
        }
    }

    /// Ledger source tag for status updates made by this action
    pub fn source_tag(&self) -> String {
        format!("builder.{}", self.as_str())
    }

    /// Whether the run needs the service's source code
    pub fn needs_source(&self) -> bool {
        matches!(self, Action::DeployStack | Action::ExecutePack)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy-stack" => Ok(Action::DeployStack),
            "destroy-stack" => Ok(Action::DestroyStack),
            "deploy-domain" => Ok(Action::DeployDomain),
            "execute-pack" => Ok(Action::ExecutePack),
            _ => Err(BuildError::TaskArgsError(format!("unknown action: {}", s))),
        }
    }
}

/// One deployment to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub action: Action,
    pub deployment_id: String,
    /// Set when the run was scheduled as a build pack task
    #[serde(skip)]
    pub scope: Option<TaskScope>,
}

impl BuildRequest {
    pub fn new(action: Action, deployment_id: impl Into<String>) -> Self {
        Self {
            action,
            deployment_id: deployment_id.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: TaskScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Workspace, platform and unit a build pack task was scheduled for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScope {
    pub workspace_id: String,
    pub platform_id: String,
    pub unit_id: String,
}

impl TaskScope {
    /// Refuse a deployment context that belongs to another platform or unit
    pub fn check(&self, platform_id: &str, unit_id: &str) -> Result<(), BuildError> {
        if self.platform_id != platform_id {
            return Err(BuildError::ConfigError(format!(
                "Task is for platform {} but the deployment belongs to platform {}",
                self.platform_id, platform_id
            )));
        }
        if self.unit_id != unit_id {
            return Err(BuildError::ConfigError(format!(
                "Task is for unit {} but the deployment belongs to unit {}",
                self.unit_id, unit_id
            )));
        }
        Ok(())
    }
}

/// Build pack run scheduled by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackTaskArgs {
    pub deployment_id: String,
    pub workspace_id: String,
    pub platform_id: String,
    pub unit_id: String,
}

/// Contents of the `TASK_ARGS` variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskArgs {
    Action(BuildRequest),
    Pack(PackTaskArgs),
}

impl TaskArgs {
    /// Decode base64 encoded JSON
    pub fn decode(encoded: &str) -> Result<Self, BuildError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| BuildError::TaskArgsError(format!("not base64: {}", e)))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            BuildError::TaskArgsError(format!(
                "expected {{action, deploymentId}} or a build pack task: {}",
                e
            ))
        })
    }

    pub fn into_request(self) -> BuildRequest {
        match self {
            TaskArgs::Action(request) => request,
            TaskArgs::Pack(pack) => BuildRequest::new(Action::ExecutePack, pack.deployment_id)
                .with_scope(TaskScope {
                    workspace_id: pack.workspace_id,
                    platform_id: pack.platform_id,
                    unit_id: pack.unit_id,
                }),
        }
    }
}
