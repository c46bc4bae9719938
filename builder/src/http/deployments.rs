//! Control-plane operations used by the builder

use async_trait::async_trait;
use serde_json::Value;

use openapi_client::{
    DeploymentAttributes, DeploymentContext, DeploymentStatus, GetContextRequest,
    SetBuildPackVersionRequest, SourceDownloadLink, SourceDownloadLinkRequest,
    UpdateAttributesRequest, UpdateLogsRequest, UpdateStatusRequest,
};

use crate::errors::BuildError;
use crate::http::client::HttpClient;

/// Deployment context as fetched: the typed view plus the raw document,
/// which is what gets written into the workspace
#[derive(Debug, Clone)]
pub struct FetchedContext {
    pub raw: Value,
    pub context: DeploymentContext,
}

impl FetchedContext {
    /// Accepts either the context itself or `{ "context": ... }`
    pub fn from_data(data: Value) -> Result<Self, BuildError> {
        let raw = match data {
            Value::Object(mut map) if map.contains_key("context") && !map.contains_key("platform") => {
                map.remove("context").unwrap_or(Value::Null)
            }
            other => other,
        };
        let context = serde_json::from_value(raw.clone())
            .map_err(|e| BuildError::ApiError(format!("invalid deployment context: {}", e)))?;
        Ok(Self { raw, context })
    }
}

/// Control-plane API as seen by the deployment executor
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_context(&self, deployment_id: &str) -> Result<FetchedContext, BuildError>;

    async fn update_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        source: &str,
    ) -> Result<(), BuildError>;

    async fn update_logs(&self, deployment_id: &str, logs: &str) -> Result<(), BuildError>;

    async fn update_attributes(
        &self,
        deployment_id: &str,
        attributes: &DeploymentAttributes,
    ) -> Result<(), BuildError>;

    async fn get_source_download_link(
        &self,
        service_id: &str,
        platform_id: &str,
        deployment_id: &str,
    ) -> Result<SourceDownloadLink, BuildError>;

    async fn set_build_pack_version(
        &self,
        platform_id: &str,
        service_id: &str,
        version: &str,
    ) -> Result<(), BuildError>;
}

#[async_trait]
impl ControlPlane for HttpClient {
    async fn get_context(&self, deployment_id: &str) -> Result<FetchedContext, BuildError> {
        let request = GetContextRequest {
            deployment_id: deployment_id.to_string(),
        };
        let data: Value = self.call("deployments", "getContext", &request).await?;
        FetchedContext::from_data(data)
    }

    async fn update_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        source: &str,
    ) -> Result<(), BuildError> {
        let request = UpdateStatusRequest {
            deployment_id: deployment_id.to_string(),
            status,
            source: source.to_string(),
        };
        self.send("deployments", "updateStatus", &request).await?;
        Ok(())
    }

    async fn update_logs(&self, deployment_id: &str, logs: &str) -> Result<(), BuildError> {
        let request = UpdateLogsRequest {
            deployment_id: deployment_id.to_string(),
            logs: logs.to_string(),
        };
        self.send("deployments", "updateLogs", &request).await?;
        Ok(())
    }

    async fn update_attributes(
        &self,
        deployment_id: &str,
        attributes: &DeploymentAttributes,
    ) -> Result<(), BuildError> {
        let request = UpdateAttributesRequest {
            deployment_id: deployment_id.to_string(),
            attributes: attributes.clone(),
        };
        self.send("deployments", "updateAttributes", &request).await?;
        Ok(())
    }

    async fn get_source_download_link(
        &self,
        service_id: &str,
        platform_id: &str,
        deployment_id: &str,
    ) -> Result<SourceDownloadLink, BuildError> {
        let request = SourceDownloadLinkRequest {
            service_id: service_id.to_string(),
            platform_id: platform_id.to_string(),
            deployment_id: deployment_id.to_string(),
        };
        self.call("units", "getSourceDownloadLink", &request).await
    }

    async fn set_build_pack_version(
        &self,
        platform_id: &str,
        service_id: &str,
        version: &str,
    ) -> Result<(), BuildError> {
        let request = SetBuildPackVersionRequest {
            platform_id: platform_id.to_string(),
            service_id: service_id.to_string(),
            version: version.to_string(),
        };
        self.send("units", "setBuildPackVersion", &request).await?;
        Ok(())
    }
}
