//! Main application entry points

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use openapi_client::DeploymentStatus;
use reqwest::Client;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::runner::ProcessRunner;
use crate::deploy::source::HttpArchiveFetcher;
use crate::errors::BuildError;
use crate::http::client::HttpClient;
use crate::models::task::BuildRequest;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Wire the production executor: HTTP control plane, child processes and
/// streamed archive downloads
pub async fn init_executor(options: &mut AppOptions) -> Result<DeploymentExecutor, BuildError> {
    let token = std::mem::replace(
        &mut options.backend_token,
        secrecy::SecretString::from(String::new()),
    );
    let control_plane = HttpClient::new(&options.backend_base_url, token)?;

    let downloads = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    options.executor.builds_dir.create().await.map_err(|e| {
        BuildError::ConfigError(format!(
            "Cannot create builds directory {}: {}",
            options.executor.builds_dir.path().display(),
            e
        ))
    })?;
    if let Some(dir) = &options.executor.deployment_logs_dir {
        dir.create().await?;
    }

    Ok(DeploymentExecutor::new(
        Arc::new(control_plane),
        Arc::new(ProcessRunner::new()),
        Arc::new(HttpArchiveFetcher::new(downloads)),
        options.executor.clone(),
    ))
}

/// Run a single deployment and return its terminal status
pub async fn run_task(
    mut options: AppOptions,
    request: BuildRequest,
) -> Result<DeploymentStatus, BuildError> {
    let executor = init_executor(&mut options).await?;
    let status = executor.execute(&request).await;
    info!(
        "{} for deployment {} finished: {}",
        request.action, request.deployment_id, status
    );
    Ok(status)
}

/// Serve trigger routes until `shutdown_signal` resolves, then wait for
/// the deployments already started
pub async fn run_server(
    mut options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BuildError> {
    info!("Initializing stack builder server...");

    let executor = Arc::new(init_executor(&mut options).await?);
    let state = Arc::new(ServerState::new(executor, options.server.api_key.take()));

    let handle = serve(&options.server, state.clone(), shutdown_signal).await?;
    let served = match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!("Server task failed: {}", e);
            Err(BuildError::ServerError(e.to_string()))
        }
    };

    // accepted deployments still owe the control plane a terminal status
    state.wait_for_runs().await;
    served
}
