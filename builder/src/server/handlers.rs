//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::task::{Action, BuildRequest};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Ping response
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
    pub version: String,
}

/// Liveness handler
pub async fn ping_handler() -> impl IntoResponse {
    Json(PingResponse {
        message: "pong".to_string(),
        version: version_info().version,
    })
}

/// Body of `POST /trigger/build`
#[derive(Debug, Deserialize)]
pub struct TriggerBuildRequest {
    pub args: BuildRequest,
}

/// Body of the per-action deployment routes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub deployment_id: String,
}

/// Trigger response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub deployment_id: String,
    pub action: Action,
    pub accepted: bool,
    pub message: String,
}

/// Start any action
pub async fn trigger_build_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<TriggerBuildRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    Ok(dispatch(state, body.args))
}

/// Start a domain deployment
pub async fn deploy_domain_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<DeploymentRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    Ok(dispatch(
        state,
        BuildRequest::new(Action::DeployDomain, body.deployment_id),
    ))
}

/// Start a stack teardown
pub async fn destroy_stack_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<DeploymentRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&state, &headers)?;
    Ok(dispatch(
        state,
        BuildRequest::new(Action::DestroyStack, body.deployment_id),
    ))
}

fn authorize(state: &ServerState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if state.authorized(authorization) {
        Ok(())
    } else {
        warn!("Rejected unauthorized trigger");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Run the deployment in the background; the caller only learns whether
/// it was accepted
fn dispatch(state: Arc<ServerState>, request: BuildRequest) -> (StatusCode, Json<TriggerResponse>) {
    let deployment_id = request.deployment_id.clone();
    let action = request.action;

    if deployment_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(TriggerResponse {
                deployment_id,
                action,
                accepted: false,
                message: "deploymentId is required".to_string(),
            }),
        );
    }

    if !state.try_claim(&deployment_id) {
        warn!("Deployment {} is already running", deployment_id);
        return (
            StatusCode::CONFLICT,
            Json(TriggerResponse {
                deployment_id,
                action,
                accepted: false,
                message: "deployment is already running".to_string(),
            }),
        );
    }

    info!("Accepted {} for deployment {}", action, deployment_id);
    let task_state = state.clone();
    state.spawn_run(async move {
        let status = task_state.executor.execute(&request).await;
        info!(
            "Background {} for {} finished: {}",
            request.action, request.deployment_id, status
        );
        task_state.release(&request.deployment_id);
    });

    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            deployment_id,
            action,
            accepted: true,
            message: "started".to_string(),
        }),
    )
}
