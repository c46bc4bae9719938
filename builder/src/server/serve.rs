//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::BuildError;
use crate::server::handlers::{
    deploy_domain_handler, destroy_stack_handler, ping_handler, trigger_build_handler,
};
use crate::server::state::ServerState;

/// Routes of the trigger server
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/trigger/build", post(trigger_build_handler))
        .route("/deployments/deploy-domain", post(deploy_domain_handler))
        .route("/deployments/destroy-stack", post(destroy_stack_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), BuildError>>, BuildError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting trigger server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BuildError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| BuildError::ServerError(e.to_string()))
    });

    Ok(handle)
}
