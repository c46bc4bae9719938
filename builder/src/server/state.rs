//! Server state

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinSet;
use tracing::info;

use crate::deploy::executor::DeploymentExecutor;
use crate::utils::safe_name;

/// Server state shared across handlers
pub struct ServerState {
    pub executor: Arc<DeploymentExecutor>,
    api_key: Option<SecretString>,
    /// Claimed workspace names, so ids that map to the same workspace
    /// cannot run side by side
    in_flight: Mutex<HashSet<String>>,
    runs: Mutex<JoinSet<()>>,
}

impl ServerState {
    pub fn new(executor: Arc<DeploymentExecutor>, api_key: Option<SecretString>) -> Self {
        Self {
            executor,
            api_key,
            in_flight: Mutex::new(HashSet::new()),
            runs: Mutex::new(JoinSet::new()),
        }
    }

    /// Mark `deployment_id` as running. Returns false if it, or another id
    /// with the same workspace, already is.
    pub fn try_claim(&self, deployment_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(safe_name(deployment_id))
    }

    pub fn release(&self, deployment_id: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&safe_name(deployment_id));
    }

    pub fn is_running(&self, deployment_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&safe_name(deployment_id))
    }

    /// Run a deployment in the background, tracked until it finishes
    pub fn spawn_run<F>(&self, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        while runs.try_join_next().is_some() {}
        runs.spawn(run);
    }

    /// Wait for every background deployment, including ones started while
    /// waiting, to report its terminal status
    pub async fn wait_for_runs(&self) {
        loop {
            let mut runs = std::mem::take(&mut *self.runs.lock().unwrap_or_else(|e| e.into_inner()));
            if runs.is_empty() {
                return;
            }
            info!("Waiting for {} running deployment(s) to finish", runs.len());
            while runs.join_next().await.is_some() {}
        }
    }

    /// Check an `Authorization` header value against the configured key
    pub fn authorized(&self, authorization: Option<&str>) -> bool {
        let Some(key) = &self.api_key else {
            return true;
        };
        authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token == key.expose_secret())
            .unwrap_or(false)
    }
}
