//! Finite state machine for deployment status
//!
//! `queued → in_progress → {success | partial_success | failed}`, with
//! `canceled` reachable only from `queued`. Every accepted transition is
//! appended to the ledger; entries are never rewritten.

use chrono::Utc;
use openapi_client::{DeploymentStatus, LedgerItem};

use crate::errors::BuildError;

/// Status plus its append-only ledger for one deployment attempt
#[derive(Debug, Clone)]
pub struct StatusLedger {
    deployment_id: String,
    status: DeploymentStatus,
    entries: Vec<LedgerItem>,
}

impl StatusLedger {
    /// Start a ledger from the status the control plane reported
    pub fn new(deployment_id: impl Into<String>, status: DeploymentStatus) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            status,
            entries: Vec::new(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn entries(&self) -> &[LedgerItem] {
        &self.entries
    }

    pub fn can_transition(&self, to: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self.status, to),
            (Queued, InProgress)
                | (Queued, Canceled)
                | (InProgress, Success)
                | (InProgress, PartialSuccess)
                | (InProgress, Failed)
        )
    }

    /// Move to `to`, recording `source` in the ledger
    pub fn transition(&mut self, to: DeploymentStatus, source: &str) -> Result<&LedgerItem, BuildError> {
        if !self.can_transition(to) {
            return Err(BuildError::InvalidTransition(format!(
                "{}: {} -> {}",
                self.deployment_id, self.status, to
            )));
        }

        self.status = to;
        self.entries.push(LedgerItem {
            status: to,
            timestamp: Utc::now().timestamp_millis(),
            source: source.to_string(),
        });
        Ok(&self.entries[self.entries.len() - 1])
    }
}
