//! Terminal status classification

use std::sync::OnceLock;

use openapi_client::DeploymentStatus;
use regex::Regex;

/// Markers the infra tools print once they have changed real resources.
/// Pulumi summarises as `+ 3 created` / `~ 1 updated`; Terraform prints a
/// line per resource (`aws_lambda_function.api: Creation complete after 2s`).
fn mutation_markers() -> &'static Regex {
    static MARKERS: OnceLock<Regex> = OnceLock::new();
    MARKERS.get_or_init(|| {
        Regex::new(
            r"(?im)\b[1-9]\d*\s+(?:resources?\s+)?(?:created|updated)\b|:\s+(?:creation|modifications)\s+complete\b",
        )
        .expect("mutation marker regex is valid")
    })
}

/// Whether the log shows at least one resource was created or updated
pub fn shows_partial_mutation(logs: &str) -> bool {
    mutation_markers().is_match(logs)
}

/// Final status of a run.
///
/// A run that failed after the tool reported created or updated resources
/// is `partial_success`: something now exists and needs attention.
pub fn classify(failed: bool, logs: &str) -> DeploymentStatus {
    if !failed {
        DeploymentStatus::Success
    } else if shows_partial_mutation(logs) {
        DeploymentStatus::PartialSuccess
    } else {
        DeploymentStatus::Failed
    }
}
