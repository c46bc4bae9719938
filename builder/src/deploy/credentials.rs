//! Provider credential and state backend staging
//!
//! Two identities are written side by side: `state`, the operator's account
//! holding remote tool state, and `client`, the customer's account the stack
//! is deployed into. Tools run as `client`; only the state backend
//! configuration refers to `state`.

use std::fmt;

use openapi_client::DeploymentContext;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::deploy::tool::InfraTool;
use crate::deploy::workspace::Workspace;
use crate::errors::BuildError;
use crate::storage::settings::StateSettings;
use crate::utils::slug;

pub const STATE_PROFILE: &str = "state";
pub const CLIENT_PROFILE: &str = "client";

const AWS_DIR: &str = ".aws";
const AWS_CONFIG: &str = "conf";
const AWS_CREDENTIALS: &str = "creds";
const GCP_DIR: &str = ".gcp";
const GCP_CREDENTIALS: &str = "credentials.json";
const STATE_BACKEND_FILE: &str = "state.tf";

/// Environment for tool invocations produced by [`stage`]
#[derive(Default, Clone)]
pub struct StagedCredentials {
    pub env: Vec<(String, String)>,
}

impl StagedCredentials {
    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.env.push((key.to_string(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for StagedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("StagedCredentials").field("env", &keys).finish()
    }
}

/// Remote state key for a platform's unit
pub fn state_key(context: &DeploymentContext) -> String {
    slug(&format!("{}-x-{}", context.platform.id, context.service.id))
}

/// Write credential and backend files into the workspace
pub async fn stage(
    workspace: &Workspace,
    context: &DeploymentContext,
    state: &StateSettings,
    tool: InfraTool,
) -> Result<StagedCredentials, BuildError> {
    let mut staged = StagedCredentials::default();
    let aws_dir = workspace.dir().subdir(AWS_DIR);
    let config_file = aws_dir.file(AWS_CONFIG);
    let credentials_file = aws_dir.file(AWS_CREDENTIALS);
    let client = context.provider.aws.as_ref();

    if context.service.provider == "aws" && client.is_none() {
        return Err(BuildError::CredentialError(format!(
            "service {} targets aws but the context has no aws credentials",
            context.service.id
        )));
    }

    let client_region = client.map(|c| c.region.as_str()).unwrap_or(state.region.as_str());

    let mut config = format!(
        "[{}]\noutput = json\nregion = {}\n",
        STATE_PROFILE, state.region
    );
    let mut credentials = format!(
        "[{}]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
        STATE_PROFILE,
        state.access_key_id.expose_secret(),
        state.secret_access_key.expose_secret()
    );
    if let Some(client) = client {
        config.push_str(&format!(
            "\n[{}]\noutput = json\nregion = {}\n",
            CLIENT_PROFILE, client.region
        ));
        credentials.push_str(&format!(
            "\n[{}]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
            CLIENT_PROFILE, client.access_key_id, client.access_key_secret
        ));
    }

    config_file.write_private(&config).await?;
    credentials_file.write_private(&credentials).await?;
    debug!("Wrote aws profiles to {}", aws_dir.path().display());

    if client.is_some() {
        staged.set("AWS_PROFILE", CLIENT_PROFILE);
    }
    staged.set("AWS_CONFIG_FILE", config_file.path().to_string_lossy());
    staged.set(
        "AWS_SHARED_CREDENTIALS_FILE",
        credentials_file.path().to_string_lossy(),
    );
    staged.set("AWS_REGION", client_region);

    if let Some(gcp) = context.provider.gcp.as_ref() {
        let key_file = workspace.dir().subdir(GCP_DIR).file(GCP_CREDENTIALS);
        key_file.write_private(&gcp.json_credentials).await?;
        staged.set(
            "GOOGLE_APPLICATION_CREDENTIALS",
            key_file.path().to_string_lossy(),
        );
    }

    let key = state_key(context);
    match tool {
        InfraTool::Terraform => {
            let backend = format!(
                r#"terraform {{
  backend "s3" {{
    bucket                  = "{bucket}"
    key                     = "{key}"
    region                  = "{region}"
    profile                 = "{profile}"
    dynamodb_table          = "{lock_table}"
    shared_credentials_file = "{credentials}"
  }}
}}
"#,
                bucket = state.bucket,
                key = key,
                region = state.region,
                profile = STATE_PROFILE,
                lock_table = state.lock_table,
                credentials = credentials_file.path().display(),
            );
            workspace.dir().file(STATE_BACKEND_FILE).write_string(&backend).await?;
        }
        InfraTool::Pulumi => {
            staged.set(
                "PULUMI_BACKEND_URL",
                format!(
                    "s3://{}/{}?region={}&profile={}",
                    state.bucket, key, state.region, STATE_PROFILE
                ),
            );
            staged.set("PULUMI_CONFIG_PASSPHRASE", state.passphrase.expose_secret());
        }
    }

    info!("Staged credentials for {} (state key {})", tool.name(), key);
    Ok(staged)
}
