//! Application configuration options

use std::sync::Arc;

use secrecy::SecretString;

use crate::deploy::executor;
use crate::filesys::dir::Dir;
use crate::logs::LogOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Control-plane API base URL
    pub backend_base_url: String,

    /// Bearer token for the control plane
    pub backend_token: SecretString,

    /// Logging configuration
    pub logging: LogOptions,

    /// Deployment executor configuration
    pub executor: executor::Options,

    /// Trigger server configuration
    pub server: ServerOptions,
}

impl AppOptions {
    /// Resolve options from loaded settings. Directory overrides in the
    /// settings win over the storage layout.
    pub fn from_settings(settings: Settings, layout: &StorageLayout) -> Self {
        let templates_dir = settings
            .templates_dir
            .map(Dir::new)
            .unwrap_or_else(|| layout.templates_dir());
        let builds_dir = settings
            .builds_dir
            .map(Dir::new)
            .unwrap_or_else(|| layout.builds_dir());

        let executor = executor::Options {
            deployment_logs_dir: settings.log_dir.as_ref().map(|d| Dir::new(d.join("deployments"))),
            cleanup: settings.workspace_cleanup,
            stream_logs: settings.stream_logs,
            refresh_before_mutation: settings.refresh_before_mutation,
            direct_source_archives: settings.direct_source_archives,
            terraform_bin: settings.tools.terraform_bin,
            pulumi_bin: settings.tools.pulumi_bin,
            state: Arc::new(settings.state),
            ..executor::Options::new(templates_dir, builds_dir)
        };

        Self {
            backend_base_url: settings.backend.base_url,
            backend_token: settings.backend.token,
            logging: LogOptions {
                log_level: settings.log_level,
                json_format: settings.log_json,
                log_dir: settings.log_dir,
                ..Default::default()
            },
            executor,
            server: ServerOptions {
                host: settings.server.host,
                port: settings.server.port,
                api_key: settings.server.api_key,
            },
        }
    }
}

/// Trigger server options
#[derive(Debug)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Bearer key required on trigger routes when set
    pub api_key: Option<SecretString>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7705,
            api_key: None,
        }
    }
}
