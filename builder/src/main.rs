//! Stack builder - Entry Point
//!
//! Runs one deployment (from `TASK_ARGS` or `--action`/`--deploymentId`)
//! or, with `--serve`, a trigger server that starts deployments on request.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use stackbuilder::app::options::AppOptions;
use stackbuilder::app::run::{run_server, run_task};
use stackbuilder::errors::BuildError;
use stackbuilder::logs::init_logging;
use stackbuilder::models::task::{Action, BuildRequest, TaskArgs};
use stackbuilder::storage::layout::StorageLayout;
use stackbuilder::storage::settings::Settings;
use stackbuilder::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let mut settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = settings.apply_env_overrides(|name| env::var(name).ok()) {
        eprintln!("Invalid environment configuration: {e}");
        return ExitCode::FAILURE;
    }

    let options = AppOptions::from_settings(settings, &layout);

    // Initialize logging
    let _log_guard = match init_logging(options.logging.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("serve") {
        info!("Running stack builder {} in server mode", version.version);
        return match run_server(options, await_shutdown_signal()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to run the server: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let request = match task_request(&cli_args) {
        Ok(request) => request,
        Err(e) => {
            error!("{e}");
            eprintln!("Usage: stackbuilder --action=<action> --deploymentId=<id> | TASK_ARGS=<base64> stackbuilder | stackbuilder --serve");
            return ExitCode::FAILURE;
        }
    };

    info!("Running stack builder {}: {:?}", version.version, request);
    match run_task(options, request).await {
        // a failed deployment was still reported; the run itself succeeded
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to start the deployment: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Flags take precedence over `TASK_ARGS`
fn task_request(cli_args: &HashMap<String, String>) -> Result<BuildRequest, BuildError> {
    if let Some(action) = cli_args.get("action") {
        let deployment_id = cli_args
            .get("deploymentId")
            .or_else(|| cli_args.get("deployment-id"))
            .ok_or_else(|| BuildError::TaskArgsError("--deploymentId is required".to_string()))?;
        return Ok(BuildRequest::new(action.parse::<Action>()?, deployment_id.clone()));
    }

    let encoded = env::var("TASK_ARGS")
        .map_err(|_| BuildError::TaskArgsError("no --action given and TASK_ARGS is not set".to_string()))?;
    Ok(TaskArgs::decode(&encoded)?.into_request())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
