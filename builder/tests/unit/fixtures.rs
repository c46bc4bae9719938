//! Fakes for the executor's collaborators

use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use openapi_client::{DeploymentAttributes, DeploymentStatus, SourceDownloadLink};
use serde_json::{json, Value};
use tempfile::TempDir;

use stackbuilder::deploy::executor::{DeploymentExecutor, Options};
use stackbuilder::deploy::logbook::LogBook;
use stackbuilder::deploy::runner::{CommandOutput, CommandRunner, CommandSpec, OutputMode};
use stackbuilder::deploy::source::ArchiveFetcher;
use stackbuilder::errors::BuildError;
use stackbuilder::filesys::dir::Dir;
use stackbuilder::filesys::file::File;
use stackbuilder::http::deployments::{ControlPlane, FetchedContext};

/// A control-plane request observed by [`FakeControlPlane`]
#[derive(Debug, Clone)]
pub enum Call {
    GetContext,
    Status(DeploymentStatus, String),
    Logs(String),
    Attributes(DeploymentAttributes),
    SourceLink,
    PackVersion(String),
}

/// Records every call; serves a fixed context
pub struct FakeControlPlane {
    context: Option<Value>,
    /// Added before `getContext` answers
    delay: Option<Duration>,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeControlPlane {
    pub fn new(context: Value) -> Arc<Self> {
        Arc::new(Self {
            context: Some(context),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Control plane whose `getContext` fails
    pub fn unreachable() -> Arc<Self> {
        Self::unreachable_after(Duration::ZERO)
    }

    /// Control plane whose `getContext` fails after `delay`
    pub fn unreachable_after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            context: None,
            delay: Some(delay).filter(|d| !d.is_zero()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<DeploymentStatus> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Status(status, _) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_statuses(&self) -> Vec<DeploymentStatus> {
        self.statuses()
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect()
    }

    pub fn attributes(&self) -> Option<DeploymentAttributes> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Attributes(attributes) => Some(attributes),
            _ => None,
        })
    }

    pub fn last_logs(&self) -> String {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Logs(logs) => Some(logs),
                _ => None,
            })
            .last()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_context(&self, _deployment_id: &str) -> Result<FetchedContext, BuildError> {
        self.record(Call::GetContext);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.context {
            Some(context) => FetchedContext::from_data(json!({ "context": context })),
            None => Err(BuildError::ApiError("connection refused".into())),
        }
    }

    async fn update_status(
        &self,
        _deployment_id: &str,
        status: DeploymentStatus,
        source: &str,
    ) -> Result<(), BuildError> {
        self.record(Call::Status(status, source.to_string()));
        Ok(())
    }

    async fn update_logs(&self, _deployment_id: &str, logs: &str) -> Result<(), BuildError> {
        self.record(Call::Logs(logs.to_string()));
        Ok(())
    }

    async fn update_attributes(
        &self,
        _deployment_id: &str,
        attributes: &DeploymentAttributes,
    ) -> Result<(), BuildError> {
        self.record(Call::Attributes(attributes.clone()));
        Ok(())
    }

    async fn get_source_download_link(
        &self,
        service_id: &str,
        _platform_id: &str,
        _deployment_id: &str,
    ) -> Result<SourceDownloadLink, BuildError> {
        self.record(Call::SourceLink);
        Ok(SourceDownloadLink {
            url: format!("https://downloads.example.com/{}.zip?sig=abc", service_id),
        })
    }

    async fn set_build_pack_version(
        &self,
        _platform_id: &str,
        _service_id: &str,
        version: &str,
    ) -> Result<(), BuildError> {
        self.record(Call::PackVersion(version.to_string()));
        Ok(())
    }
}

/// Scripted response for commands whose arguments start with `prefix`
#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub prefix: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub log: String,
    pub panic: bool,
}

impl Rule {
    pub fn new(prefix: &[&str]) -> Self {
        Self {
            prefix: prefix.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn log(mut self, log: &str) -> Self {
        self.log = log.to_string();
        self
    }

    pub fn panics(mut self) -> Self {
        self.panic = true;
        self
    }
}

/// One command the runner was asked to run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub spec: CommandSpec,
    /// Top-level entries of the working directory at the time
    pub files: BTreeSet<String>,
}

impl Invocation {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.spec
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Command runner that answers from rules; unmatched commands succeed
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    pub invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(rules: Vec<Rule>) -> Arc<Self> {
        Arc::new(Self {
            rules,
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Commands run, as `program arg...`
    pub fn commands(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|i| i.spec.display())
            .collect()
    }

    /// First invocation whose arguments start with `prefix`
    pub fn find(&self, prefix: &[&str]) -> Option<Invocation> {
        self.invocations()
            .into_iter()
            .find(|i| i.spec.args.iter().map(String::as_str).take(prefix.len()).eq(prefix.iter().copied()))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        _mode: OutputMode,
        log: &LogBook,
    ) -> Result<CommandOutput, BuildError> {
        let files = std::fs::read_dir(&spec.cwd)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        self.invocations.lock().unwrap().push(Invocation {
            spec: spec.clone(),
            files,
        });

        let rule = self
            .rules
            .iter()
            .find(|r| spec.args.iter().take(r.prefix.len()).eq(r.prefix.iter()));
        let Some(rule) = rule else {
            return Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            });
        };

        if rule.panic {
            panic!("runner exploded on {}", spec.display());
        }
        log.append(&rule.log);
        Ok(CommandOutput {
            exit_code: Some(rule.exit_code),
            stdout: rule.stdout.clone(),
            stderr: String::new(),
        })
    }
}

/// Serves the same archive for every URL
pub struct ZipFetcher {
    archive: Vec<u8>,
    pub urls: Mutex<Vec<String>>,
}

impl ZipFetcher {
    pub fn new(archive: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            archive,
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveFetcher for ZipFetcher {
    async fn fetch(&self, url: &str, dest: &File) -> Result<u64, BuildError> {
        self.urls.lock().unwrap().push(url.to_string());
        tokio::fs::write(dest.path(), &self.archive).await?;
        Ok(self.archive.len() as u64)
    }
}

/// Zip archive holding `entries` (`name`, `contents`)
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Typical service source export
pub fn source_archive() -> Vec<u8> {
    zip_archive(&[
        ("acme-api-3f2a1c/package.json", r#"{"name":"acme-api"}"#),
        (
            "acme-api-3f2a1c/src/modules/orders/create.ts",
            "export default compose(useLambda(), handler)",
        ),
        (
            "acme-api-3f2a1c/src/modules/orders/list.ts",
            "export default compose(useLambda(), handler)",
        ),
    ])
}

/// Deployment context for a typescript api on aws lambda
pub fn context_json(deployment_id: &str) -> Value {
    json!({
        "platform": { "id": "plt_1", "name": "Acme" },
        "service": {
            "id": "svc_1",
            "name": "orders",
            "provider": "aws",
            "service": "lambda",
            "type": "api",
            "language": "typescript",
            "source": { "repository": "https://github.com/acme/api", "branch": "main" }
        },
        "environment": { "id": "env_1", "name": "production" },
        "deployment": { "id": deployment_id, "type": "create", "status": "queued" },
        "config": {
            "stack": { "memory": 1024, "timeout": 30 },
            "environmentVariables": [{ "name": "STAGE", "value": "prod" }]
        },
        "provider": {
            "aws": {
                "accessKeyId": "AKIACLIENT",
                "accessKeySecret": "client-secret",
                "region": "us-west-2"
            }
        }
    })
}

/// Template and build directories for one test
pub struct TestEnv {
    tmp: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().unwrap(),
        }
    }

    pub fn templates_dir(&self) -> Dir {
        Dir::new(self.tmp.path().join("templates"))
    }

    pub fn builds_dir(&self) -> Dir {
        Dir::new(self.tmp.path().join("builds"))
    }

    pub fn workspace_path(&self, deployment_id: &str) -> PathBuf {
        self.builds_dir()
            .path()
            .join(stackbuilder::utils::safe_name(deployment_id))
    }

    pub async fn install_template(&self, key: &str, files: &[(&str, &str)]) {
        let dir = self.templates_dir().subdir(key);
        dir.create().await.unwrap();
        for (name, contents) in files {
            dir.file(name).write_string(contents).await.unwrap();
        }
    }

    pub fn options(&self) -> Options {
        Options::new(self.templates_dir(), self.builds_dir())
    }

    pub fn executor(
        &self,
        control_plane: Arc<FakeControlPlane>,
        runner: Arc<ScriptedRunner>,
        fetcher: Arc<ZipFetcher>,
    ) -> DeploymentExecutor {
        self.executor_with(control_plane, runner, fetcher, self.options())
    }

    pub fn executor_with(
        &self,
        control_plane: Arc<FakeControlPlane>,
        runner: Arc<ScriptedRunner>,
        fetcher: Arc<ZipFetcher>,
        options: Options,
    ) -> DeploymentExecutor {
        DeploymentExecutor::new(control_plane, runner, fetcher, options)
    }
}
