//! Deployment executor
//!
//! Runs one deployment end to end. The status finalizer is registered
//! before any other work so that every exit path, including panics,
//! reports exactly one terminal status and the collected logs.

use std::path::Path;
use std::sync::Arc;

use openapi_client::{DeploymentAttributes, DeploymentContext, DeploymentStatus, DeploymentType, PackManifest};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::deploy::credentials;
use crate::deploy::defer::{catch_panic, DeferStack};
use crate::deploy::fsm::StatusLedger;
use crate::deploy::functions;
use crate::deploy::logbook::LogBook;
use crate::deploy::outcome::classify;
use crate::deploy::runner::{CommandOutput, CommandRunner, CommandSpec, OutputMode};
use crate::deploy::source::{self, ArchiveFetcher, SourceRef};
use crate::deploy::template::{self, TemplateRegistry};
use crate::deploy::tool::{parse_outputs, InfraTool, ToolCommand, ToolOp};
use crate::deploy::variables;
use crate::deploy::workspace::{Workspace, WorkspaceManager};
use crate::errors::BuildError;
use crate::filesys::dir::Dir;
use crate::http::deployments::ControlPlane;
use crate::models::task::{Action, BuildRequest};
use crate::storage::settings::{CleanupPolicy, StateSettings};
use crate::utils::{safe_name, slug};

/// Executor configuration
#[derive(Debug, Clone)]
pub struct Options {
    /// Installed template packages
    pub templates_dir: Dir,

    /// Parent of every workspace
    pub builds_dir: Dir,

    /// Per-deployment log files are written here when set
    pub deployment_logs_dir: Option<Dir>,

    pub cleanup: CleanupPolicy,

    /// Push the log snapshot after every tool command
    pub stream_logs: bool,

    pub refresh_before_mutation: bool,

    /// Fetch branch archives from the repository instead of signed links
    pub direct_source_archives: bool,

    pub terraform_bin: String,
    pub pulumi_bin: String,

    /// Remote state backend
    pub state: Arc<StateSettings>,
}

impl Options {
    pub fn new(templates_dir: Dir, builds_dir: Dir) -> Self {
        Self {
            templates_dir,
            builds_dir,
            deployment_logs_dir: None,
            cleanup: CleanupPolicy::Always,
            stream_logs: true,
            refresh_before_mutation: true,
            direct_source_archives: false,
            terraform_bin: "terraform".to_string(),
            pulumi_bin: "pulumi".to_string(),
            state: Arc::new(StateSettings::default()),
        }
    }

    fn program(&self, tool: InfraTool) -> &str {
        match tool {
            InfraTool::Terraform => &self.terraform_bin,
            InfraTool::Pulumi => &self.pulumi_bin,
        }
    }
}

/// Shared state of one run, visible to the pipeline and its finalizer
struct Run {
    request: BuildRequest,
    source_tag: String,
    log: LogBook,
    /// Log offset where the apply or destroy output begins
    mutation_start: Mutex<Option<usize>>,
    ledger: Mutex<StatusLedger>,
    outcome: Mutex<Option<DeploymentStatus>>,
}

/// Where the workspace's template files come from
enum TemplateSource {
    Installed(Dir),
    Remote(String),
}

/// Runs deployments against the control plane
pub struct DeploymentExecutor {
    control_plane: Arc<dyn ControlPlane>,
    runner: Arc<dyn CommandRunner>,
    fetcher: Arc<dyn ArchiveFetcher>,
    options: Arc<Options>,
}

impl DeploymentExecutor {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        runner: Arc<dyn CommandRunner>,
        fetcher: Arc<dyn ArchiveFetcher>,
        options: Options,
    ) -> Self {
        Self {
            control_plane,
            runner,
            fetcher,
            options: Arc::new(options),
        }
    }

    /// Run `request` to completion and return the terminal status that was
    /// reported. Never fails: every error ends up in the reported status.
    pub async fn execute(&self, request: &BuildRequest) -> DeploymentStatus {
        info!(
            "Executing {} for deployment {}",
            request.action, request.deployment_id
        );

        let run = Arc::new(Run {
            request: request.clone(),
            source_tag: request.action.source_tag(),
            log: LogBook::new(),
            mutation_start: Mutex::new(None),
            ledger: Mutex::new(StatusLedger::new(
                request.deployment_id.clone(),
                DeploymentStatus::Queued,
            )),
            outcome: Mutex::new(None),
        });

        let mut defers = DeferStack::new();
        {
            let run = run.clone();
            let control_plane = self.control_plane.clone();
            let logs_dir = self.options.deployment_logs_dir.clone();
            defers.defer("report-status", move |err| async move {
                finalize(run, control_plane, logs_dir, err).await;
            });
        }

        let result = catch_panic(self.pipeline(&run, &mut defers)).await;
        if let Err(e) = &result {
            error!("Deployment {} failed: {}", request.deployment_id, e);
        }
        defers.unwind(result.err().map(Arc::new)).await;

        let outcome = *run.outcome.lock().await;
        outcome.unwrap_or(DeploymentStatus::Failed)
    }

    async fn pipeline(&self, run: &Run, defers: &mut DeferStack) -> Result<(), BuildError> {
        let action = run.request.action;
        let deployment_id = run.request.deployment_id.as_str();

        let fetched = self.control_plane.get_context(deployment_id).await?;
        let context = &fetched.context;
        if context.deployment.id != deployment_id {
            warn!(
                "Context is for deployment {}, expected {}",
                context.deployment.id, deployment_id
            );
        }
        if let Some(scope) = &run.request.scope {
            info!(
                "Build pack task for workspace {}, unit {}",
                scope.workspace_id, scope.unit_id
            );
            scope.check(&context.platform.id, &context.service.id)?;
        }

        run.ledger
            .lock()
            .await
            .transition(DeploymentStatus::InProgress, &run.source_tag)?;
        self.control_plane
            .update_status(deployment_id, DeploymentStatus::InProgress, &run.source_tag)
            .await?;
        run.log.line(format!(
            "Starting {} of {} ({}) on platform {}",
            action, context.service.name, context.service.id, context.platform.id
        ));

        let template = self.template_source(action, context).await?;

        let workspace = WorkspaceManager::new(self.options.builds_dir.clone())
            .create(deployment_id)
            .await?;
        {
            let workspace = workspace.clone();
            let policy = self.options.cleanup;
            defers.defer("cleanup-workspace", move |err| async move {
                let remove = match policy {
                    CleanupPolicy::Always => true,
                    CleanupPolicy::OnSuccess => err.is_none(),
                    CleanupPolicy::Never => false,
                };
                if remove {
                    workspace.destroy().await;
                } else {
                    info!("Keeping workspace {}", workspace.path().display());
                }
            });
        }

        match &template {
            TemplateSource::Installed(dir) => workspace.copy_template(dir).await?,
            TemplateSource::Remote(url) => {
                source::flatten_pack(self.fetcher.as_ref(), url, workspace.dir()).await?
            }
        }

        template::rewrite_project_name(workspace.dir(), &template::project_name(context)).await?;
        workspace.context_file().write_json(&fetched.raw).await?;

        let manifest = template::read_manifest(workspace.dir())
            .await?
            .or_else(|| context.config.pack.as_ref().map(|p| p.manifest.clone()));

        if action.needs_source() {
            let source_ref = SourceRef::for_context(context, self.options.direct_source_archives)?;
            source::acquire(
                &source_ref,
                self.control_plane.as_ref(),
                self.fetcher.as_ref(),
                &workspace,
            )
            .await?;
            run.log.line("Downloaded source");
        }

        let tool = InfraTool::detect(workspace.dir()).await;
        let staged = credentials::stage(&workspace, context, &self.options.state, tool).await?;
        variables::write(&workspace, context, &fetched.raw).await?;

        if let Some(before) = manifest
            .as_ref()
            .and_then(|m| m.build.as_ref())
            .and_then(|b| b.before.as_deref())
            .filter(|cmd| !cmd.trim().is_empty())
        {
            self.run_hook(run, &workspace, before, &staged.env).await?;
        }

        let command = ToolCommand::new(
            tool,
            self.options.program(tool),
            safe_name(&context.service.id),
        );
        let env = staged.env;

        self.prepare_stack(run, &command, workspace.path(), &env).await?;

        let destroy = match action {
            Action::DestroyStack => true,
            Action::ExecutePack => context.deployment.deployment_type == DeploymentType::Destroy,
            Action::DeployStack | Action::DeployDomain => false,
        };
        let mutation = if destroy { ToolOp::Destroy } else { ToolOp::Apply };
        *run.mutation_start.lock().await = Some(run.log.len());
        self.run_tool_checked(run, &command, mutation, workspace.path(), &env, OutputMode::Streamed)
            .await?;

        if destroy {
            if action == Action::DestroyStack && tool == InfraTool::Pulumi {
                self.remove_stack(run, &command, workspace.path(), &env).await;
            }
            return Ok(());
        }

        let raw_output = self
            .run_tool_checked(run, &command, ToolOp::Output, workspace.path(), &env, OutputMode::Buffered)
            .await?;
        let outputs = parse_outputs(tool, &raw_output);

        let functions = if action == Action::DeployStack
            && functions::exposes_functions(&context.service.service_type)
        {
            let source_dir = workspace.source_dir().path().to_path_buf();
            tokio::task::spawn_blocking(move || functions::scan(&source_dir))
                .await
                .map_err(|e| BuildError::Internal(format!("function scan failed: {}", e)))?
        } else {
            Vec::new()
        };

        let version = resolved_version(context, manifest.as_ref());
        let attributes = build_attributes(outputs, functions, version.clone());
        self.control_plane
            .update_attributes(deployment_id, &attributes)
            .await?;
        run.log.line(format!(
            "Recorded {} outputs and {} functions",
            attributes.outputs.len(),
            attributes.functions.len()
        ));

        self.persist_pack_version(context, version.as_deref()).await;
        Ok(())
    }

    async fn template_source(
        &self,
        action: Action,
        context: &DeploymentContext,
    ) -> Result<TemplateSource, BuildError> {
        if action == Action::ExecutePack {
            let pack = context.config.pack.as_ref().ok_or_else(|| {
                BuildError::ConfigError(format!(
                    "service {} has no build pack configured",
                    context.service.id
                ))
            })?;
            if let Some(url) = pack.source.as_ref().filter(|u| !u.is_empty()) {
                return Ok(TemplateSource::Remote(url.clone()));
            }
        }

        let candidates = template::candidate_keys(action, context);
        let registry = TemplateRegistry::new(self.options.templates_dir.clone());
        Ok(TemplateSource::Installed(registry.resolve(&candidates).await?))
    }

    /// Connect to the state backend and make sure the stack exists and is
    /// selected. Creating an existing stack fails, as does selecting a
    /// missing one, so both are tried and only a double failure counts.
    async fn prepare_stack(
        &self,
        run: &Run,
        command: &ToolCommand,
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<(), BuildError> {
        self.run_tool_checked(run, command, ToolOp::Init, cwd, env, OutputMode::Streamed)
            .await?;

        let created = self
            .run_tool(run, command, ToolOp::NewStack, cwd, env, OutputMode::Streamed)
            .await?
            .map(|o| o.success())
            .unwrap_or(false);
        let selected = self
            .run_tool(run, command, ToolOp::SelectStack, cwd, env, OutputMode::Streamed)
            .await?;
        let selected_ok = selected.as_ref().map(|o| o.success()).unwrap_or(false);

        if !created && !selected_ok {
            return Err(BuildError::ToolFailed {
                tool: command.tool.name().to_string(),
                op: ToolOp::SelectStack.as_str().to_string(),
                code: selected.and_then(|o| o.exit_code),
            });
        }
        debug!("Stack {} ready (created: {})", command.stack, created);

        if self.options.refresh_before_mutation {
            match self
                .run_tool(run, command, ToolOp::Refresh, cwd, env, OutputMode::Streamed)
                .await?
            {
                Some(output) if !output.success() => {
                    warn!("Refresh of stack {} failed, continuing", command.stack);
                    run.log.line("warning: refresh failed, continuing with current state");
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn remove_stack(&self, run: &Run, command: &ToolCommand, cwd: &Path, env: &[(String, String)]) {
        match self
            .run_tool(run, command, ToolOp::RemoveStack, cwd, env, OutputMode::Streamed)
            .await
        {
            Ok(Some(output)) if output.success() => info!("Removed stack {}", command.stack),
            Ok(_) => warn!("Could not remove stack {}", command.stack),
            Err(e) => warn!("Could not remove stack {}: {}", command.stack, e),
        }
    }

    /// Run `op`, returning `None` when the tool has no such operation
    async fn run_tool(
        &self,
        run: &Run,
        command: &ToolCommand,
        op: ToolOp,
        cwd: &Path,
        env: &[(String, String)],
        mode: OutputMode,
    ) -> Result<Option<CommandOutput>, BuildError> {
        let Some(spec) = command.spec(op, cwd, env) else {
            debug!("{} has no {} operation", command.tool.name(), op.as_str());
            return Ok(None);
        };

        run.log.line(format!("$ {}", spec.display()));
        let output = self.runner.run(&spec, mode, &run.log).await?;
        if !output.success() {
            run.log.line(format!(
                "{} {} exited with {:?}",
                command.tool.name(),
                op.as_str(),
                output.exit_code
            ));
        }

        if self.options.stream_logs {
            self.push_logs(run).await;
        }
        Ok(Some(output))
    }

    /// Run `op` and fail on a non-zero exit, returning stdout
    async fn run_tool_checked(
        &self,
        run: &Run,
        command: &ToolCommand,
        op: ToolOp,
        cwd: &Path,
        env: &[(String, String)],
        mode: OutputMode,
    ) -> Result<String, BuildError> {
        let Some(output) = self.run_tool(run, command, op, cwd, env, mode).await? else {
            return Ok(String::new());
        };
        output.into_result().map_err(|code| BuildError::ToolFailed {
            tool: command.tool.name().to_string(),
            op: op.as_str().to_string(),
            code,
        })
    }

    async fn run_hook(
        &self,
        run: &Run,
        workspace: &Workspace,
        hook: &str,
        env: &[(String, String)],
    ) -> Result<(), BuildError> {
        info!("Running build hook: {}", hook);
        let spec = CommandSpec::new("sh", workspace.path())
            .args(["-c", hook])
            .envs(env.iter().cloned());
        run.log.line(format!("$ {}", hook));

        let output = self.runner.run(&spec, OutputMode::Streamed, &run.log).await?;
        if !output.success() {
            return Err(BuildError::HookFailed(format!(
                "{} exited with {:?}",
                hook, output.exit_code
            )));
        }
        Ok(())
    }

    async fn push_logs(&self, run: &Run) {
        let snapshot = run.log.snapshot();
        if let Err(e) = self
            .control_plane
            .update_logs(&run.request.deployment_id, &snapshot)
            .await
        {
            warn!("Failed to push logs: {}", e);
        }
    }

    /// Record the pack version the first time a pack is deployed
    async fn persist_pack_version(&self, context: &DeploymentContext, version: Option<&str>) {
        let Some(pack) = context.config.pack.as_ref() else {
            return;
        };
        let (None, Some(version)) = (pack.version.as_deref(), version) else {
            return;
        };

        info!("Setting build pack version {} for {}", version, pack.name);
        if let Err(e) = self
            .control_plane
            .set_build_pack_version(&context.platform.id, &context.service.id, version)
            .await
        {
            warn!("Failed to set build pack version: {}", e);
        }
    }
}

/// Version of the pack that was deployed, if known
fn resolved_version(context: &DeploymentContext, manifest: Option<&PackManifest>) -> Option<String> {
    context
        .config
        .pack
        .as_ref()
        .and_then(|p| p.version.clone())
        .or_else(|| manifest.and_then(|m| m.version.clone()))
}

fn build_attributes(
    outputs: Map<String, Value>,
    functions: Vec<openapi_client::FunctionRef>,
    version: Option<String>,
) -> DeploymentAttributes {
    let url = outputs
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string);
    DeploymentAttributes {
        url,
        outputs,
        functions,
        version,
    }
}

/// Classify the run, report the terminal status and logs.
/// Reporting failures are logged and dropped.
async fn finalize(
    run: Arc<Run>,
    control_plane: Arc<dyn ControlPlane>,
    logs_dir: Option<Dir>,
    error: Option<Arc<BuildError>>,
) {
    let deployment_id = run.request.deployment_id.as_str();
    let status = {
        // only apply/destroy output can show changed resources; refresh
        // and hook output before it does not count
        let logs = run.log.snapshot();
        let mutation_output = match *run.mutation_start.lock().await {
            Some(start) => logs.get(start..).unwrap_or_default(),
            None => "",
        };
        classify(error.is_some(), mutation_output)
    };
    if let Some(err) = &error {
        run.log.line(format!("error: {}", err));
    }
    run.log.line(format!("Deployment finished: {}", status));

    {
        let mut ledger = run.ledger.lock().await;
        if ledger.status() == DeploymentStatus::Queued {
            if let Err(e) = ledger.transition(DeploymentStatus::InProgress, &run.source_tag) {
                warn!("{}", e);
            }
        }
        if let Err(e) = ledger.transition(status, &run.source_tag) {
            warn!("{}", e);
        }
    }

    if let Err(e) = control_plane
        .update_status(deployment_id, status, &run.source_tag)
        .await
    {
        warn!("Failed to report status {} for {}: {}", status, deployment_id, e);
    }

    let logs = run.log.snapshot();
    if let Err(e) = control_plane.update_logs(deployment_id, &logs).await {
        warn!("Failed to report logs for {}: {}", deployment_id, e);
    }

    if let Some(dir) = logs_dir {
        let file = dir.file(&format!("{}.log", slug(deployment_id)));
        if let Err(e) = file.write_string(&logs).await {
            warn!("Failed to write {}: {}", file.path().display(), e);
        }
    }

    info!("Deployment {} finished with status {}", deployment_id, status);
    *run.outcome.lock().await = Some(status);
}
