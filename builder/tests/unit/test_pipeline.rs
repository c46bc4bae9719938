use openapi_client::DeploymentStatus;
use serde_json::json;

use stackbuilder::deploy::executor::Options;
use stackbuilder::filesys::dir::Dir;
use stackbuilder::models::task::{Action, BuildRequest, TaskScope};
use stackbuilder::storage::settings::CleanupPolicy;

use crate::fixtures::{
    context_json, source_archive, zip_archive, Call, FakeControlPlane, Rule, ScriptedRunner,
    TestEnv, ZipFetcher,
};

const API_TEMPLATE: &str = "exo-api-aws-lambda-typescript";
const TERRAFORM_OUTPUT: &str =
    r#"{"url":{"value":"https://orders.acme.dev","type":"string","sensitive":false}}"#;

async fn terraform_env() -> TestEnv {
    let env = TestEnv::new();
    env.install_template(API_TEMPLATE, &[("main.tf", "variable \"memory\" {}\n")])
        .await;
    env
}

fn deploy(id: &str) -> BuildRequest {
    BuildRequest::new(Action::DeployStack, id)
}

#[tokio::test]
async fn test_deploy_stack_reports_in_progress_then_success() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-1"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["output"]).stdout(TERRAFORM_OUTPUT)]);
    let fetcher = ZipFetcher::new(source_archive());

    let status = env
        .executor(control_plane.clone(), runner.clone(), fetcher.clone())
        .execute(&deploy("dep-1"))
        .await;

    assert_eq!(status, DeploymentStatus::Success);
    assert_eq!(
        control_plane.statuses(),
        vec![DeploymentStatus::InProgress, DeploymentStatus::Success]
    );
    assert!(control_plane.calls().iter().all(|c| match c {
        Call::Status(_, source) => source == "builder.deploy-stack",
        _ => true,
    }));

    let attributes = control_plane.attributes().expect("attributes reported");
    assert_eq!(attributes.url.as_deref(), Some("https://orders.acme.dev"));
    assert_eq!(attributes.functions.len(), 2);
    assert_eq!(attributes.functions[0].module, "orders");
    assert_eq!(attributes.functions[0].function, "create");

    assert_eq!(fetcher.urls().len(), 1);
    assert!(fetcher.urls()[0].starts_with("https://downloads.example.com/svc_1.zip"));

    let commands = runner.commands();
    assert_eq!(commands[0], "terraform init -input=false -no-color");
    assert!(commands.contains(&"terraform workspace new svc_1".to_string()));

    let apply = runner.find(&["apply", "-auto-approve"]).expect("apply ran");
    for expected in ["main.tf", "main.tfvars", "state.tf", ".aws", "source", "context.json"] {
        assert!(apply.files.contains(expected), "missing {expected}");
    }
    assert!(!apply.files.contains("source.zip"));
    assert_eq!(apply.env("AWS_PROFILE"), Some("client"));

    assert!(control_plane.last_logs().contains("Deployment finished: success"));
    assert!(!env.workspace_path("dep-1").exists());
}

#[tokio::test]
async fn test_existing_stack_is_selected_when_creation_fails() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-2"));
    let runner = ScriptedRunner::new(vec![
        Rule::new(&["workspace", "new"]).exit(1).log("Workspace \"svc_1\" already exists\n"),
        Rule::new(&["output"]).stdout(TERRAFORM_OUTPUT),
    ]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-2"))
        .await;

    assert_eq!(status, DeploymentStatus::Success);
    assert!(runner.find(&["workspace", "select", "svc_1"]).is_some());
    assert!(runner.find(&["apply", "-auto-approve"]).is_some());
}

#[tokio::test]
async fn test_stack_neither_created_nor_selected_fails() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-3"));
    let runner = ScriptedRunner::new(vec![
        Rule::new(&["workspace", "new"]).exit(1),
        Rule::new(&["workspace", "select"]).exit(1),
    ]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-3"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert!(runner.find(&["apply", "-auto-approve"]).is_none());
    assert_eq!(control_plane.terminal_statuses(), vec![DeploymentStatus::Failed]);
}

#[tokio::test]
async fn test_failure_after_mutation_is_partial_success() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-4"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["apply", "-auto-approve"])
        .exit(1)
        .log("aws_s3_bucket.site: Creation complete after 3s [id=site]\nError: AccessDenied\n")]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-4"))
        .await;

    assert_eq!(status, DeploymentStatus::PartialSuccess);
    assert_eq!(
        control_plane.terminal_statuses(),
        vec![DeploymentStatus::PartialSuccess]
    );
    assert!(control_plane.attributes().is_none());
    assert!(runner.find(&["output"]).is_none());
    assert!(!env.workspace_path("dep-4").exists());
}

#[tokio::test]
async fn test_corrupt_source_archive_fails_and_cleans_up() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-5"));
    let runner = ScriptedRunner::new(Vec::new());
    let fetcher = ZipFetcher::new(b"<html>Access Denied</html>".to_vec());

    let status = env
        .executor(control_plane.clone(), runner.clone(), fetcher)
        .execute(&deploy("dep-5"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(
        control_plane.statuses(),
        vec![DeploymentStatus::InProgress, DeploymentStatus::Failed]
    );
    assert!(runner.invocations().is_empty());
    assert!(control_plane.last_logs().contains("error:"));
    assert!(!env.workspace_path("dep-5").exists());
}

#[tokio::test]
async fn test_archive_with_two_roots_is_rejected() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-6"));
    let runner = ScriptedRunner::new(Vec::new());
    let fetcher = ZipFetcher::new(zip_archive(&[
        ("one/package.json", "{}"),
        ("two/package.json", "{}"),
    ]));

    let status = env
        .executor(control_plane.clone(), runner.clone(), fetcher)
        .execute(&deploy("dep-6"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert!(runner.invocations().is_empty());
}

#[tokio::test]
async fn test_empty_output_records_no_outputs() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-7"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["output"]).stdout("{}\n")]);

    let status = env
        .executor(control_plane.clone(), runner, ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-7"))
        .await;

    assert_eq!(status, DeploymentStatus::Success);
    let attributes = control_plane.attributes().expect("attributes reported");
    assert!(attributes.outputs.is_empty());
    assert!(attributes.url.is_none());
}

#[tokio::test]
async fn test_missing_template_fails_before_any_command() {
    let env = TestEnv::new();
    env.install_template("exo-api-gcp-run", &[("main.tf", "")]).await;
    let control_plane = FakeControlPlane::new(context_json("dep-8"));
    let runner = ScriptedRunner::new(Vec::new());
    let fetcher = ZipFetcher::new(source_archive());

    let status = env
        .executor(control_plane.clone(), runner.clone(), fetcher.clone())
        .execute(&deploy("dep-8"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert!(runner.invocations().is_empty());
    assert!(fetcher.urls().is_empty());
    assert!(control_plane.last_logs().contains(API_TEMPLATE));
}

#[tokio::test]
async fn test_destroy_on_pulumi_removes_stack_without_source() {
    let env = TestEnv::new();
    env.install_template(
        API_TEMPLATE,
        &[
            ("Pulumi.yaml", "name: exobase-api-lambda-template\nruntime: nodejs\n"),
            ("index.ts", "export const out = {}\n"),
        ],
    )
    .await;
    let control_plane = FakeControlPlane::new(context_json("dep-9"));
    let runner = ScriptedRunner::new(Vec::new());
    let fetcher = ZipFetcher::new(source_archive());
    let mut options = env.options();
    options.cleanup = CleanupPolicy::Never;

    let status = env
        .executor_with(control_plane.clone(), runner.clone(), fetcher.clone(), options)
        .execute(&BuildRequest::new(Action::DestroyStack, "dep-9"))
        .await;

    assert_eq!(status, DeploymentStatus::Success);
    assert!(fetcher.urls().is_empty());
    assert!(control_plane.attributes().is_none());
    assert!(control_plane.calls().iter().all(|c| match c {
        Call::Status(_, source) => source == "builder.destroy-stack",
        _ => true,
    }));

    let destroy = runner.find(&["destroy", "--yes"]).expect("destroy ran");
    assert!(destroy
        .env("PULUMI_BACKEND_URL")
        .is_some_and(|url| url.starts_with("s3://")));
    assert!(runner.find(&["stack", "rm", "--yes"]).is_some());
    assert!(runner.find(&["up"]).is_none());

    let project = std::fs::read_to_string(env.workspace_path("dep-9").join("Pulumi.yaml")).unwrap();
    assert!(project.contains("name: plt_1_svc_1"));
}

#[tokio::test]
async fn test_unreachable_control_plane_still_reports_failure() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::unreachable();
    let runner = ScriptedRunner::new(Vec::new());

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-10"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(control_plane.statuses(), vec![DeploymentStatus::Failed]);
    assert!(control_plane.last_logs().contains("connection refused"));
    assert!(runner.invocations().is_empty());
}

#[tokio::test]
async fn test_runner_panic_is_reported_once() {
    let env = terraform_env().await;
    let control_plane = FakeControlPlane::new(context_json("dep-11"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["apply", "-auto-approve"]).panics()]);

    let status = env
        .executor(control_plane.clone(), runner, ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-11"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(control_plane.terminal_statuses(), vec![DeploymentStatus::Failed]);
    assert!(control_plane.last_logs().contains("runner exploded"));
    assert!(!env.workspace_path("dep-11").exists());
}

fn pack_context(id: &str) -> serde_json::Value {
    let mut context = context_json(id);
    context["config"]["pack"] = json!({ "name": "static-site" });
    context["config"]["stack"] = json!({ "bucket": "acme-site" });
    context
}

async fn pack_env(before: &str) -> TestEnv {
    let env = TestEnv::new();
    let manifest = json!({
        "name": "static-site",
        "version": "2.1.0",
        "inputs": [{ "name": "bucket", "ui": "string" }],
        "build": { "before": before }
    });
    env.install_template(
        "static-site",
        &[("main.tf", ""), ("pack.json", &manifest.to_string())],
    )
    .await;
    env
}

#[tokio::test]
async fn test_execute_pack_runs_hook_and_records_version() {
    let env = pack_env("npm run build").await;
    let control_plane = FakeControlPlane::new(pack_context("dep-12"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["output"]).stdout(TERRAFORM_OUTPUT)]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&BuildRequest::new(Action::ExecutePack, "dep-12"))
        .await;

    assert_eq!(status, DeploymentStatus::Success);
    let commands = runner.commands();
    let hook = commands.iter().position(|c| c == "sh -c npm run build").expect("hook ran");
    let init = commands.iter().position(|c| c.starts_with("terraform init")).unwrap();
    assert!(hook < init);

    let attributes = control_plane.attributes().expect("attributes reported");
    assert_eq!(attributes.version.as_deref(), Some("2.1.0"));
    assert!(attributes.functions.is_empty());
    assert!(control_plane
        .calls()
        .iter()
        .any(|c| matches!(c, Call::PackVersion(v) if v == "2.1.0")));
}

#[tokio::test]
async fn test_failing_hook_stops_before_the_tool() {
    let env = pack_env("exit 3").await;
    let control_plane = FakeControlPlane::new(pack_context("dep-13"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["-c", "exit 3"]).exit(3)]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&BuildRequest::new(Action::ExecutePack, "dep-13"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(runner.commands(), vec!["sh -c exit 3".to_string()]);
    assert!(!control_plane
        .calls()
        .iter()
        .any(|c| matches!(c, Call::PackVersion(_))));
}

#[tokio::test]
async fn test_deployment_log_file_is_written() {
    let env = terraform_env().await;
    let logs_dir = tempfile::tempdir().unwrap();
    let mut options = env.options();
    options.deployment_logs_dir = Some(stackbuilder::filesys::dir::Dir::new(logs_dir.path()));
    options.stream_logs = false;
    let control_plane = FakeControlPlane::new(context_json("dep-14"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["output"]).stdout(TERRAFORM_OUTPUT)]);

    env.executor_with(control_plane.clone(), runner, ZipFetcher::new(source_archive()), options)
        .execute(&deploy("dep-14"))
        .await;

    // only the final snapshot is pushed when streaming is off
    let pushes = control_plane
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Logs(_)))
        .count();
    assert_eq!(pushes, 1);

    let written = std::fs::read_to_string(logs_dir.path().join("dep-14.log")).unwrap();
    assert!(written.contains("$ terraform apply"));
    assert!(written.contains("Deployment finished: success"));
}

#[tokio::test]
async fn test_refresh_drift_then_failed_apply_is_failed() {
    let env = TestEnv::new();
    env.install_template(
        API_TEMPLATE,
        &[("Pulumi.yaml", "name: exobase-api-lambda-template\nruntime: nodejs\n")],
    )
    .await;
    let control_plane = FakeControlPlane::new(context_json("dep-15"));
    let runner = ScriptedRunner::new(vec![
        Rule::new(&["refresh"]).log("Resources:\n    ~ 1 updated\n    4 unchanged\n"),
        Rule::new(&["up"]).exit(1).log("error: preview failed\n"),
    ]);

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&deploy("dep-15"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(control_plane.terminal_statuses(), vec![DeploymentStatus::Failed]);
    assert!(control_plane.last_logs().contains("~ 1 updated"));
}

#[tokio::test]
async fn test_hook_output_does_not_count_as_mutation() {
    let env = pack_env("./build.sh").await;
    let control_plane = FakeControlPlane::new(pack_context("dep-16"));
    let runner = ScriptedRunner::new(vec![
        Rule::new(&["-c", "./build.sh"]).log("3 files updated\n"),
        Rule::new(&["apply", "-auto-approve"]).exit(1).log("Error: AccessDenied\n"),
    ]);

    let status = env
        .executor(control_plane.clone(), runner, ZipFetcher::new(source_archive()))
        .execute(&BuildRequest::new(Action::ExecutePack, "dep-16"))
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_relative_builds_dir_hands_tool_absolute_paths() {
    let env = terraform_env().await;
    let relative = format!("target/relative-pipeline-{}", std::process::id());
    let mut options = Options::new(env.templates_dir(), Dir::new(&relative));
    options.cleanup = CleanupPolicy::Never;
    let control_plane = FakeControlPlane::new(context_json("dep-17"));
    let runner = ScriptedRunner::new(vec![Rule::new(&["output"]).stdout(TERRAFORM_OUTPUT)]);

    let status = env
        .executor_with(control_plane, runner.clone(), ZipFetcher::new(source_archive()), options)
        .execute(&deploy("dep-17"))
        .await;
    assert_eq!(status, DeploymentStatus::Success);

    let apply = runner.find(&["apply", "-auto-approve"]).expect("apply ran");
    assert!(apply.spec.cwd.is_absolute());
    for key in ["AWS_SHARED_CREDENTIALS_FILE", "AWS_CONFIG_FILE"] {
        let path = std::path::Path::new(apply.env(key).expect("credential path set"));
        assert!(path.is_absolute(), "{key} is relative");
        assert!(path.starts_with(&apply.spec.cwd));
    }

    let tfvars = std::fs::read_to_string(apply.spec.cwd.join("main.tfvars")).unwrap();
    let source = apply.spec.cwd.join("source");
    assert!(tfvars.contains(&format!("exo_source = \"{}\"", source.display())));
    let state = std::fs::read_to_string(apply.spec.cwd.join("state.tf")).unwrap();
    assert!(state.contains(&apply.spec.cwd.join(".aws").display().to_string()));

    std::fs::remove_dir_all(&relative).unwrap();
}

#[tokio::test]
async fn test_pack_task_for_another_unit_is_refused() {
    let env = pack_env("npm run build").await;
    let control_plane = FakeControlPlane::new(pack_context("dep-20"));
    let runner = ScriptedRunner::new(Vec::new());
    let request = BuildRequest::new(Action::ExecutePack, "dep-20").with_scope(TaskScope {
        workspace_id: "wks_1".into(),
        platform_id: "plt_1".into(),
        unit_id: "svc_2".into(),
    });

    let status = env
        .executor(control_plane.clone(), runner.clone(), ZipFetcher::new(source_archive()))
        .execute(&request)
        .await;

    assert_eq!(status, DeploymentStatus::Failed);
    assert_eq!(control_plane.statuses(), vec![DeploymentStatus::Failed]);
    assert!(control_plane.last_logs().contains("svc_2"));
    assert!(runner.invocations().is_empty());
}
