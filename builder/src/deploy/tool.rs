//! Infra tool command builder
//!
//! Every mapping from a logical operation to concrete tool flags lives in
//! [`ToolCommand::args`].

use std::path::Path;

use serde_json::{Map, Value};
use tracing::warn;

use crate::deploy::runner::CommandSpec;
use crate::filesys::dir::Dir;

/// Variable file written by the variable writer and passed to Terraform
pub const VAR_FILE: &str = "main.tfvars";

/// Supported infra-as-code engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraTool {
    Terraform,
    Pulumi,
}

impl InfraTool {
    /// Pulumi templates carry a `Pulumi.yaml`/`Pulumi.yml` project file;
    /// everything else is treated as a Terraform module.
    pub async fn detect(dir: &Dir) -> Self {
        for name in ["Pulumi.yaml", "Pulumi.yml"] {
            if dir.file(name).exists().await {
                return InfraTool::Pulumi;
            }
        }
        InfraTool::Terraform
    }

    pub fn name(&self) -> &'static str {
        match self {
            InfraTool::Terraform => "terraform",
            InfraTool::Pulumi => "pulumi",
        }
    }
}

/// Logical operations performed against a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOp {
    /// Connect to the remote state backend
    Init,
    NewStack,
    SelectStack,
    Refresh,
    Apply,
    Destroy,
    Output,
    RemoveStack,
}

impl ToolOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOp::Init => "init",
            ToolOp::NewStack => "new-stack",
            ToolOp::SelectStack => "select-stack",
            ToolOp::Refresh => "refresh",
            ToolOp::Apply => "apply",
            ToolOp::Destroy => "destroy",
            ToolOp::Output => "output",
            ToolOp::RemoveStack => "remove-stack",
        }
    }
}

/// Builds commands for one tool against one stack
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub tool: InfraTool,
    pub program: String,
    pub stack: String,
}

impl ToolCommand {
    pub fn new(tool: InfraTool, program: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            tool,
            program: program.into(),
            stack: stack.into(),
        }
    }

    /// Arguments for `op`, or `None` when the tool has no equivalent
    pub fn args(&self, op: ToolOp) -> Option<Vec<String>> {
        let stack = self.stack.as_str();
        let var_file_arg = format!("-var-file={}", VAR_FILE);
        let var_file = var_file_arg.as_str();
        let args: Vec<&str> = match (self.tool, op) {
            (InfraTool::Terraform, ToolOp::Init) => vec!["init", "-input=false", "-no-color"],
            (InfraTool::Terraform, ToolOp::NewStack) => vec!["workspace", "new", stack],
            (InfraTool::Terraform, ToolOp::SelectStack) => vec!["workspace", "select", stack],
            (InfraTool::Terraform, ToolOp::Refresh) => vec![
                "apply",
                "-refresh-only",
                "-auto-approve",
                "-input=false",
                "-no-color",
                var_file,
            ],
            (InfraTool::Terraform, ToolOp::Apply) => vec![
                "apply",
                "-auto-approve",
                "-input=false",
                "-no-color",
                var_file,
            ],
            (InfraTool::Terraform, ToolOp::Destroy) => vec![
                "destroy",
                "-auto-approve",
                "-input=false",
                "-no-color",
                var_file,
            ],
            (InfraTool::Terraform, ToolOp::Output) => vec!["output", "-json"],
            (InfraTool::Terraform, ToolOp::RemoveStack) => return None,

            (InfraTool::Pulumi, ToolOp::Init) => vec!["login", "--non-interactive"],
            (InfraTool::Pulumi, ToolOp::NewStack) => {
                vec!["stack", "init", stack, "--non-interactive"]
            }
            (InfraTool::Pulumi, ToolOp::SelectStack) => {
                vec!["stack", "select", stack, "--non-interactive"]
            }
            (InfraTool::Pulumi, ToolOp::Refresh) => vec![
                "refresh",
                "--yes",
                "--skip-preview",
                "--non-interactive",
                "--stack",
                stack,
            ],
            (InfraTool::Pulumi, ToolOp::Apply) => vec![
                "up",
                "--yes",
                "--skip-preview",
                "--non-interactive",
                "--stack",
                stack,
            ],
            (InfraTool::Pulumi, ToolOp::Destroy) => vec![
                "destroy",
                "--yes",
                "--skip-preview",
                "--non-interactive",
                "--stack",
                stack,
            ],
            (InfraTool::Pulumi, ToolOp::Output) => {
                vec!["stack", "output", "--json", "--non-interactive", "--stack", stack]
            }
            (InfraTool::Pulumi, ToolOp::RemoveStack) => {
                vec!["stack", "rm", "--yes", "--non-interactive", stack]
            }
        };
        Some(args.into_iter().map(String::from).collect())
    }

    /// Full command for `op` run in `cwd` with `env`
    pub fn spec(&self, op: ToolOp, cwd: &Path, env: &[(String, String)]) -> Option<CommandSpec> {
        let args = self.args(op)?;
        Some(
            CommandSpec::new(self.program.clone(), cwd)
                .args(args)
                .envs(env.iter().cloned()),
        )
    }
}

/// Parse the tool's JSON output into a flat name → value map.
///
/// Output of two characters or fewer (`""`, `"{}"`) means no outputs, and
/// anything that is not a JSON object is logged and treated the same way.
/// Terraform wraps each output as `{"value": .., "type": .., "sensitive": ..}`;
/// the wrapper is removed. Pulumi templates export their outputs under
/// `default.out`, which is unwrapped the same way.
pub fn parse_outputs(tool: InfraTool, raw: &str) -> Map<String, Value> {
    let raw = raw.trim();
    if raw.len() <= 2 {
        return Map::new();
    }

    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!("Ignoring non-object {} output: {}", tool.name(), other);
            return Map::new();
        }
        Err(e) => {
            warn!("Ignoring malformed {} output: {}", tool.name(), e);
            return Map::new();
        }
    };

    match tool {
        InfraTool::Pulumi => {
            let exported = match parsed.get("default").and_then(|d| d.get("out")) {
                Some(Value::Object(out)) => Some(out.clone()),
                _ => None,
            };
            exported.unwrap_or(parsed)
        }
        InfraTool::Terraform => parsed
            .into_iter()
            .map(|(name, output)| match output {
                Value::Object(mut wrapper) if wrapper.contains_key("value") => {
                    let value = wrapper.remove("value").unwrap_or(Value::Null);
                    (name, value)
                }
                other => (name, other),
            })
            .collect(),
    }
}
