//! Template variable files
//!
//! `main.tfvars` is HCL, one `name = value` per line; `tfvars.json` holds
//! the same configuration as JSON for templates that read it directly.
//! Names starting with `exo_` are reserved for the two values the builder
//! always supplies: `exo_context` and `exo_source`.

use std::path::Path;

use openapi_client::{DeploymentContext, InputKind};
use serde_json::{Map, Value};
use tracing::debug;

use crate::deploy::tool::VAR_FILE;
use crate::deploy::workspace::Workspace;
use crate::errors::BuildError;

pub const VARS_JSON_FILE: &str = "tfvars.json";

const RESERVED_PREFIX: &str = "exo_";

/// Quote `value` as an HCL string literal. Template sequences are escaped
/// so user values are never interpolated.
pub fn hcl_string(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted.replace("${", "$${").replace("%{", "%%{")
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value whose kind is not declared
fn render_inferred(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(hcl_string(s)),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => {
            Some(value.to_string().replace("${", "$${").replace("%{", "%%{"))
        }
    }
}

/// Render one pack input according to its declared kind
pub fn render_input(kind: InputKind, value: &Value) -> Option<String> {
    match kind {
        InputKind::String => Some(hcl_string(&text_of(value))),
        InputKind::Number => match value {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if s.trim().parse::<f64>().is_ok() => Some(s.trim().to_string()),
            other => render_inferred(other),
        },
        // environment variables travel as one JSON-encoded string
        InputKind::Envars => Some(hcl_string(&value.to_string())),
        InputKind::Bool => Some(truthy(value).to_string()),
        InputKind::Other => render_inferred(value),
    }
}

/// Contents of `main.tfvars`
pub fn render_tfvars(
    context: &DeploymentContext,
    raw_context: &Value,
    source_dir: &Path,
) -> Result<String, BuildError> {
    let stack = &context.config.stack;
    let inputs = context
        .config
        .pack
        .as_ref()
        .map(|pack| pack.manifest.inputs.as_slice())
        .unwrap_or_default();

    let mut lines = Vec::new();
    if inputs.is_empty() {
        for (name, value) in stack {
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            if let Some(rendered) = render_inferred(value) {
                lines.push(format!("{} = {}", name, rendered));
            }
        }
    } else {
        for input in inputs {
            if input.name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            let Some(value) = stack.get(&input.name) else {
                debug!("No value configured for input {}", input.name);
                continue;
            };
            if let Some(rendered) = render_input(input.ui, value) {
                lines.push(format!("{} = {}", input.name, rendered));
            }
        }
    }

    let context_json = serde_json::to_string(raw_context)?;
    lines.push(format!("exo_context = {}", hcl_string(&context_json)));
    lines.push(format!(
        "exo_source = {}",
        hcl_string(&source_dir.to_string_lossy())
    ));

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    Ok(rendered)
}

/// Contents of `tfvars.json`
pub fn render_json(context: &DeploymentContext, raw_context: &Value, source_dir: &Path) -> Value {
    let mut vars: Map<String, Value> = context
        .config
        .stack
        .iter()
        .filter(|(name, _)| !name.starts_with(RESERVED_PREFIX))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    vars.insert("exo_context".to_string(), raw_context.clone());
    vars.insert(
        "exo_source".to_string(),
        Value::String(source_dir.to_string_lossy().into_owned()),
    );
    Value::Object(vars)
}

/// Write both variable files into the workspace
pub async fn write(
    workspace: &Workspace,
    context: &DeploymentContext,
    raw_context: &Value,
) -> Result<(), BuildError> {
    let source_dir = workspace.source_dir();
    let tfvars = render_tfvars(context, raw_context, source_dir.path())?;
    workspace.dir().file(VAR_FILE).write_string(&tfvars).await?;

    let json = render_json(context, raw_context, source_dir.path());
    workspace.dir().file(VARS_JSON_FILE).write_json(&json).await?;

    debug!("Wrote {} and {}", VAR_FILE, VARS_JSON_FILE);
    Ok(())
}
