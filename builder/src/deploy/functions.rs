//! Function inventory for services that expose functions
//!
//! Sources are laid out as `modules/<module>/<function>.<ext>` (optionally
//! under `src/`). A file counts as a function when it has a default export
//! (TypeScript/JavaScript) or a top-level `handler` (Python).

use std::path::Path;

use openapi_client::FunctionRef;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Service types whose deployments report a function inventory
pub const FUNCTION_SERVICE_TYPES: [&str; 2] = ["api", "webhook-server"];

const MODULE_ROOTS: [&str; 2] = ["src/modules", "modules"];

pub fn exposes_functions(service_type: &str) -> bool {
    FUNCTION_SERVICE_TYPES.contains(&service_type)
}

fn is_candidate(stem: &str, extension: &str) -> bool {
    if !matches!(extension, "ts" | "js" | "py") {
        return false;
    }
    if stem == "index" || stem == "__init__" || stem.starts_with('_') {
        return false;
    }
    !(stem.ends_with(".test") || stem.ends_with(".spec") || stem.ends_with(".d"))
}

fn declares_handler(contents: &str, extension: &str) -> bool {
    match extension {
        "py" => contents.lines().any(|l| l.starts_with("def handler(")),
        _ => contents.contains("export default"),
    }
}

/// Scan `source_dir` for function modules, sorted by module then function
pub fn scan(source_dir: &Path) -> Vec<FunctionRef> {
    let Some(root) = MODULE_ROOTS
        .iter()
        .map(|r| source_dir.join(r))
        .find(|p| p.is_dir())
    else {
        debug!("No modules directory under {}", source_dir.display());
        return Vec::new();
    };

    let mut functions = Vec::new();
    for entry in WalkDir::new(&root).min_depth(2).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path during function scan: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let (Some(stem), Some(extension)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if !is_candidate(stem, extension) {
            continue;
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                continue;
            }
        };
        if !declares_handler(&contents, extension) {
            continue;
        }

        let module = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        functions.push(FunctionRef {
            module: module.to_string(),
            function: stem.to_string(),
        });
    }

    functions.sort();
    functions.dedup();
    debug!("Found {} functions", functions.len());
    functions
}
