use serde_json::Value;

use super::resolve_in;
use crate::rule::{RuleContext, RuleDef};

/// Checks files referenced by `bin`, `browser`, `module`, `types`, and `typings`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMissingPkgFiles;

/// `(field, path)` pairs named by the package metadata.
fn referenced_files(pkg_json: &Value) -> Vec<(String, String)> {
    let mut files = Vec::new();
    match pkg_json.get("bin") {
        Some(Value::String(path)) => files.push(("bin".to_string(), path.clone())),
        Some(Value::Object(bins)) => {
            for (name, path) in bins {
                if let Some(path) = path.as_str() {
                    files.push((format!("bin.{name}"), path.to_string()));
                }
            }
        }
        _ => {}
    }
    match pkg_json.get("browser") {
        Some(Value::String(path)) => files.push(("browser".to_string(), path.clone())),
        // Object form remaps modules; only file-to-file entries are checkable.
        Some(Value::Object(map)) => {
            for (from, to) in map {
                if let Some(to) = to.as_str().filter(|t| t.starts_with('.')) {
                    files.push((format!("browser[\"{from}\"]"), to.to_string()));
                }
            }
        }
        _ => {}
    }
    for field in ["module", "types", "typings"] {
        if let Some(path) = pkg_json.get(field).and_then(Value::as_str) {
            files.push((field.to_string(), path.to_string()));
        }
    }
    files
}

impl RuleDef for NoMissingPkgFiles {
    fn name(&self) -> &str {
        "no-missing-pkg-files"
    }

    fn description(&self) -> &str {
        "require files referenced by package.json fields to exist"
    }

    fn check(&self, ctx: &mut RuleContext, _options: &Value) -> anyhow::Result<()> {
        let root = ctx.install_path().to_path_buf();
        for (field, path) in referenced_files(ctx.pkg_json()) {
            match resolve_in(&root, &path) {
                Some(resolved) if resolved.is_file() => {}
                Some(resolved) => ctx.add_issue_for_file(
                    format!("`{field}` points to a missing file: `{path}`"),
                    resolved,
                ),
                None => ctx.add_issue(format!("`{field}` points outside the package: `{path}`")),
            }
        }
        Ok(())
    }
}
