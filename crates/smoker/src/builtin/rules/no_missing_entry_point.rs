use std::path::{Path, PathBuf};

use serde_json::Value;

use super::resolve_in;
use crate::rule::{RuleContext, RuleDef};

/// Extensions Node tries when resolving `main`.
const MAIN_EXTENSIONS: &[&str] = &["", ".js", ".json", ".node"];

/// Checks that `main` (or the implicit `index.js`) resolves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMissingEntryPoint;

/// Candidate files for `main`, in Node's resolution order.
fn main_candidates(root: &Path, main: &str) -> Vec<PathBuf> {
    let Some(base) = resolve_in(root, main) else {
        return Vec::new();
    };
    let base_str = base.to_string_lossy().into_owned();
    let mut candidates: Vec<PathBuf> = MAIN_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{base_str}{ext}")))
        .collect();
    candidates.extend(["index.js", "index.json", "index.node"].map(|f| base.join(f)));
    candidates
}

impl RuleDef for NoMissingEntryPoint {
    fn name(&self) -> &str {
        "no-missing-entry-point"
    }

    fn description(&self) -> &str {
        "require the package entry point to exist"
    }

    fn check(&self, ctx: &mut RuleContext, _options: &Value) -> anyhow::Result<()> {
        let root = ctx.install_path().to_path_buf();
        let pkg_json = ctx.pkg_json().clone();

        match pkg_json.get("main") {
            Some(Value::String(main)) => {
                if resolve_in(&root, main).is_none() {
                    ctx.add_issue(format!("`main` points outside the package: `{main}`"));
                } else if !main_candidates(&root, main).iter().any(|p| p.is_file()) {
                    ctx.add_issue(format!("`main` points to a missing file: `{main}`"));
                }
            }
            Some(other) => {
                ctx.add_issue(format!("`main` must be a string, found {other}"));
            }
            None => {
                // Packages with `exports` or only binaries have no implicit entry point.
                let implicit = pkg_json.get("exports").is_none() && pkg_json.get("bin").is_none();
                if implicit && !root.join("index.js").is_file() {
                    ctx.add_issue_for_file(
                        "no `main`, `exports`, or `bin`, and `index.js` is missing",
                        root.join("index.js"),
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::rules::testing::{messages, run_rule, write_files};
    use serde_json::json;

    fn check(files: &[&str], pkg_json: Value) -> Vec<String> {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_files(tmp.path(), files);
        let issues = run_rule(&NoMissingEntryPoint, tmp.path(), pkg_json, Value::Null).expect("check");
        messages(&issues).into_iter().map(str::to_string).collect()
    }

    #[test]
    fn main_resolves_like_node() {
        assert!(check(&["lib/index.js"], json!({"main": "lib/index.js"})).is_empty());
        assert!(check(&["lib/index.js"], json!({"main": "./lib/index"})).is_empty());
        assert!(check(&["lib/index.js"], json!({"main": "lib"})).is_empty());
    }

    #[test]
    fn missing_main_is_reported() {
        assert_eq!(
            check(&["index.js"], json!({"main": "dist/index.js"})),
            vec!["`main` points to a missing file: `dist/index.js`"]
        );
        assert_eq!(
            check(&[], json!({"main": "../outside.js"})),
            vec!["`main` points outside the package: `../outside.js`"]
        );
    }

    #[test]
    fn implicit_index() {
        assert!(check(&["index.js"], json!({})).is_empty());
        assert_eq!(check(&[], json!({})).len(), 1);
        assert!(check(&[], json!({"exports": "./lib.js"})).is_empty());
        assert!(check(&[], json!({"bin": "cli.js"})).is_empty());
    }
}
