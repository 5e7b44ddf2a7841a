use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::resolve_in;
use crate::rule::{RuleContext, RuleDef};

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Options {
    /// Check that `*` patterns match at least one file
    glob: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { glob: true }
    }
}

/// Checks every target in `exports`, including condition order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMissingExports;

impl RuleDef for NoMissingExports {
    fn name(&self) -> &str {
        "no-missing-exports"
    }

    fn description(&self) -> &str {
        "require every `exports` target to exist, with `types` first and `default` last"
    }

    fn check(&self, ctx: &mut RuleContext, options: &Value) -> anyhow::Result<()> {
        let options: Options = super::parse_options(options)?;
        let Some(exports) = ctx.pkg_json().get("exports").cloned() else {
            return Ok(());
        };
        let root = ctx.install_path().to_path_buf();
        let mut checker = Checker {
            ctx,
            root: &root,
            options: &options,
        };
        checker.visit(".", &exports);
        Ok(())
    }
}

struct Checker<'a> {
    ctx: &'a mut RuleContext,
    root: &'a Path,
    options: &'a Options,
}

impl Checker<'_> {
    fn visit(&mut self, subpath: &str, value: &Value) {
        match value {
            Value::Null => {}
            Value::String(target) => self.check_target(subpath, target),
            Value::Array(fallbacks) => {
                for item in fallbacks {
                    self.visit(subpath, item);
                }
            }
            Value::Object(map) => self.visit_object(subpath, map),
            other => self
                .ctx
                .add_issue(format!("exports[\"{subpath}\"] has an invalid target: {other}")),
        }
    }

    fn visit_object(&mut self, subpath: &str, map: &Map<String, Value>) {
        let subpaths = map.keys().filter(|k| k.starts_with('.')).count();
        if subpaths == map.len() {
            for (key, value) in map {
                self.visit(key, value);
            }
            return;
        }
        if subpaths > 0 {
            self.ctx.add_issue(format!(
                "exports[\"{subpath}\"] mixes subpaths and conditions"
            ));
            return;
        }

        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        if keys.iter().position(|k| *k == "types").is_some_and(|i| i != 0) {
            self.ctx.add_issue(format!(
                "exports[\"{subpath}\"]: the `types` condition should come first"
            ));
        }
        if keys
            .iter()
            .position(|k| *k == "default")
            .is_some_and(|i| i != keys.len() - 1)
        {
            self.ctx.add_issue(format!(
                "exports[\"{subpath}\"]: the `default` condition should come last"
            ));
        }
        for value in map.values() {
            self.visit(subpath, value);
        }
    }

    fn check_target(&mut self, subpath: &str, target: &str) {
        if !target.starts_with("./") {
            self.ctx.add_issue(format!(
                "exports[\"{subpath}\"] target must start with `./`: `{target}`"
            ));
            return;
        }
        let Some(resolved) = resolve_in(self.root, target) else {
            self.ctx.add_issue(format!(
                "exports[\"{subpath}\"] points outside the package: `{target}`"
            ));
            return;
        };

        if target.contains('*') {
            if self.options.glob && !self.pattern_matches(target) {
                self.ctx.add_issue(format!(
                    "exports[\"{subpath}\"] pattern matches no files: `{target}`"
                ));
            }
            return;
        }

        let exists = if target.ends_with('/') {
            resolved.is_dir()
        } else {
            resolved.is_file()
        };
        if !exists {
            self.ctx.add_issue_for_file(
                format!("exports[\"{subpath}\"] points to a missing file: `{target}`"),
                resolved,
            );
        }
    }

    fn pattern_matches(&self, target: &str) -> bool {
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            target.trim_start_matches("./")
        );
        glob::glob(&pattern)
            .map(|mut paths| paths.any(|p| p.is_ok_and(|p| p.is_file())))
            .unwrap_or(false)
    }
}
