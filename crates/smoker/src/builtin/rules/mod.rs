//! Built-in lint rules.
//!
//! Rules run on the blocking pool, so they use `std::fs` directly.

mod no_banned_files;
mod no_missing_entry_point;
mod no_missing_exports;
mod no_missing_pkg_files;

pub use no_banned_files::NoBannedFiles;
pub use no_missing_entry_point::NoMissingEntryPoint;
pub use no_missing_exports::NoMissingExports;
pub use no_missing_pkg_files::NoMissingPkgFiles;

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse rule options; `null` means defaults.
pub(crate) fn parse_options<T: DeserializeOwned + Default>(options: &Value) -> anyhow::Result<T> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).context("invalid rule options")
}

/// Resolve a package-relative path, refusing to leave the package.
pub(crate) fn resolve_in(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return None;
    }
    Some(
        relative
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .fold(root.to_path_buf(), |acc, c| acc.join(c)),
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use serde_json::Value;
    use smoker_types::{LintManifest, RuleIssue, RuleSeverity};

    use crate::rule::{RuleContext, RuleDef};

    /// Write `files` under `root`, creating parent directories.
    pub fn write_files(root: &Path, files: &[&str]) {
        for file in files {
            let path = root.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(&path, "").expect("write");
        }
    }

    /// Run `rule` against a package installed at `root`.
    pub fn run_rule(
        rule: &dyn RuleDef,
        root: &Path,
        pkg_json: Value,
        options: Value,
    ) -> anyhow::Result<Vec<RuleIssue>> {
        let manifest = LintManifest {
            pkg_name: "fixture".into(),
            install_path: root.to_path_buf(),
            local_path: root.to_path_buf(),
            pkg_json,
        };
        let mut ctx = RuleContext::new(format!("smoker/{}", rule.name()), &manifest, RuleSeverity::Error);
        rule.check(&mut ctx, &options)?;
        Ok(ctx.into_issues())
    }

    pub fn messages(issues: &[RuleIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.message.as_str()).collect()
    }
}
