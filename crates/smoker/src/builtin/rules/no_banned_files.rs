use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::rule::{RuleContext, RuleDef};

/// File names that should never ship in a published package.
const BANNED_NAMES: &[&str] = &[
    ".env",
    ".env.local",
    ".env.production",
    ".git-credentials",
    ".netrc",
    ".npmrc",
    ".pgpass",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    "id_rsa",
];

/// Extensions of private key and keystore files.
const BANNED_EXTENSIONS: &[&str] = &["key", "p12", "pem", "pfx"];

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Options {
    /// File names that are fine after all
    allow: Vec<String>,
    /// Extra file names to ban
    deny: Vec<String>,
}

/// Flags secrets and credentials that made it into the tarball.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBannedFiles;

impl RuleDef for NoBannedFiles {
    fn name(&self) -> &str {
        "no-banned-files"
    }

    fn description(&self) -> &str {
        "disallow credentials and other sensitive files in the published package"
    }

    fn check(&self, ctx: &mut RuleContext, options: &Value) -> anyhow::Result<()> {
        let options: Options = super::parse_options(options)?;
        let root = ctx.install_path().to_path_buf();
        let mut found = Vec::new();
        walk(&root, &root, &options, &mut found)?;
        found.sort();
        for relative in found {
            ctx.add_issue_for_file(
                format!("banned file `{relative}` is published"),
                root.join(&relative),
            );
        }
        Ok(())
    }
}

fn is_banned(name: &str, options: &Options) -> bool {
    if options.allow.iter().any(|a| a == name) {
        return false;
    }
    if options.deny.iter().any(|d| d == name) || BANNED_NAMES.contains(&name) {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BANNED_EXTENSIONS.contains(&ext))
}

fn walk(root: &Path, dir: &Path, options: &Options, found: &mut Vec<String>) -> anyhow::Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if name != "node_modules" {
                walk(root, &path, options, found)?;
            }
        } else if is_banned(&name, options) {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            found.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
