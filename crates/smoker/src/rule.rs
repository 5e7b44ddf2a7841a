//! Lint rules supplied by plugins.

use std::path::{Path, PathBuf};

use serde_json::Value;
use smoker_types::{LintManifest, RuleIssue, RuleSeverity};

/// Read-only view of one installed package, plus an issue sink.
#[derive(Debug, Clone)]
pub struct RuleContext {
    rule_id: String,
    pkg_name: String,
    install_path: PathBuf,
    pkg_json: Value,
    severity: RuleSeverity,
    issues: Vec<RuleIssue>,
}

impl RuleContext {
    pub fn new(rule_id: impl Into<String>, manifest: &LintManifest, severity: RuleSeverity) -> Self {
        Self {
            rule_id: rule_id.into(),
            pkg_name: manifest.pkg_name.clone(),
            install_path: manifest.install_path.clone(),
            pkg_json: manifest.pkg_json.clone(),
            severity,
            issues: Vec::new(),
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn pkg_name(&self) -> &str {
        &self.pkg_name
    }

    /// Where the package was installed.
    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// The installed package's `package.json`.
    pub fn pkg_json(&self) -> &Value {
        &self.pkg_json
    }

    pub fn severity(&self) -> RuleSeverity {
        self.severity
    }

    /// Report an issue against the package.
    pub fn add_issue(&mut self, message: impl Into<String>) {
        self.push(message.into(), None);
    }

    /// Report an issue against a specific file.
    pub fn add_issue_for_file(&mut self, message: impl Into<String>, file: impl Into<PathBuf>) {
        self.push(message.into(), Some(file.into()));
    }

    fn push(&mut self, message: String, file: Option<PathBuf>) {
        self.issues.push(RuleIssue {
            rule_id: self.rule_id.clone(),
            pkg_name: self.pkg_name.clone(),
            severity: self.severity,
            message,
            file,
        });
    }

    pub fn issues(&self) -> &[RuleIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<RuleIssue> {
        self.issues
    }
}

/// A lint rule.
///
/// `check` is synchronous and runs on the blocking pool; a returned error or a
/// panic becomes an errored result for that package only.
pub trait RuleDef: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn default_severity(&self) -> RuleSeverity {
        RuleSeverity::Error
    }

    fn check(&self, ctx: &mut RuleContext, options: &Value) -> anyhow::Result<()>;
}
