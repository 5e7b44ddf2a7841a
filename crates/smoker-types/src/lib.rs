//! Core domain types for smoker.
//!
//! This crate provides the data model shared by the engine, the plugins, and
//! the reporters: workspaces, package-manager targets, the per-stage manifests
//! and results, run options, and the event taxonomy emitted during a run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod event;

pub use event::{
    RunBegin, RunOutcome, SmokerEvent, Stage, StageEvent, StageEventKind, StageOutput,
    StageSummary,
};

/// One publishable package within the project under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// `name` field of the workspace's `package.json`
    pub pkg_name: String,
    /// Directory containing the workspace
    pub local_path: PathBuf,
    /// Path to the workspace's `package.json`
    pub pkg_json_path: PathBuf,
    /// Parsed `package.json`
    pub pkg_json: serde_json::Value,
}

impl WorkspaceInfo {
    /// Build a workspace entry from a parsed `package.json` located in `local_path`.
    pub fn new(local_path: impl Into<PathBuf>, pkg_json: serde_json::Value) -> Self {
        let local_path = local_path.into();
        let pkg_name = pkg_json
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            pkg_name,
            pkg_json_path: local_path.join("package.json"),
            local_path,
            pkg_json,
        }
    }

    /// Whether the workspace is marked `"private": true`.
    pub fn is_private(&self) -> bool {
        self.pkg_json
            .get("private")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Static identity of a resolved package-manager target.
///
/// Ordered by name, then version, so targets can key maps and events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageManagerSpec {
    /// Package manager name, e.g. `npm`
    pub name: String,
    /// Resolved version
    pub version: String,
    /// Executable name used for system installs
    pub bin: String,
    /// `true` when the system-installed executable is used
    pub is_system: bool,
}

impl PackageManagerSpec {
    /// A target backed by the executable already on `PATH`.
    pub fn system(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bin: name.clone(),
            name,
            version: version.into(),
            is_system: true,
        }
    }

    /// A target whose exact version is fetched on demand.
    pub fn managed(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bin: name.clone(),
            name,
            version: version.into(),
            is_system: false,
        }
    }

    /// `name@version`
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for PackageManagerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_system {
            write!(f, "{}@{} (system)", self.name, self.version)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

/// One package to install into a target's temporary directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest {
    /// Package name
    pub pkg_name: String,
    /// What gets handed to the package manager: a tarball path or a dependency spec
    pub spec: String,
    /// Directory the install runs in
    pub cwd: PathBuf,
    /// Where the installed package ends up
    pub install_path: PathBuf,
    /// Source workspace; `None` for additional dependencies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// `true` for user-requested extra dependencies
    pub is_additional: bool,
}

impl InstallManifest {
    /// Manifest for a packed workspace tarball.
    pub fn workspace(
        pkg_name: impl Into<String>,
        tarball: impl Into<String>,
        cwd: impl Into<PathBuf>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        let pkg_name = pkg_name.into();
        let cwd = cwd.into();
        Self {
            install_path: node_modules_path(&cwd, &pkg_name),
            pkg_name,
            spec: tarball.into(),
            cwd,
            local_path: Some(local_path.into()),
            is_additional: false,
        }
    }

    /// Manifest for an additional dependency such as `left-pad@1.3.0`.
    pub fn additional(spec: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let spec = spec.into();
        let cwd = cwd.into();
        let pkg_name = dependency_name(&spec).to_string();
        Self {
            install_path: node_modules_path(&cwd, &pkg_name),
            pkg_name,
            spec,
            cwd,
            local_path: None,
            is_additional: true,
        }
    }

    /// Only workspace-derived manifests are linted and have scripts run.
    pub fn is_eligible(&self) -> bool {
        !self.is_additional && self.local_path.is_some()
    }
}

fn node_modules_path(cwd: &Path, pkg_name: &str) -> PathBuf {
    pkg_name
        .split('/')
        .fold(cwd.join("node_modules"), |acc, part| acc.join(part))
}

/// Strip the version range from a dependency spec: `@scope/pkg@^1` -> `@scope/pkg`.
pub fn dependency_name(spec: &str) -> &str {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(idx) => &spec[..idx + search_from],
        None => spec,
    }
}

/// Outcome of installing one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    /// The manifest that was installed
    pub manifest: InstallManifest,
    /// Captured standard output
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error
    #[serde(default)]
    pub stderr: String,
}

/// What a rule checker needs to locate an installed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LintManifest {
    /// Package name
    pub pkg_name: String,
    /// Installed location
    pub install_path: PathBuf,
    /// Source workspace
    pub local_path: PathBuf,
    /// The installed package's `package.json`
    pub pkg_json: serde_json::Value,
}

/// Rule severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    /// Rule is disabled
    Off,
    /// Issues are reported but do not fail the run
    Warn,
    /// Issues fail the run
    #[default]
    Error,
}

impl fmt::Display for RuleSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSeverity::Off => write!(f, "off"),
            RuleSeverity::Warn => write!(f, "warn"),
            RuleSeverity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RuleSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(RuleSeverity::Off),
            "warn" | "warning" | "1" => Ok(RuleSeverity::Warn),
            "error" | "2" => Ok(RuleSeverity::Error),
            other => Err(format!("unknown rule severity: {other}")),
        }
    }
}

/// One issue reported by a rule against an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleIssue {
    /// Rule that reported the issue
    pub rule_id: String,
    /// Package the issue was found in
    pub pkg_name: String,
    /// Severity the rule ran with
    pub severity: RuleSeverity,
    /// Human-readable description
    pub message: String,
    /// Offending file, when the rule can point at one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Outcome of one rule against one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleResult {
    /// No issues
    Ok { rule_id: String },
    /// The rule reported issues
    Failed {
        rule_id: String,
        issues: Vec<RuleIssue>,
    },
    /// The rule implementation itself failed
    Errored { rule_id: String, error: ErrorInfo },
}

impl RuleResult {
    /// Rule this result belongs to.
    pub fn rule_id(&self) -> &str {
        match self {
            RuleResult::Ok { rule_id }
            | RuleResult::Failed { rule_id, .. }
            | RuleResult::Errored { rule_id, .. } => rule_id,
        }
    }

    /// Errored results, and failed results carrying an error-severity issue, fail lint.
    pub fn is_failure(&self) -> bool {
        match self {
            RuleResult::Ok { .. } => false,
            RuleResult::Failed { issues, .. } => {
                issues.iter().any(|i| i.severity == RuleSeverity::Error)
            }
            RuleResult::Errored { .. } => true,
        }
    }
}

/// All rule results for one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintResult {
    /// Package name
    pub pkg_name: String,
    /// Target label (`name@version`) that installed the package
    pub pkg_manager: String,
    /// Installed location
    pub install_path: PathBuf,
    /// One entry per applicable rule
    pub results: Vec<RuleResult>,
}

impl LintResult {
    /// `true` unless some rule result fails lint.
    pub fn passed(&self) -> bool {
        !self.results.iter().any(RuleResult::is_failure)
    }

    /// All reported issues, in rule order.
    pub fn issues(&self) -> impl Iterator<Item = &RuleIssue> {
        self.results.iter().flat_map(|r| match r {
            RuleResult::Failed { issues, .. } => issues.as_slice(),
            _ => &[],
        })
    }
}

/// One (installed package, script name) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScriptManifest {
    /// Package name
    pub pkg_name: String,
    /// Script to run
    pub script: String,
    /// Installed location; the script runs here
    pub cwd: PathBuf,
    /// Source workspace
    pub local_path: PathBuf,
}

impl RunScriptManifest {
    /// `pkg:script`, used as the item subject in events.
    pub fn subject(&self) -> String {
        format!("{}:{}", self.pkg_name, self.script)
    }
}

/// Outcome of a run-script job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScriptOutcome {
    /// Script exited successfully
    Ok,
    /// Script failed or could not run
    Failed { error: ErrorInfo },
    /// Script was not run
    Skipped { reason: String },
}

/// Result of one run-script job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScriptResult {
    /// The job
    pub manifest: RunScriptManifest,
    /// Target label (`name@version`)
    pub pkg_manager: String,
    /// What happened
    pub outcome: ScriptOutcome,
    /// Captured standard output
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error
    #[serde(default)]
    pub stderr: String,
}

impl RunScriptResult {
    /// Successful run.
    pub fn ok(
        manifest: RunScriptManifest,
        pkg_manager: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            manifest,
            pkg_manager: pkg_manager.into(),
            outcome: ScriptOutcome::Ok,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Failed run.
    pub fn failed(
        manifest: RunScriptManifest,
        pkg_manager: impl Into<String>,
        error: ErrorInfo,
    ) -> Self {
        Self {
            manifest,
            pkg_manager: pkg_manager.into(),
            outcome: ScriptOutcome::Failed { error },
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Skipped run.
    pub fn skipped(
        manifest: RunScriptManifest,
        pkg_manager: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            manifest,
            pkg_manager: pkg_manager.into(),
            outcome: ScriptOutcome::Skipped {
                reason: reason.into(),
            },
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ScriptOutcome::Failed { .. })
    }
}

/// Error classification carried in events and final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Workspace or plugin loading failed
    Discovery,
    /// Packing failed, including malformed tool output
    Pack,
    /// Installing failed
    Install,
    /// A rule implementation failed
    Rule,
    /// Lint found error-severity issues
    Lint,
    /// A script failed
    Script,
    /// The abort signal was observed
    Aborted,
    /// Several errors folded together
    Aggregate,
    /// Worker setup, teardown, or temp directory handling failed
    Lifecycle,
    /// Invalid configuration
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::Pack => "pack",
            ErrorKind::Install => "install",
            ErrorKind::Rule => "rule",
            ErrorKind::Lint => "lint",
            ErrorKind::Script => "script",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Aggregate => "aggregate",
            ErrorKind::Lifecycle => "lifecycle",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// Serializable error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Classification
    pub kind: ErrorKind,
    /// Rendered message
    pub message: String,
    /// Target label, when the error belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_manager: Option<String>,
    /// Package name, when the error belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_name: Option<String>,
    /// Folded child errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<ErrorInfo>,
}

impl ErrorInfo {
    /// Bare error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            pkg_manager: None,
            pkg_name: None,
            causes: Vec::new(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Severity and options for one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Severity override
    pub severity: RuleSeverity,
    /// Rule-specific options
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Everything a run needs to know, after config and CLI have been merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmokerOptions {
    /// Project root
    pub cwd: PathBuf,
    /// Requested package managers (`npm`, `npm@9.8.1`)
    pub pkg_managers: Vec<String>,
    /// Additional dependencies to install alongside the workspaces
    pub add: Vec<String>,
    /// Test every non-private workspace
    pub all: bool,
    /// Test only these workspaces (name or path)
    pub workspaces: Vec<String>,
    /// Scripts to run in each installed package
    pub scripts: Vec<String>,
    /// Run lint rules
    pub lint: bool,
    /// Keep temp directories after the run
    pub linger: bool,
    /// Skip remaining scripts of a target after its first script failure
    pub bail: bool,
    /// Verbose output
    pub verbose: bool,
    /// Machine-readable output
    pub json: bool,
    /// Reporters to enable; empty means each reporter decides for itself
    pub reporters: Vec<String>,
    /// Per-rule configuration, keyed by rule name or id
    pub rules: BTreeMap<String, RuleConfig>,
    /// Kill pack/install/run-script processes after this long
    #[serde(
        default,
        serialize_with = "serialize_opt_duration",
        deserialize_with = "deserialize_opt_duration"
    )]
    pub job_timeout: Option<Duration>,
    /// Write every event as JSONL to this file
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for SmokerOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            pkg_managers: vec![DEFAULT_PKG_MANAGER.to_string()],
            add: Vec::new(),
            all: false,
            workspaces: Vec::new(),
            scripts: Vec::new(),
            lint: true,
            linger: false,
            bail: false,
            verbose: false,
            json: false,
            reporters: Vec::new(),
            rules: BTreeMap::new(),
            job_timeout: None,
            event_log: None,
        }
    }
}

/// Package manager used when none is requested.
pub const DEFAULT_PKG_MANAGER: &str = "npm";

/// Serialize a duration as a humantime string (`"1m 30s"`).
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Deserialize a humantime string (`"90s"`, `"2m"`) into a duration.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Optional form of [`serialize_duration`].
pub fn serialize_opt_duration<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(d) => serialize_duration(d, serializer),
        None => serializer.serialize_none(),
    }
}

/// Optional form of [`deserialize_duration`].
pub fn deserialize_opt_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn workspace_info_reads_name_and_private_flag() {
        let ws = WorkspaceInfo::new("/p/a", json!({"name": "a", "private": true}));
        assert_eq!(ws.pkg_name, "a");
        assert!(ws.is_private());
        assert_eq!(ws.pkg_json_path, PathBuf::from("/p/a/package.json"));
    }

    #[test]
    fn dependency_name_strips_versions() {
        assert_eq!(dependency_name("left-pad"), "left-pad");
        assert_eq!(dependency_name("left-pad@1.3.0"), "left-pad");
        assert_eq!(dependency_name("@scope/pkg"), "@scope/pkg");
        assert_eq!(dependency_name("@scope/pkg@^2"), "@scope/pkg");
    }

    #[test]
    fn scoped_install_path_nests_under_node_modules() {
        let m = InstallManifest::workspace("@scope/pkg", "/t/pkg.tgz", "/t", "/src/pkg");
        assert_eq!(
            m.install_path,
            PathBuf::from("/t/node_modules/@scope/pkg")
        );
        assert!(m.is_eligible());
    }

    #[test]
    fn additional_manifests_are_not_eligible() {
        let m = InstallManifest::additional("left-pad@1", "/t");
        assert_eq!(m.pkg_name, "left-pad");
        assert!(m.is_additional);
        assert!(!m.is_eligible());
    }

    #[test]
    fn warn_issues_do_not_fail_lint() {
        let issue = |severity| RuleIssue {
            rule_id: "r".into(),
            pkg_name: "a".into(),
            severity,
            message: "m".into(),
            file: None,
        };
        let warn = RuleResult::Failed {
            rule_id: "r".into(),
            issues: vec![issue(RuleSeverity::Warn)],
        };
        let error = RuleResult::Failed {
            rule_id: "r".into(),
            issues: vec![issue(RuleSeverity::Error)],
        };
        assert!(!warn.is_failure());
        assert!(error.is_failure());
        assert!(
            RuleResult::Errored {
                rule_id: "r".into(),
                error: ErrorInfo::new(ErrorKind::Rule, "boom"),
            }
            .is_failure()
        );
    }

    #[test]
    fn pkg_manager_spec_label_and_display() {
        let system = PackageManagerSpec::system("npm", "10.2.0");
        assert_eq!(system.label(), "npm@10.2.0");
        assert_eq!(system.to_string(), "npm@10.2.0 (system)");
        assert_eq!(PackageManagerSpec::managed("npm", "9.8.1").to_string(), "npm@9.8.1");
    }

    #[test]
    fn rule_severity_parses_aliases() {
        assert_eq!("warning".parse::<RuleSeverity>(), Ok(RuleSeverity::Warn));
        assert_eq!("2".parse::<RuleSeverity>(), Ok(RuleSeverity::Error));
        assert!("loud".parse::<RuleSeverity>().is_err());
    }

    #[test]
    fn options_job_timeout_uses_humantime() {
        let opts = SmokerOptions {
            job_timeout: Some(Duration::from_secs(90)),
            ..SmokerOptions::default()
        };
        let json = serde_json::to_value(&opts).expect("serialize");
        assert_eq!(json["job_timeout"], "1m 30s");
        let back: SmokerOptions = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.job_timeout, Some(Duration::from_secs(90)));
    }

    proptest! {
        #[test]
        fn dependency_name_is_prefix_of_spec(name in "[a-z][a-z0-9-]{0,12}", version in "[0-9]\\.[0-9]\\.[0-9]") {
            let spec = format!("{name}@{version}");
            prop_assert_eq!(dependency_name(&spec), name.as_str());
        }
    }
}
