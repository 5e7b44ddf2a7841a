//! Configuration file handling for smoker.
//!
//! A project may carry a `.smoker.toml` next to its `package.json` (or in any
//! parent directory). Values from the file are defaults; command-line flags
//! win when explicitly given. [`resolve_options`] produces the final
//! [`SmokerOptions`] a run is driven by.
//!
//! ```toml
//! pkg_managers = ["npm", "npm@9.8.1"]
//! add = ["typescript@5"]
//! all = true
//! scripts = ["test"]
//! job_timeout = "5m"
//!
//! [rules]
//! no-banned-files = "warn"
//! no-missing-exports = { severity = "error", options = { glob = false } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use smoker_types::{
    DEFAULT_PKG_MANAGER, RuleConfig, RuleSeverity, SmokerOptions, deserialize_opt_duration,
    serialize_opt_duration,
};

/// Default config file name
pub const CONFIG_FILE: &str = ".smoker.toml";

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// A rule entry: either a bare severity or a table with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSetting {
    /// `rule = "warn"`
    Severity(RuleSeverity),
    /// `rule = { severity = "warn", options = { ... } }`
    Full {
        #[serde(default)]
        severity: RuleSeverity,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl RuleSetting {
    fn into_rule_config(self) -> RuleConfig {
        match self {
            RuleSetting::Severity(severity) => RuleConfig {
                severity,
                options: serde_json::Value::Null,
            },
            RuleSetting::Full { severity, options } => RuleConfig { severity, options },
        }
    }
}

/// Contents of `.smoker.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pkg_managers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    add: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    all: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scripts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    linger: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reporters: Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_duration",
        deserialize_with = "deserialize_opt_duration"
    )]
    job_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    rules: BTreeMap<String, RuleSetting>,
}

impl Config {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pkg_managers(&self) -> Vec<String> {
        self.pkg_managers
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_PKG_MANAGER.to_string()])
    }

    pub fn add(&self) -> &[String] {
        self.add.as_deref().unwrap_or_default()
    }

    pub fn all(&self) -> bool {
        self.all.unwrap_or(false)
    }

    pub fn workspace(&self) -> &[String] {
        self.workspace.as_deref().unwrap_or_default()
    }

    pub fn scripts(&self) -> &[String] {
        self.scripts.as_deref().unwrap_or_default()
    }

    pub fn lint(&self) -> bool {
        self.lint.unwrap_or(true)
    }

    pub fn linger(&self) -> bool {
        self.linger.unwrap_or(false)
    }

    pub fn bail(&self) -> bool {
        self.bail.unwrap_or(false)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    pub fn json(&self) -> bool {
        self.json.unwrap_or(false)
    }

    pub fn reporters(&self) -> &[String] {
        self.reporters.as_deref().unwrap_or_default()
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout
    }

    pub fn event_log(&self) -> Option<&Path> {
        self.event_log.as_deref()
    }

    pub fn rules(&self) -> &BTreeMap<String, RuleSetting> {
        &self.rules
    }

    /// Merge with another config, with `other` taking precedence.
    ///
    /// Rule tables are merged per rule.
    pub fn merge(&self, other: &Config) -> Config {
        let mut rules = self.rules.clone();
        rules.extend(other.rules.clone());
        Config {
            pkg_managers: other.pkg_managers.clone().or_else(|| self.pkg_managers.clone()),
            add: other.add.clone().or_else(|| self.add.clone()),
            all: other.all.or(self.all),
            workspace: other.workspace.clone().or_else(|| self.workspace.clone()),
            scripts: other.scripts.clone().or_else(|| self.scripts.clone()),
            lint: other.lint.or(self.lint),
            linger: other.linger.or(self.linger),
            bail: other.bail.or(self.bail),
            verbose: other.verbose.or(self.verbose),
            json: other.json.or(self.json),
            reporters: other.reporters.clone().or_else(|| self.reporters.clone()),
            job_timeout: other.job_timeout.or(self.job_timeout),
            event_log: other.event_log.clone().or_else(|| self.event_log.clone()),
            rules,
        }
    }
}

/// Values given on the command line. Empty lists and `false` mean "not given".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub pkg_managers: Vec<String>,
    pub add: Vec<String>,
    pub all: bool,
    pub workspaces: Vec<String>,
    pub scripts: Vec<String>,
    pub lint: Option<bool>,
    pub linger: bool,
    pub bail: bool,
    pub verbose: bool,
    pub json: bool,
    pub reporters: Vec<String>,
    pub job_timeout: Option<Duration>,
    pub event_log: Option<PathBuf>,
    pub rules: BTreeMap<String, RuleSeverity>,
}

fn pick(cli: &[String], config: &[String]) -> Vec<String> {
    if cli.is_empty() {
        config.to_vec()
    } else {
        cli.to_vec()
    }
}

/// Merge a config with command-line overrides into run options.
pub fn resolve_options(config: &Config, cwd: &Path, cli: &CliOverrides) -> Result<SmokerOptions> {
    let pkg_managers = if cli.pkg_managers.is_empty() {
        config.pkg_managers()
    } else {
        cli.pkg_managers.clone()
    };
    if pkg_managers.is_empty() {
        bail!("at least one package manager is required");
    }

    let all = cli.all || config.all();
    let workspaces = pick(&cli.workspaces, config.workspace());
    if all && !workspaces.is_empty() {
        bail!("--all and --workspace are mutually exclusive");
    }

    let mut rules: BTreeMap<String, RuleConfig> = config
        .rules()
        .iter()
        .map(|(id, setting)| (id.clone(), setting.clone().into_rule_config()))
        .collect();
    for (id, severity) in &cli.rules {
        rules
            .entry(id.clone())
            .and_modify(|rc| rc.severity = *severity)
            .or_insert_with(|| RuleConfig {
                severity: *severity,
                options: serde_json::Value::Null,
            });
    }

    Ok(SmokerOptions {
        cwd: cwd.to_path_buf(),
        pkg_managers,
        add: pick(&cli.add, config.add()),
        all,
        workspaces,
        scripts: pick(&cli.scripts, config.scripts()),
        lint: cli.lint.unwrap_or_else(|| config.lint()),
        linger: cli.linger || config.linger(),
        bail: cli.bail || config.bail(),
        verbose: cli.verbose || config.verbose(),
        json: cli.json || config.json(),
        reporters: pick(&cli.reporters, config.reporters()),
        rules,
        job_timeout: cli.job_timeout.or(config.job_timeout()),
        event_log: cli
            .event_log
            .clone()
            .or_else(|| config.event_log().map(Path::to_path_buf)),
    })
}

/// Load configuration from `.smoker.toml` in a directory.
///
/// A missing file yields the default config.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_config_from_file(&path)
}

/// Load configuration from an explicit file. The file must exist.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Search for `.smoker.toml` starting in `start_dir` and walking up.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}
