use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use smoker::{ComponentKind, PluginRegistry, Smoker};
use smoker_config::{CliOverrides, Config};
use smoker_types::{RuleSeverity, SmokerOptions};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "smoker", version)]
#[command(about = "Smoke-test npm packages the way their consumers install them")]
struct Cli {
    /// Project root containing package.json (default: current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Config file (default: nearest .smoker.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Package manager to test with, e.g. `npm` or `npm@9.8.1` (repeatable)
    #[arg(short = 'p', long = "pkg-manager", global = true)]
    pkg_managers: Vec<String>,

    /// Extra dependency to install alongside the packed workspaces (repeatable)
    #[arg(short = 'a', long = "add", global = true)]
    add: Vec<String>,

    /// Test every non-private workspace.
    #[arg(long, global = true)]
    all: bool,

    /// Test only this workspace, by name or path (repeatable)
    #[arg(short = 'w', long = "workspace", global = true)]
    workspaces: Vec<String>,

    /// Keep temporary directories after the run.
    #[arg(long, global = true)]
    linger: bool,

    /// Show successful items and debug logs.
    #[arg(long, global = true)]
    verbose: bool,

    /// Print the final result as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Enable only these reporters, by name or id (repeatable)
    #[arg(long = "reporter", global = true)]
    reporters: Vec<String>,

    /// Kill pack, install, and script processes after this long (e.g. 5m)
    #[arg(long, value_parser = parse_duration, global = true)]
    job_timeout: Option<Duration>,

    /// Write every event as JSON lines to this file.
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,

    /// Set a rule's severity, e.g. `no-banned-files=warn` (repeatable)
    #[arg(long = "rule", value_parser = parse_rule, global = true)]
    rules: Vec<(String, RuleSeverity)>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack, install, and run scripts inside each installed package.
    Run {
        /// Scripts to run
        #[arg(required = true)]
        scripts: Vec<String>,

        /// Skip a package manager's remaining scripts after its first failure.
        #[arg(long)]
        bail: bool,

        /// Do not lint the installed packages.
        #[arg(long)]
        no_lint: bool,
    },
    /// Pack, install, and lint each installed package.
    Lint,
    /// List registered components.
    List {
        #[arg(value_enum)]
        kind: ListKind,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    PkgManagers,
    Rules,
    Reporters,
}

impl From<ListKind> for ComponentKind {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::PkgManagers => ComponentKind::PkgManager,
            ListKind::Rules => ComponentKind::Rule,
            ListKind::Reporters => ComponentKind::Reporter,
        }
    }
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let (scripts, bail, lint) = match &self.cmd {
            Commands::Run {
                scripts,
                bail,
                no_lint,
            } => (scripts.clone(), *bail, no_lint.then_some(false)),
            Commands::Lint => (Vec::new(), false, Some(true)),
            Commands::List { .. } => (Vec::new(), false, None),
        };
        CliOverrides {
            pkg_managers: self.pkg_managers.clone(),
            add: self.add.clone(),
            all: self.all,
            workspaces: self.workspaces.clone(),
            scripts,
            lint,
            linger: self.linger,
            bail,
            verbose: self.verbose,
            json: self.json,
            reporters: self.reporters.clone(),
            job_timeout: self.job_timeout,
            event_log: self.event_log.clone(),
            rules: self.rules.iter().cloned().collect::<BTreeMap<_, _>>(),
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("invalid duration `{s}`: {e}"))
}

fn parse_rule(s: &str) -> Result<(String, RuleSeverity), String> {
    let (rule, severity) = s
        .split_once('=')
        .ok_or_else(|| format!("expected RULE=SEVERITY, got `{s}`"))?;
    if rule.trim().is_empty() {
        return Err(format!("missing rule name in `{s}`"));
    }
    Ok((rule.trim().to_string(), severity.parse()?))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn registry() -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::with_builtins();
    registry
        .register(progress::plugin())
        .context("failed to register CLI plugin")?;
    Ok(registry)
}

fn load_config(cli: &Cli, cwd: &Path) -> Result<Config> {
    if let Some(path) = &cli.config {
        return smoker_config::load_config_from_file(path);
    }
    match smoker_config::find_config(cwd) {
        Some(path) => {
            debug!(path = %path.display(), "using config file");
            smoker_config::load_config_from_file(&path)
        }
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    init_logging(cli.verbose);
    let cwd = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine current directory")?,
    };
    let config = load_config(&cli, &cwd)?;
    let mut options = smoker_config::resolve_options(&config, &cwd, &cli.overrides())?;
    if matches!(cli.cmd, Commands::Lint) {
        // Scripts from the config file belong to `run`.
        options.scripts.clear();
    }

    match cli.cmd {
        Commands::List { kind } => {
            print_components(&registry()?, kind.into(), options.json)?;
            Ok(true)
        }
        Commands::Run { .. } | Commands::Lint => smoke(options).await,
    }
}

async fn smoke(options: SmokerOptions) -> Result<bool> {
    let handle = Smoker::new(options, registry()?).start();

    let stopper = handle.stopper();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping running jobs");
            stopper.halt();
            stopper.abort();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();
    Ok(outcome?.ok)
}

fn print_components(registry: &PluginRegistry, kind: ComponentKind, json: bool) -> Result<()> {
    let components = registry.components(kind);
    if json {
        let entries: Vec<serde_json::Value> = components
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "plugin": c.plugin_id,
                    "name": c.name,
                    "description": c.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let width = components.iter().map(|c| c.id.len()).max().unwrap_or(0);
    for c in components {
        if c.description.is_empty() {
            println!("{}", c.id);
        } else {
            println!("{:width$}  {}", c.id, c.description);
        }
    }
    Ok(())
}
