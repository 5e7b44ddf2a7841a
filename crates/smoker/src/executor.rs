//! Running package-manager executables.

use anyhow::{Context, bail};
use async_trait::async_trait;
use smoker_process::{CommandResult, ProcessError, RunOptions};
use smoker_types::PackageManagerSpec;

/// Runs package-manager invocations on behalf of plugins.
///
/// Kept behind a trait so tests can substitute a fake without touching `PATH`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `args` against the package manager described by `spec`.
    async fn exec(
        &self,
        spec: &PackageManagerSpec,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandResult, ProcessError>;

    /// Report the version of a system-installed executable.
    async fn system_version(&self, bin: &str) -> anyhow::Result<String>;
}

/// Executor that shells out through [`smoker_process`].
///
/// System targets run `<bin>` directly; managed targets run through
/// `npx --yes <name>@<version>` so the exact version is fetched on demand.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn command(spec: &PackageManagerSpec, args: &[String]) -> (String, Vec<String>) {
        if spec.is_system {
            (spec.bin.clone(), args.to_vec())
        } else {
            let mut full = vec!["--yes".to_string(), spec.label()];
            full.extend_from_slice(args);
            ("npx".to_string(), full)
        }
    }
}

#[async_trait]
impl Executor for SystemExecutor {
    async fn exec(
        &self,
        spec: &PackageManagerSpec,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandResult, ProcessError> {
        let (program, args) = Self::command(spec, args);
        smoker_process::run(&program, &args, opts).await
    }

    async fn system_version(&self, bin: &str) -> anyhow::Result<String> {
        if !smoker_process::command_exists(bin) {
            bail!("`{bin}` was not found on PATH");
        }
        let result = smoker_process::run(bin, &["--version".to_string()], &RunOptions::default())
            .await
            .with_context(|| format!("failed to query `{bin} --version`"))?;
        result.ok()?;
        let version = result.stdout.trim().trim_start_matches('v').to_string();
        if version.is_empty() {
            bail!("`{bin} --version` printed nothing");
        }
        Ok(version)
    }
}
