//! npm backend.
//!
//! Every target gets a private sandbox project in its temp directory.
//! Workspaces are packed into `<tmpdir>/packs` and installed into the
//! sandbox one at a time, so each install sees the ones before it.

use std::path::Path;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use smoker_types::{
    InstallManifest, InstallResult, RunScriptManifest, RunScriptResult, WorkspaceInfo,
};
use tracing::debug;

use crate::error::SmokerError;
use crate::pkg_manager::{PkgManagerContext, PkgManagerDef};

/// The `npm` package manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct Npm;

/// One entry of `npm pack --json` output.
#[derive(Debug, Deserialize)]
struct PackEntry {
    filename: String,
}

/// Extract the tarball filename from `npm pack --json` output.
///
/// Lifecycle scripts may print before the JSON array, so parsing starts at
/// the first `[`.
fn parse_pack_output(stdout: &str) -> anyhow::Result<String> {
    let Some(start) = stdout.find('[') else {
        bail!("npm pack printed no JSON");
    };
    let entries = serde_json::Deserializer::from_str(&stdout[start..])
        .into_iter::<Vec<PackEntry>>()
        .next()
        .context("npm pack printed no JSON")?
        .context("malformed npm pack output")?;
    match entries.into_iter().next() {
        Some(entry) if !entry.filename.is_empty() => Ok(entry.filename),
        _ => bail!("npm pack reported no tarball"),
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

async fn read_pkg_json(dir: &Path) -> anyhow::Result<Value> {
    let path = dir.join("package.json");
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Last few lines of a process's stderr, for error messages.
fn tail(output: &str) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

#[async_trait]
impl PkgManagerDef for Npm {
    fn name(&self) -> &str {
        "npm"
    }

    fn description(&self) -> &str {
        "npm, system install or any published version via npx"
    }

    async fn setup(&self, ctx: &PkgManagerContext) -> anyhow::Result<()> {
        let sandbox = json!({
            "name": "smoker-sandbox",
            "version": "0.0.0",
            "private": true,
        });
        let path = ctx.tmpdir.join("package.json");
        tokio::fs::write(&path, serde_json::to_vec_pretty(&sandbox)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        tokio::fs::create_dir_all(ctx.pack_dir())
            .await
            .context("failed to create pack directory")?;
        Ok(())
    }

    async fn pack(
        &self,
        ctx: &PkgManagerContext,
        workspace: &WorkspaceInfo,
    ) -> anyhow::Result<InstallManifest> {
        let dest = ctx.pack_dir();
        let mut argv = args(["pack", "--json", "--pack-destination"]);
        argv.push(dest.to_string_lossy().into_owned());

        let result = ctx
            .executor
            .exec(&ctx.spec, &argv, &ctx.run_options(&workspace.local_path))
            .await?;
        result.ok()?;
        let filename = parse_pack_output(&result.stdout)?;
        let tarball = dest.join(&filename);
        debug!(pkg = %workspace.pkg_name, tarball = %tarball.display(), "npm pack");

        Ok(InstallManifest::workspace(
            workspace.pkg_name.clone(),
            tarball.to_string_lossy(),
            ctx.tmpdir.clone(),
            workspace.local_path.clone(),
        ))
    }

    async fn install(
        &self,
        ctx: &PkgManagerContext,
        manifest: &InstallManifest,
    ) -> anyhow::Result<InstallResult> {
        let mut argv = args(["install", "--no-audit", "--no-fund", "--no-package-lock"]);
        argv.push(manifest.spec.clone());

        let result = ctx
            .executor
            .exec(&ctx.spec, &argv, &ctx.run_options(&manifest.cwd))
            .await?;
        result.ok()?;
        debug!(pkg = %manifest.pkg_name, install_path = %manifest.install_path.display(), "npm install");

        Ok(InstallResult {
            manifest: manifest.clone(),
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    async fn run_script(
        &self,
        ctx: &PkgManagerContext,
        manifest: &RunScriptManifest,
    ) -> anyhow::Result<RunScriptResult> {
        let label = ctx.spec.label();
        let pkg_json = read_pkg_json(&manifest.cwd).await?;
        let has_script = pkg_json
            .get("scripts")
            .and_then(|s| s.get(&manifest.script))
            .is_some();
        if !has_script {
            let reason = format!("no `{}` script in {}", manifest.script, manifest.pkg_name);
            return Ok(RunScriptResult::skipped(manifest.clone(), label, reason));
        }

        let argv = vec!["run".to_string(), manifest.script.clone()];
        let result = ctx
            .executor
            .exec(&ctx.spec, &argv, &ctx.run_options(&manifest.cwd))
            .await?;

        if result.success {
            return Ok(RunScriptResult::ok(
                manifest.clone(),
                label,
                result.stdout,
                result.stderr,
            ));
        }

        let detail = if result.timed_out {
            tail(&result.stderr)
        } else {
            match result.exit_code {
                Some(code) => format!("exited with code {code}\n{}", tail(&result.stderr)),
                None => format!("terminated by signal\n{}", tail(&result.stderr)),
            }
        };
        let error = SmokerError::script(
            &label,
            &manifest.pkg_name,
            &manifest.script,
            detail.trim_end(),
        );
        let mut failed = RunScriptResult::failed(manifest.clone(), label, error.to_info());
        failed.stdout = result.stdout;
        failed.stderr = result.stderr;
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use smoker_process::{CommandResult, ProcessError, RunOptions};
    use smoker_types::{PackageManagerSpec, ScriptOutcome};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    /// Records invocations and answers with a canned result.
    struct Canned {
        calls: Mutex<Vec<(Vec<String>, Option<PathBuf>)>>,
        stdout: String,
        exit_code: i32,
    }

    impl Canned {
        fn new(stdout: &str, exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                stdout: stdout.to_string(),
                exit_code,
            })
        }

        fn calls(&self) -> Vec<(Vec<String>, Option<PathBuf>)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Executor for Canned {
        async fn exec(
            &self,
            _spec: &PackageManagerSpec,
            args: &[String],
            opts: &RunOptions,
        ) -> Result<CommandResult, ProcessError> {
            self.calls
                .lock()
                .expect("lock")
                .push((args.to_vec(), opts.cwd.clone()));
            Ok(CommandResult {
                command: format!("npm {}", args.join(" ")),
                success: self.exit_code == 0,
                exit_code: Some(self.exit_code),
                stdout: self.stdout.clone(),
                stderr: "npm ERR! something broke".to_string(),
                duration_ms: 1,
                timed_out: false,
            })
        }

        async fn system_version(&self, _bin: &str) -> anyhow::Result<String> {
            Ok("10.2.0".to_string())
        }
    }

    fn context(executor: Arc<Canned>, tmpdir: &Path) -> PkgManagerContext {
        PkgManagerContext {
            spec: PackageManagerSpec::system("npm", "10.2.0"),
            tmpdir: tmpdir.to_path_buf(),
            executor,
            workspaces: Arc::from(Vec::new()),
            signal: CancellationToken::new(),
            timeout: None,
            verbose: false,
        }
    }

    fn script_manifest(cwd: &Path, script: &str) -> RunScriptManifest {
        RunScriptManifest {
            pkg_name: "left-pad".into(),
            script: script.into(),
            cwd: cwd.to_path_buf(),
            local_path: PathBuf::from("/src/left-pad"),
        }
    }

    #[test]
    fn pack_output_after_script_noise() {
        let stdout = "> prepack\nbuilding...\n[\n  {\"id\": \"a@1.0.0\", \"filename\": \"a-1.0.0.tgz\"}\n]\n";
        assert_eq!(parse_pack_output(stdout).expect("parse"), "a-1.0.0.tgz");
    }

    #[test]
    fn malformed_pack_output_is_an_error() {
        assert!(parse_pack_output("npm notice done").is_err());
        assert!(parse_pack_output("[{\"name\": 1}]").is_err());
        let err = parse_pack_output("[]").expect_err("empty");
        assert!(err.to_string().contains("no tarball"));
    }

    #[tokio::test]
    async fn setup_writes_a_private_sandbox() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ctx = context(Canned::new("", 0), tmp.path());
        Npm.setup(&ctx).await.expect("setup");

        let sandbox = read_pkg_json(tmp.path()).await.expect("read");
        assert_eq!(sandbox["private"], json!(true));
        assert!(ctx.pack_dir().is_dir());
    }

    #[tokio::test]
    async fn pack_runs_in_the_workspace() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let executor = Canned::new("[{\"filename\": \"scope-pkg-1.0.0.tgz\"}]", 0);
        let ctx = context(Arc::clone(&executor), tmp.path());
        let workspace = WorkspaceInfo::new("/src/pkg", json!({"name": "@scope/pkg"}));

        let manifest = Npm.pack(&ctx, &workspace).await.expect("pack");
        assert_eq!(manifest.pkg_name, "@scope/pkg");
        assert_eq!(
            PathBuf::from(&manifest.spec),
            tmp.path().join("packs").join("scope-pkg-1.0.0.tgz")
        );
        assert_eq!(
            manifest.install_path,
            tmp.path().join("node_modules").join("@scope").join("pkg")
        );

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(&calls[0].0[..3], &["pack", "--json", "--pack-destination"]);
        assert_eq!(calls[0].1, Some(PathBuf::from("/src/pkg")));
    }

    #[tokio::test]
    async fn failed_pack_command_is_an_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let ctx = context(Canned::new("", 1), tmp.path());
        let workspace = WorkspaceInfo::new("/src/pkg", json!({"name": "pkg"}));
        assert!(Npm.pack(&ctx, &workspace).await.is_err());
    }

    #[tokio::test]
    async fn missing_script_is_skipped_without_running_npm() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name": "left-pad", "scripts": {"test": "node test.js"}}"#,
        )
        .expect("write");
        let executor = Canned::new("", 0);
        let ctx = context(Arc::clone(&executor), tmp.path());

        let result = Npm
            .run_script(&ctx, &script_manifest(tmp.path(), "smoke"))
            .await
            .expect("run");
        assert!(matches!(result.outcome, ScriptOutcome::Skipped { .. }));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_script_keeps_its_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name": "left-pad", "scripts": {"test": "exit 2"}}"#,
        )
        .expect("write");
        let ctx = context(Canned::new("running tests", 2), tmp.path());

        let result = Npm
            .run_script(&ctx, &script_manifest(tmp.path(), "test"))
            .await
            .expect("run");
        match &result.outcome {
            ScriptOutcome::Failed { error } => {
                assert!(error.message.contains("exited with code 2"));
                assert!(error.message.contains("npm ERR! something broke"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(result.stdout, "running tests");
        assert_eq!(result.pkg_manager, "npm@10.2.0");
    }
}
