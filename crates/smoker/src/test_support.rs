//! In-memory plugins for driving the real engine without a package manager.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use smoker_process::{CommandResult, ProcessError, RunOptions};
use smoker_types::{
    ErrorInfo, ErrorKind, InstallManifest, InstallResult, PackageManagerSpec, RunOutcome,
    RunScriptManifest, RunScriptResult, SmokerEvent, SmokerOptions, Stage, StageEventKind,
    WorkspaceInfo,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;
use crate::pkg_manager::{PkgManagerContext, PkgManagerDef};
use crate::plugin::{Plugin, PluginRegistry};
use crate::reporter::{Reporter, ReporterContext, ReporterDef};
use crate::rule::{RuleContext, RuleDef};
use crate::Smoker;

pub const PLUGIN_ID: &str = "test";

/// Executor that reports a version and refuses to run anything.
pub struct FakeExecutor;

#[async_trait]
impl Executor for FakeExecutor {
    async fn exec(
        &self,
        _spec: &PackageManagerSpec,
        args: &[String],
        _opts: &RunOptions,
    ) -> Result<CommandResult, ProcessError> {
        Err(ProcessError::Aborted {
            command: args.join(" "),
        })
    }

    async fn system_version(&self, _bin: &str) -> anyhow::Result<String> {
        Ok("1.0.0".to_string())
    }
}

/// What the fake package manager observed.
#[derive(Default)]
pub struct Counters {
    pub packs: AtomicUsize,
    pub installs: AtomicUsize,
    pub scripts: AtomicUsize,
    pub teardowns: AtomicUsize,
    /// `label → (in flight, max in flight)`
    installs_in_flight: Mutex<BTreeMap<String, (usize, usize)>>,
    tmpdirs: Mutex<Vec<PathBuf>>,
}

impl Counters {
    pub fn max_installs_in_flight(&self) -> BTreeMap<String, usize> {
        self.installs_in_flight
            .lock()
            .expect("lock")
            .iter()
            .map(|(label, (_, max))| (label.clone(), *max))
            .collect()
    }

    pub fn tmpdirs(&self) -> Vec<PathBuf> {
        self.tmpdirs.lock().expect("lock").clone()
    }

    fn install_started(&self, label: &str) {
        let mut map = self.installs_in_flight.lock().expect("lock");
        let entry = map.entry(label.to_string()).or_default();
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn install_finished(&self, label: &str) {
        let mut map = self.installs_in_flight.lock().expect("lock");
        if let Some(entry) = map.get_mut(label) {
            entry.0 -= 1;
        }
    }
}

/// A package manager that "installs" by copying `package.json`.
#[derive(Clone, Default)]
pub struct FakePm {
    pub counters: Arc<Counters>,
    pub install_delay: Duration,
    /// Targets (by label) whose setup fails
    pub fail_setup_for: BTreeSet<String>,
    /// Targets (by label) whose installs fail
    pub fail_installs_for: BTreeSet<String>,
    /// Packages whose pack fails
    pub fail_packs_of: BTreeSet<String>,
    /// Targets (by label) where `fail_packs_of` applies; empty means all
    pub fail_packs_for: BTreeSet<String>,
    /// Scripts that always fail
    pub failing_scripts: BTreeSet<String>,
}

impl FakePm {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PkgManagerDef for FakePm {
    fn name(&self) -> &str {
        "fake"
    }

    async fn setup(&self, ctx: &PkgManagerContext) -> anyhow::Result<()> {
        self.counters
            .tmpdirs
            .lock()
            .expect("lock")
            .push(ctx.tmpdir.clone());
        if self.fail_setup_for.contains(&ctx.spec.label()) {
            anyhow::bail!("sandbox refused");
        }
        Ok(())
    }

    async fn teardown(&self, _ctx: &PkgManagerContext) -> anyhow::Result<()> {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pack(
        &self,
        ctx: &PkgManagerContext,
        workspace: &WorkspaceInfo,
    ) -> anyhow::Result<InstallManifest> {
        self.counters.packs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        if self.fail_packs_of.contains(&workspace.pkg_name)
            && (self.fail_packs_for.is_empty() || self.fail_packs_for.contains(&ctx.spec.label()))
        {
            anyhow::bail!("tarball would be empty");
        }
        Ok(InstallManifest::workspace(
            workspace.pkg_name.clone(),
            ctx.pack_dir()
                .join(format!("{}.tgz", workspace.pkg_name))
                .to_string_lossy(),
            ctx.tmpdir.clone(),
            workspace.local_path.clone(),
        ))
    }

    async fn install(
        &self,
        ctx: &PkgManagerContext,
        manifest: &InstallManifest,
    ) -> anyhow::Result<InstallResult> {
        let label = ctx.spec.label();
        self.counters.installs.fetch_add(1, Ordering::SeqCst);
        self.counters.install_started(&label);
        tokio::time::sleep(self.install_delay).await;
        self.counters.install_finished(&label);

        if self.fail_installs_for.contains(&label) {
            anyhow::bail!("registry unreachable");
        }
        let pkg_json = ctx
            .workspaces
            .iter()
            .find(|ws| Some(&ws.local_path) == manifest.local_path.as_ref())
            .map(|ws| ws.pkg_json.clone())
            .unwrap_or_else(|| json!({"name": manifest.pkg_name, "version": "1.0.0"}));
        std::fs::create_dir_all(&manifest.install_path)?;
        std::fs::write(
            manifest.install_path.join("package.json"),
            serde_json::to_vec(&pkg_json)?,
        )?;
        Ok(InstallResult {
            manifest: manifest.clone(),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn run_script(
        &self,
        ctx: &PkgManagerContext,
        manifest: &RunScriptManifest,
    ) -> anyhow::Result<RunScriptResult> {
        self.counters.scripts.fetch_add(1, Ordering::SeqCst);
        let label = ctx.spec.label();
        if self.failing_scripts.contains(&manifest.script) {
            let error = ErrorInfo::new(ErrorKind::Script, format!("{} exited with 1", manifest.subject()));
            return Ok(RunScriptResult::failed(manifest.clone(), label, error));
        }
        Ok(RunScriptResult::ok(manifest.clone(), label, "done", ""))
    }
}

/// How a [`ScriptedRule`] behaves on a package.
#[derive(Clone)]
pub enum RuleBehavior {
    Pass,
    /// Report one issue on every package
    Issue(&'static str),
    /// Panic on the named package, pass elsewhere
    PanicOn(&'static str),
    /// Return an error on the named package, pass elsewhere
    ErrOn(&'static str),
}

pub struct ScriptedRule {
    pub name: &'static str,
    pub behavior: RuleBehavior,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedRule {
    pub fn new(name: &'static str, behavior: RuleBehavior) -> Self {
        Self {
            name,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RuleDef for ScriptedRule {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "scripted test rule"
    }

    fn check(&self, ctx: &mut RuleContext, _options: &Value) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            RuleBehavior::Pass => Ok(()),
            RuleBehavior::Issue(message) => {
                ctx.add_issue(*message);
                Ok(())
            }
            RuleBehavior::PanicOn(pkg) if ctx.pkg_name() == *pkg => panic!("rule exploded"),
            RuleBehavior::ErrOn(pkg) if ctx.pkg_name() == *pkg => {
                anyhow::bail!("cannot inspect {pkg}")
            }
            _ => Ok(()),
        }
    }
}

/// Collects every event it receives.
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<SmokerEvent>>>,
    pub torn_down: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn events(&self) -> Vec<SmokerEvent> {
        self.events.lock().expect("lock").clone()
    }
}

struct RecordingReporter(Recorder);

#[async_trait]
impl Reporter for RecordingReporter {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()> {
        self.0.events.lock().expect("lock").push(event.clone());
        Ok(())
    }

    async fn teardown(&mut self) -> anyhow::Result<()> {
        self.0.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ReporterDef for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn description(&self) -> &str {
        "records events for assertions"
    }

    fn create(&self, _ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(RecordingReporter(self.clone())))
    }
}

/// A monorepo with one public workspace per name under `packages/`.
pub fn monorepo(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_json(
        dir.path(),
        &json!({"name": "root", "private": true, "workspaces": ["packages/*"]}),
    );
    for name in names {
        write_json(
            &dir.path().join("packages").join(name),
            &json!({
                "name": name,
                "version": "1.0.0",
                "scripts": {"test": "node test.js", "fail": "exit 1"}
            }),
        );
    }
    dir
}

fn write_json(dir: &Path, value: &Value) {
    std::fs::create_dir_all(dir).expect("mkdir");
    std::fs::write(
        dir.join("package.json"),
        serde_json::to_vec_pretty(value).expect("json"),
    )
    .expect("write");
}

/// Options testing every workspace of `root` with the given fake targets.
pub fn options(root: &Path, pkg_managers: &[&str]) -> SmokerOptions {
    SmokerOptions {
        cwd: root.to_path_buf(),
        pkg_managers: pkg_managers.iter().map(|s| s.to_string()).collect(),
        all: true,
        lint: false,
        ..SmokerOptions::default()
    }
}

/// A run wired to fake plugins.
pub struct Harness {
    pub pm: FakePm,
    pub rules: Vec<ScriptedRule>,
    pub recorder: Recorder,
    pub signal: CancellationToken,
}

impl Harness {
    pub fn new(pm: FakePm) -> Self {
        Self {
            pm,
            rules: Vec::new(),
            recorder: Recorder::default(),
            signal: CancellationToken::new(),
        }
    }

    pub fn with_rule(mut self, rule: ScriptedRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn smoker(self, options: SmokerOptions) -> Smoker {
        let mut plugin = Plugin::new(PLUGIN_ID)
            .with_pkg_manager(self.pm)
            .with_reporter(self.recorder);
        for rule in self.rules {
            plugin = plugin.with_rule(rule);
        }
        let mut registry = PluginRegistry::new();
        registry.register(plugin).expect("register");
        Smoker::new(options, registry)
            .with_executor(Arc::new(FakeExecutor))
            .with_signal(self.signal)
    }

    /// Run to completion, returning the outcome and every recorded event.
    pub async fn run(self, options: SmokerOptions) -> (RunOutcome, Vec<SmokerEvent>) {
        let recorder = self.recorder.clone();
        let outcome = tokio::time::timeout(Duration::from_secs(30), self.smoker(options).run())
            .await
            .expect("run finished in time")
            .expect("engine did not crash");
        (outcome, recorder.events())
    }
}

pub fn names(events: &[SmokerEvent]) -> Vec<String> {
    events.iter().map(SmokerEvent::name).collect()
}

pub fn count(events: &[SmokerEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

pub fn position(events: &[SmokerEvent], name: &str) -> usize {
    events
        .iter()
        .position(|e| e.name() == name)
        .unwrap_or_else(|| panic!("no {name} event"))
}

/// Stage events of one kind, as `(pkg_manager, subject)`.
pub fn items(events: &[SmokerEvent], stage: Stage, kind: &str) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            SmokerEvent::Stage(se) if se.stage == stage && se.kind.name() == kind => {
                match &se.kind {
                    StageEventKind::ItemBegin {
                        pkg_manager,
                        subject,
                        ..
                    }
                    | StageEventKind::ItemOk {
                        pkg_manager,
                        subject,
                        ..
                    }
                    | StageEventKind::ItemFailed {
                        pkg_manager,
                        subject,
                        ..
                    } => Some((pkg_manager.clone(), subject.clone())),
                    StageEventKind::TargetBegin { pkg_manager, .. }
                    | StageEventKind::TargetOk { pkg_manager, .. }
                    | StageEventKind::TargetFailed { pkg_manager, .. } => {
                        Some((pkg_manager.clone(), String::new()))
                    }
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}
