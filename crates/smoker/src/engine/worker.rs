//! Package-manager worker: runs one target's pack → install → {lint, scripts}
//! sub-pipeline.
//!
//! The worker is a single task owning four lanes. Each lane has its own queue
//! and admission policy:
//!
//! - **pack**: every queued job is launched at once.
//! - **install**: one job in flight, FIFO.
//! - **lint**: each installed package is prepared, then fanned out to one
//!   long-lived rule checker per rule.
//! - **scripts**: every queued job is launched at once.
//!
//! Jobs are spawned tasks replying on the worker's job channel. After every
//! reply the lanes are advanced and the completion guards re-evaluated.
//! A halt from Control is deferred until all lanes are terminal.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smoker_types::{
    ErrorInfo, ErrorKind, InstallManifest, InstallResult, LintManifest, LintResult,
    PackageManagerSpec, RuleResult, RunScriptManifest, RunScriptResult, ScriptOutcome, Stage,
    StageOutput, WorkspaceInfo,
};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::guards::{self, Snapshot};
use super::message::{ControlMsg, JobReply, StageSignal, WorkerCommand, WorkerEvent, WorkerOutput};
use super::rule_checker::{RuleCheckerHandle, spawn_rule_checker};
use crate::error::SmokerError;
use crate::executor::Executor;
use crate::loader::LoadedRule;
use crate::pkg_manager::{PkgManagerContext, PkgManagerDef};

/// Everything a worker needs to run one target.
#[derive(Clone)]
pub(crate) struct WorkerConfig {
    pub spec: PackageManagerSpec,
    pub def: Arc<dyn PkgManagerDef>,
    pub executor: Arc<dyn Executor>,
    pub workspaces: Arc<[WorkspaceInfo]>,
    pub additional: Vec<String>,
    pub scripts: Vec<String>,
    /// Empty when linting is off
    pub rules: Vec<LoadedRule>,
    pub linger: bool,
    pub bail: bool,
    pub verbose: bool,
    pub timeout: Option<Duration>,
    pub signal: CancellationToken,
}

impl WorkerConfig {
    fn lint_enabled(&self) -> bool {
        !self.rules.is_empty()
    }

    fn scripts_enabled(&self) -> bool {
        !self.scripts.is_empty()
    }

    fn enabled_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| match stage {
                Stage::Pack | Stage::Install => true,
                Stage::Lint => self.lint_enabled(),
                Stage::Script => self.scripts_enabled(),
            })
            .collect()
    }
}

/// Sub-state of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaneState {
    Disabled,
    Idle,
    Working,
    Done,
    Errored,
}

impl LaneState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LaneState::Disabled | LaneState::Done | LaneState::Errored)
    }
}

struct PackLane {
    state: LaneState,
    queue: VecDeque<WorkspaceInfo>,
    in_flight: usize,
    manifests: Vec<InstallManifest>,
}

struct InstallLane {
    state: LaneState,
    queue: VecDeque<InstallManifest>,
    in_flight: bool,
    results: Vec<InstallResult>,
}

/// `install_path → rule id → results`
type RuleResultMap = BTreeMap<PathBuf, BTreeMap<String, Vec<RuleResult>>>;

struct LintLane {
    state: LaneState,
    checkers: Vec<RuleCheckerHandle>,
    prep_in_flight: usize,
    queue: VecDeque<LintManifest>,
    /// Fanned-out packages still waiting on rule results, by install path
    pending: BTreeMap<PathBuf, String>,
    results: RuleResultMap,
    packages: usize,
    checks: usize,
    failed_packages: usize,
}

struct ScriptLane {
    state: LaneState,
    queue: VecDeque<RunScriptManifest>,
    in_flight: usize,
    failed: usize,
    bailed: bool,
}

enum Incoming {
    Job(Option<JobReply>),
    Command(Option<WorkerCommand>),
}

pub(crate) struct Worker {
    cfg: WorkerConfig,
    label: String,
    control: UnboundedSender<ControlMsg>,
    commands: UnboundedReceiver<WorkerCommand>,
    commands_open: bool,
    jobs_tx: UnboundedSender<JobReply>,
    jobs_rx: UnboundedReceiver<JobReply>,
    ctx: Option<Arc<PkgManagerContext>>,
    tmpdir: Option<TempDir>,
    setup_ok: bool,
    halted: bool,
    error: Option<SmokerError>,
    pack: PackLane,
    install: InstallLane,
    lint: LintLane,
    script: ScriptLane,
    lint_results: Vec<LintResult>,
    script_results: Vec<RunScriptResult>,
}

/// Spawn a worker under a supervisor that reports `Stopped` when it ends,
/// even if the worker task panics.
pub(crate) fn spawn_worker(
    cfg: WorkerConfig,
    control: UnboundedSender<ControlMsg>,
) -> UnboundedSender<WorkerCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = Worker::new(cfg, control.clone(), rx);
    let label = worker.label.clone();
    tokio::spawn(async move {
        let output = match tokio::spawn(worker.run()).await {
            Ok(output) => Ok(output),
            Err(e) => {
                error!(pkg_manager = %label, error = %e, "worker task failed");
                Err(SmokerError::lifecycle(&label, format!("worker crashed: {e}")))
            }
        };
        let _ = control.send(ControlMsg::Worker {
            pkg_manager: label,
            event: WorkerEvent::Stopped(output),
        });
    });
    tx
}

impl Worker {
    pub(crate) fn new(
        cfg: WorkerConfig,
        control: UnboundedSender<ControlMsg>,
        commands: UnboundedReceiver<WorkerCommand>,
    ) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        Self {
            label: cfg.spec.label(),
            cfg,
            control,
            commands,
            commands_open: true,
            jobs_tx,
            jobs_rx,
            ctx: None,
            tmpdir: None,
            setup_ok: false,
            halted: false,
            error: None,
            pack: PackLane {
                state: LaneState::Idle,
                queue: VecDeque::new(),
                in_flight: 0,
                manifests: Vec::new(),
            },
            install: InstallLane {
                state: LaneState::Idle,
                queue: VecDeque::new(),
                in_flight: false,
                results: Vec::new(),
            },
            lint: LintLane {
                state: LaneState::Idle,
                checkers: Vec::new(),
                prep_in_flight: 0,
                queue: VecDeque::new(),
                pending: BTreeMap::new(),
                results: BTreeMap::new(),
                packages: 0,
                checks: 0,
                failed_packages: 0,
            },
            script: ScriptLane {
                state: LaneState::Idle,
                queue: VecDeque::new(),
                in_flight: 0,
                failed: 0,
                bailed: false,
            },
            lint_results: Vec::new(),
            script_results: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> WorkerOutput {
        debug!(pkg_manager = %self.label, "worker starting");
        match self.startup().await {
            Ok(ctx) => {
                self.enter_working(&ctx);
                self.work().await;
            }
            Err(err) => self.fail_startup(err),
        }

        debug!(pkg_manager = %self.label, "worker lanes finished");
        self.notify(WorkerEvent::WorkDone);
        if !self.halted {
            self.wait_for_halt().await;
        }

        self.shutdown().await;
        WorkerOutput {
            lint_results: std::mem::take(&mut self.lint_results),
            script_results: std::mem::take(&mut self.script_results),
        }
    }

    // ---- startup -------------------------------------------------------

    async fn startup(&mut self) -> Result<Arc<PkgManagerContext>, SmokerError> {
        let tmpdir = tempfile::Builder::new()
            .prefix(&format!("smoker-{}-", self.cfg.spec.name))
            .tempdir()
            .map_err(|e| {
                SmokerError::lifecycle(&self.label, format!("failed to create temp dir: {e}"))
            })?;
        debug!(pkg_manager = %self.label, tmpdir = %tmpdir.path().display(), "created temp dir");

        let ctx = Arc::new(PkgManagerContext {
            spec: self.cfg.spec.clone(),
            tmpdir: tmpdir.path().to_path_buf(),
            executor: Arc::clone(&self.cfg.executor),
            workspaces: Arc::clone(&self.cfg.workspaces),
            signal: self.cfg.signal.clone(),
            timeout: self.cfg.timeout,
            verbose: self.cfg.verbose,
        });
        self.tmpdir = Some(tmpdir);
        self.ctx = Some(Arc::clone(&ctx));

        self.cfg
            .def
            .setup(&ctx)
            .await
            .map_err(|e| SmokerError::lifecycle(&self.label, format!("setup failed: {e:#}")))?;
        self.setup_ok = true;
        Ok(ctx)
    }

    /// A startup failure fails every enabled stage for this target only.
    fn fail_startup(&mut self, err: SmokerError) {
        warn!(pkg_manager = %self.label, error = %err, "worker startup failed");
        let info = err.to_info();
        for stage in self.cfg.enabled_stages() {
            self.emit(stage, StageSignal::TargetBegin);
            self.emit(stage, StageSignal::TargetFailed { error: info.clone() });
        }
        for state in [
            &mut self.pack.state,
            &mut self.install.state,
            &mut self.lint.state,
            &mut self.script.state,
        ] {
            *state = LaneState::Errored;
        }
        self.error = Some(err);
    }

    // ---- working -------------------------------------------------------

    fn enter_working(&mut self, ctx: &PkgManagerContext) {
        for stage in self.cfg.enabled_stages() {
            self.emit(stage, StageSignal::TargetBegin);
        }

        self.pack.state = LaneState::Working;
        self.pack.queue = self.cfg.workspaces.iter().cloned().collect();

        self.install.state = LaneState::Working;
        for spec in &self.cfg.additional {
            let manifest = InstallManifest::additional(spec.clone(), ctx.tmpdir.clone());
            self.pack.manifests.push(manifest.clone());
            self.install.queue.push_back(manifest);
        }

        self.lint.state = if self.cfg.lint_enabled() {
            self.lint.checkers = self
                .cfg
                .rules
                .iter()
                .map(|rule| spawn_rule_checker(rule.clone(), self.jobs_tx.clone()))
                .collect();
            LaneState::Working
        } else {
            LaneState::Disabled
        };

        self.script.state = if self.cfg.scripts_enabled() {
            LaneState::Working
        } else {
            LaneState::Disabled
        };

        info!(
            pkg_manager = %self.label,
            workspaces = self.cfg.workspaces.len(),
            additional = self.cfg.additional.len(),
            rules = self.lint.checkers.len(),
            scripts = self.cfg.scripts.len(),
            "worker working"
        );
        self.advance();
    }

    async fn work(&mut self) {
        while !self.all_lanes_terminal() {
            let incoming = tokio::select! {
                reply = self.jobs_rx.recv() => Incoming::Job(reply),
                cmd = self.commands.recv(), if self.commands_open => Incoming::Command(cmd),
            };
            match incoming {
                Incoming::Job(Some(reply)) => self.on_reply(reply),
                // Unreachable while the worker holds `jobs_tx`.
                Incoming::Job(None) => break,
                Incoming::Command(Some(WorkerCommand::Halt)) => {
                    debug!(pkg_manager = %self.label, "halt deferred until lanes finish");
                    self.halted = true;
                }
                Incoming::Command(None) => {
                    self.commands_open = false;
                    self.halted = true;
                }
            }
            self.advance();
        }
    }

    fn all_lanes_terminal(&self) -> bool {
        self.pack.state.is_terminal()
            && self.install.state.is_terminal()
            && self.lint.state.is_terminal()
            && self.script.state.is_terminal()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            workspaces: self.cfg.workspaces.len(),
            additional: self.cfg.additional.len(),
            pack_produced: self.pack.manifests.len(),
            pack_queued: self.pack.queue.len(),
            pack_in_flight: self.pack.in_flight,
            installed: self.install.results.len(),
            install_queued: self.install.queue.len(),
            install_in_flight: usize::from(self.install.in_flight),
            eligible_installed: self
                .install
                .results
                .iter()
                .filter(|r| r.manifest.is_eligible())
                .count(),
            lint_rules: self.lint.checkers.len(),
            lint_prep_in_flight: self.lint.prep_in_flight,
            lint_queued: self.lint.queue.len(),
            lint_packages: self.lint.packages,
            lint_checks: self.lint.checks,
            scripts: self.cfg.scripts.len(),
            script_queued: self.script.queue.len(),
            script_in_flight: self.script.in_flight,
            script_results: self.script_results.len(),
        }
    }

    fn record_error(&mut self, err: SmokerError) {
        if self.error.is_none() {
            warn!(pkg_manager = %self.label, error = %err, "worker error recorded; no new jobs will start");
            self.error = Some(err);
        } else {
            debug!(pkg_manager = %self.label, error = %err, "additional worker error");
        }
    }

    fn error_info(&self) -> ErrorInfo {
        self.error
            .as_ref()
            .map(SmokerError::to_info)
            .unwrap_or_else(|| ErrorInfo::new(ErrorKind::Lifecycle, "worker failed"))
    }

    fn finish_lane(&mut self, stage: Stage, state: LaneState, failure: Option<ErrorInfo>) {
        let lane = match stage {
            Stage::Pack => &mut self.pack.state,
            Stage::Install => &mut self.install.state,
            Stage::Lint => &mut self.lint.state,
            Stage::Script => &mut self.script.state,
        };
        *lane = state;
        debug!(pkg_manager = %self.label, %stage, ?state, "lane finished");
        match failure {
            None => self.emit(stage, StageSignal::TargetOk),
            Some(error) => self.emit(stage, StageSignal::TargetFailed { error }),
        }
    }

    fn advance(&mut self) {
        self.advance_pack();
        self.advance_install();
        self.advance_lint();
        self.advance_script();
    }

    fn advance_pack(&mut self) {
        if self.pack.state != LaneState::Working {
            return;
        }
        if self.error.is_none() {
            while let Some(workspace) = self.pack.queue.pop_front() {
                self.launch_pack(workspace);
            }
        } else {
            self.pack.queue.clear();
        }

        if guards::is_packing_complete(&self.snapshot()) {
            self.finish_lane(Stage::Pack, LaneState::Done, None);
        } else if self.error.is_some() && self.pack.in_flight == 0 {
            let info = self.error_info();
            self.finish_lane(Stage::Pack, LaneState::Errored, Some(info));
        }
    }

    fn advance_install(&mut self) {
        if self.install.state != LaneState::Working {
            return;
        }
        if self.error.is_none() {
            if !self.install.in_flight {
                if let Some(manifest) = self.install.queue.pop_front() {
                    self.launch_install(manifest);
                }
            }
        } else {
            self.install.queue.clear();
        }

        if guards::is_installation_complete(&self.snapshot()) {
            self.finish_lane(Stage::Install, LaneState::Done, None);
        } else if self.error.is_some()
            && !self.install.in_flight
            && self.pack.state.is_terminal()
        {
            let info = self.error_info();
            self.finish_lane(Stage::Install, LaneState::Errored, Some(info));
        }
    }

    fn advance_lint(&mut self) {
        if self.lint.state != LaneState::Working {
            return;
        }
        if self.error.is_none() {
            while let Some(manifest) = self.lint.queue.pop_front() {
                self.fan_out(manifest);
            }
        } else {
            self.lint.queue.clear();
        }

        if guards::is_linting_complete(&self.snapshot()) {
            if self.lint.failed_packages == 0 {
                self.finish_lane(Stage::Lint, LaneState::Done, None);
            } else {
                let err = SmokerError::Lint {
                    pkg_manager: self.label.clone(),
                    message: format!(
                        "{} package(s) failed lint with {}",
                        self.lint.failed_packages, self.label
                    ),
                };
                self.finish_lane(Stage::Lint, LaneState::Done, Some(err.to_info()));
            }
        } else if self.error.is_some()
            && self.lint.prep_in_flight == 0
            && self.lint.pending.is_empty()
            && self.install.state.is_terminal()
        {
            let info = self.error_info();
            self.finish_lane(Stage::Lint, LaneState::Errored, Some(info));
        }
    }

    fn advance_script(&mut self) {
        if self.script.state != LaneState::Working {
            return;
        }
        if self.error.is_none() {
            while let Some(manifest) = self.script.queue.pop_front() {
                if self.script.bailed {
                    self.emit(
                        Stage::Script,
                        StageSignal::ItemBegin {
                            subject: manifest.subject(),
                        },
                    );
                    let skipped = RunScriptResult::skipped(
                        manifest,
                        self.label.clone(),
                        "skipped after an earlier script failure",
                    );
                    self.on_script_result(skipped);
                } else {
                    self.launch_script(manifest);
                }
            }
        } else {
            self.script.queue.clear();
        }

        if guards::is_running_complete(&self.snapshot()) {
            if self.script.failed == 0 {
                self.finish_lane(Stage::Script, LaneState::Done, None);
            } else {
                let info = ErrorInfo {
                    pkg_manager: Some(self.label.clone()),
                    ..ErrorInfo::new(
                        ErrorKind::Script,
                        format!("{} script(s) failed with {}", self.script.failed, self.label),
                    )
                };
                self.finish_lane(Stage::Script, LaneState::Done, Some(info));
            }
        } else if self.error.is_some()
            && self.script.in_flight == 0
            && self.install.state.is_terminal()
        {
            let info = self.error_info();
            self.finish_lane(Stage::Script, LaneState::Errored, Some(info));
        }
    }

    // ---- jobs ----------------------------------------------------------

    fn launch_pack(&mut self, workspace: WorkspaceInfo) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        self.pack.in_flight += 1;
        self.emit(
            Stage::Pack,
            StageSignal::ItemBegin {
                subject: workspace.pkg_name.clone(),
            },
        );
        let tx = self.jobs_tx.clone();
        if ctx.signal.is_cancelled() {
            let err = SmokerError::aborted(format!("packing {}", workspace.pkg_name));
            let _ = tx.send(JobReply::Packed {
                workspace,
                result: Err(err),
            });
            return;
        }
        let def = Arc::clone(&self.cfg.def);
        let label = self.label.clone();
        tokio::spawn(async move {
            let result = def.pack(&ctx, &workspace).await.map_err(|e| {
                if ctx.signal.is_cancelled() {
                    SmokerError::aborted(format!("packing {}", workspace.pkg_name))
                } else {
                    SmokerError::pack(&label, &workspace.pkg_name, &e)
                }
            });
            let _ = tx.send(JobReply::Packed { workspace, result });
        });
    }

    fn launch_install(&mut self, manifest: InstallManifest) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        self.install.in_flight = true;
        self.emit(
            Stage::Install,
            StageSignal::ItemBegin {
                subject: manifest.pkg_name.clone(),
            },
        );
        let tx = self.jobs_tx.clone();
        if ctx.signal.is_cancelled() {
            let err = SmokerError::aborted(format!("installing {}", manifest.pkg_name));
            let _ = tx.send(JobReply::Installed {
                manifest,
                result: Err(err),
            });
            return;
        }
        let def = Arc::clone(&self.cfg.def);
        let label = self.label.clone();
        tokio::spawn(async move {
            let result = def.install(&ctx, &manifest).await.map_err(|e| {
                if ctx.signal.is_cancelled() {
                    SmokerError::aborted(format!("installing {}", manifest.pkg_name))
                } else {
                    SmokerError::install(&label, &manifest.pkg_name, &e)
                }
            });
            let _ = tx.send(JobReply::Installed { manifest, result });
        });
    }

    fn launch_lint_prep(&mut self, manifest: InstallManifest) {
        self.lint.prep_in_flight += 1;
        let tx = self.jobs_tx.clone();
        let label = self.label.clone();
        tokio::spawn(async move {
            let result = prepare_lint_manifest(&label, &manifest).await;
            let _ = tx.send(JobReply::LintPrepared { manifest, result });
        });
    }

    fn launch_script(&mut self, manifest: RunScriptManifest) {
        let Some(ctx) = self.ctx.clone() else {
            return;
        };
        self.script.in_flight += 1;
        self.emit(
            Stage::Script,
            StageSignal::ItemBegin {
                subject: manifest.subject(),
            },
        );
        let tx = self.jobs_tx.clone();
        let label = self.label.clone();
        if ctx.signal.is_cancelled() {
            let err = SmokerError::aborted(format!("running {}", manifest.subject()));
            let _ = tx.send(JobReply::Ran(RunScriptResult::failed(
                manifest,
                label,
                err.to_info(),
            )));
            return;
        }
        let def = Arc::clone(&self.cfg.def);
        tokio::spawn(async move {
            let result = match def.run_script(&ctx, &manifest).await {
                Ok(result) => result,
                Err(e) => {
                    let err = if ctx.signal.is_cancelled() {
                        SmokerError::aborted(format!("running {}", manifest.subject()))
                    } else {
                        SmokerError::script(
                            &label,
                            &manifest.pkg_name,
                            &manifest.script,
                            format!("{e:#}"),
                        )
                    };
                    RunScriptResult::failed(manifest, label, err.to_info())
                }
            };
            let _ = tx.send(JobReply::Ran(result));
        });
    }

    /// Send one prepared package to every rule checker.
    fn fan_out(&mut self, manifest: LintManifest) {
        self.emit(
            Stage::Lint,
            StageSignal::ItemBegin {
                subject: manifest.pkg_name.clone(),
            },
        );
        let install_path = manifest.install_path.clone();
        self.lint
            .pending
            .insert(install_path.clone(), manifest.pkg_name.clone());
        self.lint.packages += 1;

        let manifest = Arc::new(manifest);
        let unreachable: Vec<String> = self
            .lint
            .checkers
            .iter()
            .filter(|checker| !checker.check(Arc::clone(&manifest)))
            .map(|checker| checker.rule_id.clone())
            .collect();
        for rule_id in unreachable {
            let error = SmokerError::rule(&rule_id, &manifest.pkg_name, "rule checker stopped");
            self.record_check(
                install_path.clone(),
                RuleResult::Errored {
                    rule_id,
                    error: error.to_info(),
                },
            );
        }
    }

    // ---- replies -------------------------------------------------------

    fn on_reply(&mut self, reply: JobReply) {
        match reply {
            JobReply::Packed { workspace, result } => {
                self.pack.in_flight -= 1;
                match result {
                    Ok(manifest) => {
                        debug!(pkg_manager = %self.label, pkg = %manifest.pkg_name, "packed");
                        self.emit(
                            Stage::Pack,
                            StageSignal::ItemOk {
                                subject: workspace.pkg_name,
                                output: StageOutput::Packed(manifest.clone()),
                            },
                        );
                        self.pack.manifests.push(manifest.clone());
                        if self.install.state == LaneState::Working {
                            self.install.queue.push_back(manifest);
                        }
                    }
                    Err(err) => {
                        self.emit(
                            Stage::Pack,
                            StageSignal::ItemFailed {
                                subject: workspace.pkg_name,
                                error: err.to_info(),
                                output: None,
                            },
                        );
                        self.record_error(err);
                    }
                }
            }
            JobReply::Installed { manifest, result } => {
                self.install.in_flight = false;
                match result {
                    Ok(installed) => {
                        debug!(pkg_manager = %self.label, pkg = %manifest.pkg_name, "installed");
                        self.emit(
                            Stage::Install,
                            StageSignal::ItemOk {
                                subject: manifest.pkg_name.clone(),
                                output: StageOutput::Installed(installed.clone()),
                            },
                        );
                        self.install.results.push(installed);
                        if manifest.is_eligible() {
                            self.on_eligible_install(manifest);
                        }
                    }
                    Err(err) => {
                        self.emit(
                            Stage::Install,
                            StageSignal::ItemFailed {
                                subject: manifest.pkg_name,
                                error: err.to_info(),
                                output: None,
                            },
                        );
                        self.record_error(err);
                    }
                }
            }
            JobReply::LintPrepared { manifest, result } => {
                self.lint.prep_in_flight -= 1;
                match result {
                    Ok(lint_manifest) => self.lint.queue.push_back(lint_manifest),
                    Err(err) => self.fail_lint_prep(manifest, err),
                }
            }
            JobReply::Checked {
                install_path,
                result,
            } => self.record_check(install_path, result),
            JobReply::Ran(result) => {
                self.script.in_flight -= 1;
                self.on_script_result(result);
            }
        }
    }

    fn on_eligible_install(&mut self, manifest: InstallManifest) {
        if self.script.state == LaneState::Working {
            let local_path = manifest.local_path.clone().unwrap_or_default();
            for script in &self.cfg.scripts {
                self.script.queue.push_back(RunScriptManifest {
                    pkg_name: manifest.pkg_name.clone(),
                    script: script.clone(),
                    cwd: manifest.install_path.clone(),
                    local_path: local_path.clone(),
                });
            }
        }
        if self.lint.state == LaneState::Working {
            self.launch_lint_prep(manifest);
        }
    }

    /// A package whose metadata cannot be read gets an errored result from every rule.
    fn fail_lint_prep(&mut self, manifest: InstallManifest, err: SmokerError) {
        warn!(pkg_manager = %self.label, pkg = %manifest.pkg_name, error = %err, "cannot lint package");
        self.emit(
            Stage::Lint,
            StageSignal::ItemBegin {
                subject: manifest.pkg_name.clone(),
            },
        );
        self.lint
            .pending
            .insert(manifest.install_path.clone(), manifest.pkg_name.clone());
        self.lint.packages += 1;
        let rule_ids: Vec<String> = self.lint.checkers.iter().map(|c| c.rule_id.clone()).collect();
        for rule_id in rule_ids {
            self.record_check(
                manifest.install_path.clone(),
                RuleResult::Errored {
                    rule_id,
                    error: err.to_info(),
                },
            );
        }
    }

    fn record_check(&mut self, install_path: PathBuf, result: RuleResult) {
        self.lint.checks += 1;
        let per_rule = self.lint.results.entry(install_path.clone()).or_default();
        per_rule
            .entry(result.rule_id().to_string())
            .or_default()
            .push(result);

        let complete = per_rule.len() == self.lint.checkers.len();
        if complete {
            self.finish_package(install_path);
        }
    }

    /// Fold a package's rule results into a [`LintResult`], in rule order.
    fn finish_package(&mut self, install_path: PathBuf) {
        let Some(pkg_name) = self.lint.pending.remove(&install_path) else {
            return;
        };
        let mut per_rule = self.lint.results.remove(&install_path).unwrap_or_default();
        let results: Vec<RuleResult> = self
            .lint
            .checkers
            .iter()
            .flat_map(|c| per_rule.remove(&c.rule_id).unwrap_or_default())
            .collect();
        let lint_result = LintResult {
            pkg_name: pkg_name.clone(),
            pkg_manager: self.label.clone(),
            install_path,
            results,
        };

        if lint_result.passed() {
            self.emit(
                Stage::Lint,
                StageSignal::ItemOk {
                    subject: pkg_name,
                    output: StageOutput::Linted(lint_result.clone()),
                },
            );
        } else {
            self.lint.failed_packages += 1;
            let failed = lint_result.results.iter().filter(|r| r.is_failure()).count();
            let error = SmokerError::Lint {
                pkg_manager: self.label.clone(),
                message: format!("{pkg_name} failed {failed} rule(s)"),
            };
            self.emit(
                Stage::Lint,
                StageSignal::ItemFailed {
                    subject: pkg_name,
                    error: error.to_info(),
                    output: Some(StageOutput::Linted(lint_result.clone())),
                },
            );
        }
        self.lint_results.push(lint_result);
    }

    fn on_script_result(&mut self, result: RunScriptResult) {
        let subject = result.manifest.subject();
        match &result.outcome {
            ScriptOutcome::Failed { error } => {
                debug!(pkg_manager = %self.label, script = %subject, "script failed");
                self.script.failed += 1;
                if self.cfg.bail && !self.script.bailed {
                    info!(pkg_manager = %self.label, script = %subject, "bailing; remaining scripts will be skipped");
                    self.script.bailed = true;
                }
                self.emit(
                    Stage::Script,
                    StageSignal::ItemFailed {
                        subject,
                        error: error.clone(),
                        output: Some(StageOutput::Ran(result.clone())),
                    },
                );
            }
            ScriptOutcome::Ok | ScriptOutcome::Skipped { .. } => {
                self.emit(
                    Stage::Script,
                    StageSignal::ItemOk {
                        subject,
                        output: StageOutput::Ran(result.clone()),
                    },
                );
            }
        }
        self.script_results.push(result);
    }

    // ---- shutdown ------------------------------------------------------

    async fn wait_for_halt(&mut self) {
        debug!(pkg_manager = %self.label, "idle, waiting for halt");
        while self.commands_open {
            match self.commands.recv().await {
                Some(WorkerCommand::Halt) => break,
                None => self.commands_open = false,
            }
        }
    }

    async fn shutdown(&mut self) {
        self.lint.checkers.clear();

        if let Some(tmpdir) = self.tmpdir.take() {
            if self.cfg.linger {
                let path = tmpdir.keep();
                info!(pkg_manager = %self.label, path = %path.display(), "keeping temp dir");
                self.notify(WorkerEvent::Lingered(path));
            } else {
                let path = tmpdir.path().to_path_buf();
                if let Err(e) = tmpdir.close() {
                    warn!(pkg_manager = %self.label, path = %path.display(), error = %e, "failed to remove temp dir");
                }
            }
        }

        if let (true, Some(ctx)) = (self.setup_ok, self.ctx.as_ref()) {
            if let Err(e) = self.cfg.def.teardown(ctx).await {
                warn!(pkg_manager = %self.label, error = %format!("{e:#}"), "teardown failed");
            }
        }
        debug!(pkg_manager = %self.label, "worker done");
    }

    // ---- outbound ------------------------------------------------------

    fn notify(&self, event: WorkerEvent) {
        let _ = self.control.send(ControlMsg::Worker {
            pkg_manager: self.label.clone(),
            event,
        });
    }

    fn emit(&self, stage: Stage, signal: StageSignal) {
        self.notify(WorkerEvent::Stage { stage, signal });
    }
}

/// Read the installed package's metadata.
async fn prepare_lint_manifest(
    label: &str,
    manifest: &InstallManifest,
) -> Result<LintManifest, SmokerError> {
    let path = manifest.install_path.join("package.json");
    let lint_error = |message: String| SmokerError::Lint {
        pkg_manager: label.to_string(),
        message,
    };
    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
        lint_error(format!("failed to read {}: {e}", path.display()))
    })?;
    let pkg_json = serde_json::from_str(&content)
        .map_err(|e| lint_error(format!("failed to parse {}: {e}", path.display())))?;
    Ok(LintManifest {
        pkg_name: manifest.pkg_name.clone(),
        install_path: manifest.install_path.clone(),
        local_path: manifest.local_path.clone().unwrap_or_default(),
        pkg_json,
    })
}
