//! Control: loads components, wires actors together, and sequences the run.
//!
//! ```text
//! loading ──► working ──► shutdown ──► stopped
//!    │                       ▲
//!    └───── discovery error ─┘
//! ```
//!
//! Workers report stage signals to Control, which relays them to the stage
//! buses. Buses report every normalized event back so Control can activate
//! the next stage: Install once Pack is terminal, Lint and Script once
//! Install produced its first success (or finished without one).

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use smoker_types::{
    ErrorInfo, ErrorKind, LintResult, RunBegin, RunOutcome, RunScriptResult, SmokerEvent,
    SmokerOptions, Stage, StageEventKind, WorkspaceInfo,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::{BusHandle, spawn_bus, stage_total};
use super::listener::{ListenerHandle, spawn_listener};
use super::message::{ControlMsg, WorkerCommand, WorkerEvent, WorkerOutput};
use super::worker::{WorkerConfig, spawn_worker};
use crate::discovery::discover_workspaces_off_thread;
use crate::error::{SmokerError, fold_infos};
use crate::executor::Executor;
use crate::loader::{ComponentLoader, LoadedComponents, LoadedPkgManager};
use crate::pkg_manager::PkgManagerRequest;
use crate::plugin::{ComponentKind, PluginRegistry};
use crate::reporter::ReporterContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) struct Control {
    options: Arc<SmokerOptions>,
    registry: PluginRegistry,
    executor: Arc<dyn Executor>,
    signal: CancellationToken,
    tx: UnboundedSender<ControlMsg>,
    rx: UnboundedReceiver<ControlMsg>,
    errors: Vec<ErrorInfo>,
    halted: bool,
    workers: BTreeMap<String, UnboundedSender<WorkerCommand>>,
    buses: [Option<BusHandle>; 4],
    activated: [bool; 4],
    lint_enabled: bool,
    listeners: Vec<ListenerHandle>,
    listener_joins: Vec<JoinHandle<()>>,
    lingered: Vec<PathBuf>,
    lint_results: Vec<LintResult>,
    script_results: Vec<RunScriptResult>,
}

/// What loading hands to the working phase.
struct Loaded {
    workspaces: Vec<WorkspaceInfo>,
    components: LoadedComponents,
}

impl Control {
    pub(crate) fn new(
        options: Arc<SmokerOptions>,
        registry: PluginRegistry,
        executor: Arc<dyn Executor>,
        signal: CancellationToken,
        tx: UnboundedSender<ControlMsg>,
        rx: UnboundedReceiver<ControlMsg>,
    ) -> Self {
        Self {
            options,
            registry,
            executor,
            signal,
            tx,
            rx,
            errors: Vec::new(),
            halted: false,
            workers: BTreeMap::new(),
            buses: [None, None, None, None],
            activated: [false; 4],
            lint_enabled: false,
            listeners: Vec::new(),
            listener_joins: Vec::new(),
            lingered: Vec::new(),
            lint_results: Vec::new(),
            script_results: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> RunOutcome {
        info!(cwd = %self.options.cwd.display(), "smoke test starting");
        self.spawn_listeners();
        match self.load().await {
            Ok(loaded) => {
                self.start_working(loaded);
                self.work().await;
            }
            Err(err) => {
                error!(error = %err, "loading failed");
                self.record_error(err.to_info());
            }
        }
        self.shutdown().await
    }

    // ---- loading -------------------------------------------------------

    fn spawn_listeners(&mut self) {
        let ctx = ReporterContext {
            options: Arc::clone(&self.options),
            version: VERSION.to_string(),
        };
        let mut reporters = Vec::new();
        for plugin in self.registry.plugins() {
            reporters.extend(
                ComponentLoader::new(plugin, &self.options, self.executor.as_ref()).reporters(),
            );
        }
        for reporter in reporters {
            match reporter.def.create(&ctx) {
                Ok(instance) => {
                    debug!(reporter = %reporter.id, "listener started");
                    let (handle, join) = spawn_listener(reporter.id, instance);
                    self.listeners.push(handle);
                    self.listener_joins.push(join);
                }
                Err(e) => {
                    let err = SmokerError::discovery(format!(
                        "failed to create reporter `{}`: {e:#}",
                        reporter.id
                    ));
                    self.record_error(err.to_info());
                }
            }
        }
    }

    async fn load(&mut self) -> Result<Loaded, SmokerError> {
        for requested in &self.options.reporters {
            if self
                .registry
                .find(ComponentKind::Reporter, requested)
                .is_none()
            {
                return Err(SmokerError::discovery(format!(
                    "unknown reporter `{requested}`"
                )));
            }
        }
        for rule in self.options.rules.keys() {
            if self.registry.find(ComponentKind::Rule, rule).is_none() {
                warn!(rule = %rule, "configured rule is not provided by any plugin");
            }
        }

        let workspaces = discover_workspaces_off_thread(
            self.options.cwd.clone(),
            self.options.all,
            self.options.workspaces.clone(),
        )
        .await?;
        info!(count = workspaces.len(), "discovered workspaces");

        let requests = self
            .options
            .pkg_managers
            .iter()
            .map(|raw| PkgManagerRequest::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut components = LoadedComponents::default();
        for plugin in self.registry.plugins() {
            let loaded = ComponentLoader::new(plugin, &self.options, self.executor.as_ref())
                .load(&requests)
                .await?;
            components.extend(loaded);
        }

        let unsatisfied: Vec<String> = requests
            .iter()
            .enumerate()
            .filter(|(index, _)| !components.pkg_managers.iter().any(|p| p.request == *index))
            .map(|(_, request)| request.to_string())
            .collect();
        if !unsatisfied.is_empty() {
            return Err(SmokerError::discovery(format!(
                "no plugin provides package manager: {}",
                unsatisfied.join(", ")
            )));
        }

        components.pkg_managers = dedup_targets(components.pkg_managers);
        Ok(Loaded {
            workspaces,
            components,
        })
    }

    // ---- working -------------------------------------------------------

    fn start_working(&mut self, loaded: Loaded) {
        let Loaded {
            workspaces,
            components,
        } = loaded;
        let targets = components.pkg_managers.len();
        let scripts = self.options.scripts.len();
        let additional = self.options.add.len();
        self.lint_enabled = self.options.lint && !components.rules.is_empty();

        for stage in Stage::ALL {
            let enabled = match stage {
                Stage::Pack | Stage::Install => true,
                Stage::Lint => self.lint_enabled,
                Stage::Script => scripts > 0,
            };
            if enabled {
                let total = stage_total(stage, targets, workspaces.len(), additional, scripts);
                self.buses[stage.index()] = Some(spawn_bus(stage, targets, total, self.tx.clone()));
            }
        }

        let unique_pkg_names: BTreeSet<String> =
            workspaces.iter().map(|ws| ws.pkg_name.clone()).collect();
        self.broadcast(SmokerEvent::RunBegin(RunBegin {
            version: VERSION.to_string(),
            pkg_managers: components
                .pkg_managers
                .iter()
                .map(|p| p.spec.label())
                .collect(),
            workspaces: workspaces.iter().map(|ws| ws.local_path.clone()).collect(),
            unique_pkg_names: unique_pkg_names.into_iter().collect(),
            additional: self.options.add.clone(),
            scripts: self.options.scripts.clone(),
            lint: self.lint_enabled,
        }));
        self.activate(Stage::Pack);

        let workspaces: Arc<[WorkspaceInfo]> = workspaces.into();
        let rules = if self.lint_enabled {
            components.rules
        } else {
            Vec::new()
        };
        for target in components.pkg_managers {
            let label = target.spec.label();
            info!(pkg_manager = %label, id = %target.id, "starting worker");
            let cfg = WorkerConfig {
                spec: target.spec,
                def: target.def,
                executor: Arc::clone(&self.executor),
                workspaces: Arc::clone(&workspaces),
                additional: self.options.add.clone(),
                scripts: self.options.scripts.clone(),
                rules: rules.clone(),
                linger: self.options.linger,
                bail: self.options.bail,
                verbose: self.options.verbose,
                timeout: self.options.job_timeout,
                signal: self.signal.clone(),
            };
            let commands = spawn_worker(cfg, self.tx.clone());
            self.workers.insert(label, commands);
        }
    }

    async fn work(&mut self) {
        while !self.is_work_complete() {
            let Some(msg) = self.rx.recv().await else {
                break;
            };
            self.on_message(msg);
        }
    }

    /// No workers remain and every bus has emitted its terminal event.
    fn is_work_complete(&self) -> bool {
        self.workers.is_empty() && self.buses.iter().all(Option::is_none)
    }

    fn on_message(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::Worker { pkg_manager, event } => self.on_worker(pkg_manager, event),
            ControlMsg::BusEvent { stage, event } => self.on_bus_event(stage, &event),
            ControlMsg::BusDone { stage, ok, errors } => {
                self.buses[stage.index()] = None;
                if !ok {
                    if errors.is_empty() {
                        self.record_error(ErrorInfo::new(
                            ErrorKind::Aggregate,
                            format!("{stage} stage failed"),
                        ));
                    }
                    for error in errors {
                        self.record_error(error);
                    }
                }
            }
            ControlMsg::Halt => {
                info!("halt requested; in-flight work will finish");
                self.halted = true;
                self.halt_workers();
            }
        }
    }

    fn on_worker(&mut self, pkg_manager: String, event: WorkerEvent) {
        match event {
            WorkerEvent::Stage { stage, signal } => match &self.buses[stage.index()] {
                Some(bus) => bus.relay(pkg_manager, signal),
                None => debug!(%stage, pkg_manager = %pkg_manager, "no bus for stage signal"),
            },
            WorkerEvent::Lingered(path) => self.lingered.push(path),
            WorkerEvent::WorkDone => {
                if let Some(worker) = self.workers.get(&pkg_manager) {
                    let _ = worker.send(WorkerCommand::Halt);
                }
            }
            WorkerEvent::Stopped(result) => {
                self.workers.remove(&pkg_manager);
                match result {
                    Ok(WorkerOutput {
                        lint_results,
                        script_results,
                    }) => {
                        self.lint_results.extend(lint_results);
                        self.script_results.extend(script_results);
                    }
                    Err(err) => self.record_error(err.to_info()),
                }
                debug!(pkg_manager = %pkg_manager, remaining = self.workers.len(), "worker stopped");
                if self.workers.is_empty() {
                    self.finish_buses();
                }
            }
        }
    }

    fn on_bus_event(&mut self, stage: Stage, event: &SmokerEvent) {
        let SmokerEvent::Stage(stage_event) = event else {
            return;
        };
        match (stage, &stage_event.kind) {
            (Stage::Pack, kind) if kind.is_terminal() => self.activate(Stage::Install),
            (Stage::Install, StageEventKind::ItemOk { .. }) => {
                self.activate(Stage::Lint);
                self.activate(Stage::Script);
            }
            (Stage::Install, kind) if kind.is_terminal() => {
                self.activate(Stage::Lint);
                self.activate(Stage::Script);
            }
            _ => {}
        }
    }

    fn activate(&mut self, stage: Stage) {
        let index = stage.index();
        if self.activated[index] {
            return;
        }
        if let Some(bus) = &self.buses[index] {
            self.activated[index] = true;
            bus.activate(self.listeners.clone());
        }
    }

    /// Workers are gone; any bus still waiting gets everything it will ever get.
    fn finish_buses(&mut self) {
        for stage in Stage::ALL {
            self.activate(stage);
        }
        for bus in self.buses.iter().flatten() {
            bus.finish();
        }
    }

    fn halt_workers(&self) {
        for worker in self.workers.values() {
            let _ = worker.send(WorkerCommand::Halt);
        }
    }

    fn record_error(&mut self, error: ErrorInfo) {
        debug!(kind = %error.kind, error = %error.message, "run error recorded");
        let first = self.errors.is_empty();
        self.errors.push(error);
        if first && !self.halted {
            self.halt_workers();
        }
    }

    // ---- shutdown ------------------------------------------------------

    async fn shutdown(mut self) -> RunOutcome {
        if !self.lingered.is_empty() {
            self.lingered.sort();
            let directories = std::mem::take(&mut self.lingered);
            self.broadcast(SmokerEvent::Lingered { directories });
        }
        self.broadcast(SmokerEvent::BeforeExit);

        self.lint_results
            .sort_by(|a, b| (&a.pkg_manager, &a.pkg_name).cmp(&(&b.pkg_manager, &b.pkg_name)));
        self.script_results.sort_by(|a, b| {
            (&a.pkg_manager, &a.manifest.pkg_name, &a.manifest.script).cmp(&(
                &b.pkg_manager,
                &b.manifest.pkg_name,
                &b.manifest.script,
            ))
        });

        let error = fold_infos(std::mem::take(&mut self.errors));
        let outcome = RunOutcome {
            ok: error.is_none(),
            error,
            lint_results: self
                .lint_enabled
                .then(|| std::mem::take(&mut self.lint_results)),
            script_results: (!self.options.scripts.is_empty())
                .then(|| std::mem::take(&mut self.script_results)),
        };
        self.broadcast(if outcome.ok {
            SmokerEvent::RunOk(outcome.clone())
        } else {
            SmokerEvent::RunFailed(outcome.clone())
        });

        for listener in &self.listeners {
            listener.halt();
        }
        for join in self.listener_joins.drain(..) {
            if let Err(e) = join.await {
                warn!(error = %e, "listener task failed");
            }
        }
        info!(ok = outcome.ok, "smoke test finished");
        outcome
    }

    fn broadcast(&self, event: SmokerEvent) {
        let event = Arc::new(event);
        for listener in &self.listeners {
            listener.send(Arc::clone(&event));
        }
    }
}

/// Keep the first target per label; `npm` and `npm@10.2.0` can resolve to the same one.
fn dedup_targets(targets: Vec<LoadedPkgManager>) -> Vec<LoadedPkgManager> {
    let mut seen = BTreeSet::new();
    targets
        .into_iter()
        .filter(|target| {
            let fresh = seen.insert(target.spec.label());
            if !fresh {
                debug!(pkg_manager = %target.spec, "skipping duplicate target");
            }
            fresh
        })
        .collect()
}
