//! Messages exchanged between engine actors.

use std::path::PathBuf;
use std::sync::Arc;

use smoker_types::{
    ErrorInfo, InstallManifest, InstallResult, LintManifest, LintResult, RuleResult,
    RunScriptResult, SmokerEvent, Stage, StageOutput, WorkspaceInfo,
};

use super::listener::ListenerHandle;
use crate::error::SmokerError;

/// Inbox of the Control actor.
#[derive(Debug)]
pub(crate) enum ControlMsg {
    /// From a worker, tagged with its target label
    Worker {
        pkg_manager: String,
        event: WorkerEvent,
    },
    /// A normalized event a stage bus just emitted
    BusEvent {
        stage: Stage,
        event: Arc<SmokerEvent>,
    },
    /// A stage bus emitted its terminal event and exited
    BusDone {
        stage: Stage,
        ok: bool,
        errors: Vec<ErrorInfo>,
    },
    /// Advisory halt from the caller
    Halt,
}

/// What a worker reports upward.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Stage { stage: Stage, signal: StageSignal },
    Lingered(PathBuf),
    /// All lanes reached a terminal sub-state
    WorkDone,
    /// The worker task ended; sent by its supervisor
    Stopped(Result<WorkerOutput, SmokerError>),
}

/// Raw per-target stage signals, before the bus adds counts.
#[derive(Debug, Clone)]
pub(crate) enum StageSignal {
    TargetBegin,
    ItemBegin {
        subject: String,
    },
    ItemOk {
        subject: String,
        output: StageOutput,
    },
    ItemFailed {
        subject: String,
        error: ErrorInfo,
        output: Option<StageOutput>,
    },
    TargetOk,
    TargetFailed {
        error: ErrorInfo,
    },
}

/// Results a worker hands to Control when it stops.
#[derive(Debug, Default)]
pub(crate) struct WorkerOutput {
    pub lint_results: Vec<LintResult>,
    pub script_results: Vec<RunScriptResult>,
}

/// Inbox of a stage bus.
#[derive(Debug)]
pub(crate) enum BusCommand {
    Activate { listeners: Vec<ListenerHandle> },
    Relay {
        pkg_manager: String,
        signal: StageSignal,
    },
    /// No more relays will arrive; emit the terminal event now
    Finish,
}

/// Inbox of a listener adapter.
#[derive(Debug)]
pub(crate) enum ListenerMsg {
    Event(Arc<SmokerEvent>),
    Halt,
}

/// Inbox of a worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Halt,
}

/// Completion of a job a worker spawned.
#[derive(Debug)]
pub(crate) enum JobReply {
    Packed {
        workspace: WorkspaceInfo,
        result: Result<InstallManifest, SmokerError>,
    },
    Installed {
        manifest: InstallManifest,
        result: Result<InstallResult, SmokerError>,
    },
    LintPrepared {
        manifest: InstallManifest,
        result: Result<LintManifest, SmokerError>,
    },
    Checked {
        install_path: PathBuf,
        result: RuleResult,
    },
    Ran(RunScriptResult),
}
