//! Event taxonomy produced during a run.
//!
//! Stage events are namespaced by [`Stage`]; run-level events bracket them.
//! All payloads are immutable once emitted and cheap to clone behind an `Arc`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ErrorInfo, InstallManifest, InstallResult, LintResult, RunScriptResult};

/// One of the four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Turn workspaces into tarballs
    Pack,
    /// Install tarballs and additional dependencies
    Install,
    /// Check installed packages against rules
    Lint,
    /// Run scripts inside installed packages
    Script,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Pack, Stage::Install, Stage::Lint, Stage::Script];

    /// Position in [`Stage::ALL`].
    pub fn index(self) -> usize {
        match self {
            Stage::Pack => 0,
            Stage::Install => 1,
            Stage::Lint => 2,
            Stage::Script => 3,
        }
    }

    /// Event namespace, e.g. `Pack`.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pack => "Pack",
            Stage::Install => "Install",
            Stage::Lint => "Lint",
            Stage::Script => "Script",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The product of one successful stage item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum StageOutput {
    /// A packed workspace
    Packed(InstallManifest),
    /// An installed manifest
    Installed(InstallResult),
    /// All rule results for one package
    Linted(LintResult),
    /// One script run
    Ran(RunScriptResult),
}

impl StageOutput {
    /// Package the output belongs to.
    pub fn pkg_name(&self) -> &str {
        match self {
            StageOutput::Packed(m) => &m.pkg_name,
            StageOutput::Installed(r) => &r.manifest.pkg_name,
            StageOutput::Linted(r) => &r.pkg_name,
            StageOutput::Ran(r) => &r.manifest.pkg_name,
        }
    }
}

/// Aggregated result set carried by a stage's terminal event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageSummary {
    /// Number of participating targets
    pub targets: usize,
    /// Expected item count across all targets
    pub total: usize,
    /// Items that succeeded
    pub ok: usize,
    /// Items that failed
    pub failed: usize,
    /// Target-level and item-level errors, deduplicated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorInfo>,
    /// Every item output, in arrival order
    #[serde(default)]
    pub outputs: Vec<StageOutput>,
}

/// Payload of a stage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEventKind {
    /// Stage activated
    Begin { targets: usize, total: usize },
    /// A target started this stage
    TargetBegin {
        pkg_manager: String,
        targets: usize,
    },
    /// A target started one item
    ItemBegin {
        pkg_manager: String,
        subject: String,
        total: usize,
    },
    /// An item succeeded
    ItemOk {
        pkg_manager: String,
        subject: String,
        output: StageOutput,
        completed: usize,
        total: usize,
    },
    /// An item failed
    ItemFailed {
        pkg_manager: String,
        subject: String,
        error: ErrorInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<StageOutput>,
        completed: usize,
        total: usize,
    },
    /// A target finished this stage cleanly
    TargetOk {
        pkg_manager: String,
        completed: usize,
        targets: usize,
    },
    /// A target finished this stage with a failure
    TargetFailed {
        pkg_manager: String,
        error: ErrorInfo,
        completed: usize,
        targets: usize,
    },
    /// Terminal: every target finished and nothing failed
    Ok(StageSummary),
    /// Terminal: every target finished and something failed
    Failed(StageSummary),
}

impl StageEventKind {
    /// Short variant name used in event names.
    pub fn name(&self) -> &'static str {
        match self {
            StageEventKind::Begin { .. } => "Begin",
            StageEventKind::TargetBegin { .. } => "TargetBegin",
            StageEventKind::ItemBegin { .. } => "ItemBegin",
            StageEventKind::ItemOk { .. } => "ItemOk",
            StageEventKind::ItemFailed { .. } => "ItemFailed",
            StageEventKind::TargetOk { .. } => "TargetOk",
            StageEventKind::TargetFailed { .. } => "TargetFailed",
            StageEventKind::Ok(_) => "Ok",
            StageEventKind::Failed(_) => "Failed",
        }
    }

    /// Whether this is the stage's `Ok` or `Failed` event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageEventKind::Ok(_) | StageEventKind::Failed(_))
    }
}

/// A stage-namespaced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub kind: StageEventKind,
}

/// Summary emitted once work starts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunBegin {
    /// Version of the tool
    pub version: String,
    /// Target labels
    pub pkg_managers: Vec<String>,
    /// Workspace directories under test
    pub workspaces: Vec<PathBuf>,
    /// Deduplicated workspace package names
    pub unique_pkg_names: Vec<String>,
    /// Additional dependencies
    pub additional: Vec<String>,
    /// Requested scripts
    pub scripts: Vec<String>,
    /// Whether lint runs
    pub lint: bool,
}

/// Final output of a run.
///
/// Partial lint and script results are kept even when `ok` is false.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_results: Option<Vec<LintResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_results: Option<Vec<RunScriptResult>>,
}

/// Every event a listener can observe, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SmokerEvent {
    /// Work is about to start
    RunBegin(RunBegin),
    /// A stage event
    Stage(StageEvent),
    /// Temp directories that were kept on disk
    Lingered { directories: Vec<PathBuf> },
    /// Emitted once before the terminal run event
    BeforeExit,
    /// The run succeeded
    RunOk(RunOutcome),
    /// The run failed
    RunFailed(RunOutcome),
}

impl SmokerEvent {
    /// Wrap a stage payload.
    pub fn stage(stage: Stage, kind: StageEventKind) -> Self {
        SmokerEvent::Stage(StageEvent { stage, kind })
    }

    /// Dotted event name, e.g. `Pack.ItemOk` or `RunBegin`.
    pub fn name(&self) -> String {
        match self {
            SmokerEvent::RunBegin(_) => "RunBegin".to_string(),
            SmokerEvent::Stage(e) => format!("{}.{}", e.stage, e.kind.name()),
            SmokerEvent::Lingered { .. } => "Lingered".to_string(),
            SmokerEvent::BeforeExit => "BeforeExit".to_string(),
            SmokerEvent::RunOk(_) => "RunOk".to_string(),
            SmokerEvent::RunFailed(_) => "RunFailed".to_string(),
        }
    }

    /// The run outcome carried by `RunOk`/`RunFailed`.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            SmokerEvent::RunOk(o) | SmokerEvent::RunFailed(o) => Some(o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn names_are_namespaced_by_stage() {
        let e = SmokerEvent::stage(
            Stage::Install,
            StageEventKind::TargetOk {
                pkg_manager: "npm@10.2.0".into(),
                completed: 1,
                targets: 2,
            },
        );
        assert_eq!(e.name(), "Install.TargetOk");
        assert_eq!(SmokerEvent::BeforeExit.name(), "BeforeExit");
    }

    #[test]
    fn terminal_kinds() {
        assert!(StageEventKind::Ok(StageSummary::default()).is_terminal());
        assert!(StageEventKind::Failed(StageSummary::default()).is_terminal());
        assert!(!StageEventKind::Begin { targets: 1, total: 1 }.is_terminal());
    }

    #[test]
    fn stage_event_json_shape() {
        let e = SmokerEvent::stage(Stage::Pack, StageEventKind::Begin { targets: 2, total: 6 });
        insta::assert_json_snapshot!(e, @r#"
        {
          "event": "stage",
          "stage": "pack",
          "kind": {
            "type": "begin",
            "targets": 2,
            "total": 6
          }
        }
        "#);
    }

    #[test]
    fn failed_outcome_keeps_partial_results() {
        let outcome = RunOutcome {
            ok: false,
            error: Some(ErrorInfo::new(ErrorKind::Install, "install failed")),
            lint_results: Some(Vec::new()),
            script_results: None,
        };
        let json = serde_json::to_value(SmokerEvent::RunFailed(outcome.clone())).expect("json");
        assert_eq!(json["event"], "run_failed");
        assert_eq!(json["lint_results"], serde_json::json!([]));
        assert!(json.get("script_results").is_none());
        let back: SmokerEvent = serde_json::from_value(json).expect("parse");
        assert_eq!(back.outcome(), Some(&outcome));
    }

    #[test]
    fn stage_index_matches_all() {
        for (i, s) in Stage::ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
    }
}
