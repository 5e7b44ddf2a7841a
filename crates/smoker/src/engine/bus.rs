//! Stage bus: aggregates one stage's signals from every worker.
//!
//! Relays that arrive before activation are buffered and replayed in order
//! right after `Begin`. The bus finishes once every target has reported
//! `TargetOk` or `TargetFailed`, or when Control sends `Finish` because no
//! workers remain.

use std::sync::Arc;

use smoker_types::{ErrorInfo, SmokerEvent, Stage, StageEventKind, StageOutput, StageSummary};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use super::listener::ListenerHandle;
use super::message::{BusCommand, ControlMsg, StageSignal};

/// Sending side of a stage bus.
#[derive(Debug, Clone)]
pub(crate) struct BusHandle {
    pub stage: Stage,
    tx: UnboundedSender<BusCommand>,
}

impl BusHandle {
    pub fn activate(&self, listeners: Vec<ListenerHandle>) {
        let _ = self.tx.send(BusCommand::Activate { listeners });
    }

    pub fn relay(&self, pkg_manager: String, signal: StageSignal) {
        let _ = self.tx.send(BusCommand::Relay {
            pkg_manager,
            signal,
        });
    }

    pub fn finish(&self) {
        let _ = self.tx.send(BusCommand::Finish);
    }
}

/// Number of items one stage expects across all targets.
pub(crate) fn stage_total(
    stage: Stage,
    targets: usize,
    workspaces: usize,
    additional: usize,
    scripts: usize,
) -> usize {
    match stage {
        Stage::Pack | Stage::Lint => workspaces * targets,
        Stage::Install => (workspaces + additional) * targets,
        Stage::Script => workspaces * scripts * targets,
    }
}

pub(crate) fn spawn_bus(
    stage: Stage,
    targets: usize,
    total: usize,
    control: UnboundedSender<ControlMsg>,
) -> BusHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let bus = StageBus::new(stage, targets, total, control);
    tokio::spawn(bus.run(rx));
    BusHandle { stage, tx }
}

struct StageBus {
    stage: Stage,
    targets: usize,
    total: usize,
    control: UnboundedSender<ControlMsg>,
    listeners: Vec<ListenerHandle>,
    active: bool,
    buffered: Vec<(String, StageSignal)>,
    completed_items: usize,
    completed_targets: usize,
    ok: usize,
    failed: usize,
    target_failed: bool,
    errors: Vec<ErrorInfo>,
    outputs: Vec<StageOutput>,
}

impl StageBus {
    fn new(
        stage: Stage,
        targets: usize,
        total: usize,
        control: UnboundedSender<ControlMsg>,
    ) -> Self {
        Self {
            stage,
            targets,
            total,
            control,
            listeners: Vec::new(),
            active: false,
            buffered: Vec::new(),
            completed_items: 0,
            completed_targets: 0,
            ok: 0,
            failed: 0,
            target_failed: false,
            errors: Vec::new(),
            outputs: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<BusCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                BusCommand::Activate { listeners } => {
                    if self.active {
                        continue;
                    }
                    self.active = true;
                    self.listeners = listeners;
                    debug!(stage = %self.stage, targets = self.targets, total = self.total, "stage activated");
                    self.emit(StageEventKind::Begin {
                        targets: self.targets,
                        total: self.total,
                    });
                    for (pkg_manager, signal) in std::mem::take(&mut self.buffered) {
                        self.handle(pkg_manager, signal);
                    }
                }
                BusCommand::Relay {
                    pkg_manager,
                    signal,
                } => {
                    if self.active {
                        self.handle(pkg_manager, signal);
                    } else {
                        self.buffered.push((pkg_manager, signal));
                    }
                }
                BusCommand::Finish => {
                    debug!(stage = %self.stage, completed = self.completed_targets, targets = self.targets, "stage finishing early");
                    break;
                }
            }
            if self.is_complete() {
                break;
            }
        }
        self.finish();
    }

    fn is_complete(&self) -> bool {
        self.active && self.completed_targets == self.targets
    }

    fn handle(&mut self, pkg_manager: String, signal: StageSignal) {
        let kind = match signal {
            StageSignal::TargetBegin => StageEventKind::TargetBegin {
                pkg_manager,
                targets: self.targets,
            },
            StageSignal::ItemBegin { subject } => StageEventKind::ItemBegin {
                pkg_manager,
                subject,
                total: self.total,
            },
            StageSignal::ItemOk { subject, output } => {
                self.completed_items += 1;
                self.ok += 1;
                self.outputs.push(output.clone());
                StageEventKind::ItemOk {
                    pkg_manager,
                    subject,
                    output,
                    completed: self.completed_items,
                    total: self.total,
                }
            }
            StageSignal::ItemFailed {
                subject,
                error,
                output,
            } => {
                self.completed_items += 1;
                self.failed += 1;
                self.push_error(error.clone());
                if let Some(output) = &output {
                    self.outputs.push(output.clone());
                }
                StageEventKind::ItemFailed {
                    pkg_manager,
                    subject,
                    error,
                    output,
                    completed: self.completed_items,
                    total: self.total,
                }
            }
            StageSignal::TargetOk => {
                self.completed_targets += 1;
                StageEventKind::TargetOk {
                    pkg_manager,
                    completed: self.completed_targets,
                    targets: self.targets,
                }
            }
            StageSignal::TargetFailed { error } => {
                self.completed_targets += 1;
                self.target_failed = true;
                self.push_error(error.clone());
                StageEventKind::TargetFailed {
                    pkg_manager,
                    error,
                    completed: self.completed_targets,
                    targets: self.targets,
                }
            }
        };
        self.emit(kind);
    }

    fn push_error(&mut self, error: ErrorInfo) {
        if !self.errors.iter().any(|e| e.message == error.message) {
            self.errors.push(error);
        }
    }

    /// Emit the terminal event and report to Control.
    fn finish(mut self) {
        // Signals from workers that vanished before activation.
        if !self.active {
            self.active = true;
            for (pkg_manager, signal) in std::mem::take(&mut self.buffered) {
                self.handle(pkg_manager, signal);
            }
        }

        let ok = !self.target_failed
            && self.failed == 0
            && self.completed_targets == self.targets;
        let summary = StageSummary {
            targets: self.targets,
            total: self.total,
            ok: self.ok,
            failed: self.failed,
            errors: std::mem::take(&mut self.errors),
            outputs: std::mem::take(&mut self.outputs),
        };
        let errors = summary.errors.clone();
        info!(
            stage = %self.stage,
            ok,
            succeeded = summary.ok,
            failed = summary.failed,
            "stage finished"
        );
        self.emit(if ok {
            StageEventKind::Ok(summary)
        } else {
            StageEventKind::Failed(summary)
        });
        let _ = self.control.send(ControlMsg::BusDone {
            stage: self.stage,
            ok,
            errors,
        });
    }

    fn emit(&self, kind: StageEventKind) {
        let event = Arc::new(SmokerEvent::stage(self.stage, kind));
        for listener in &self.listeners {
            listener.send(Arc::clone(&event));
        }
        let _ = self.control.send(ControlMsg::BusEvent {
            stage: self.stage,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoker_types::{ErrorKind, InstallManifest};

    fn packed(name: &str) -> StageOutput {
        StageOutput::Packed(InstallManifest::workspace(
            name,
            format!("/tmp/{name}.tgz"),
            "/tmp",
            format!("/src/{name}"),
        ))
    }

    async fn collect(mut rx: UnboundedReceiver<ControlMsg>) -> (Vec<String>, bool, Vec<ErrorInfo>) {
        let mut names = Vec::new();
        while let Some(msg) = rx.recv().await {
            match msg {
                ControlMsg::BusEvent { event, .. } => names.push(event.name()),
                ControlMsg::BusDone { ok, errors, .. } => return (names, ok, errors),
                other => panic!("unexpected message {other:?}"),
            }
        }
        panic!("bus exited without BusDone");
    }

    #[test]
    fn totals_per_stage() {
        assert_eq!(stage_total(Stage::Pack, 2, 3, 1, 2), 6);
        assert_eq!(stage_total(Stage::Install, 2, 3, 1, 2), 8);
        assert_eq!(stage_total(Stage::Lint, 2, 3, 1, 2), 6);
        assert_eq!(stage_total(Stage::Script, 2, 3, 1, 2), 12);
    }

    #[tokio::test]
    async fn buffers_until_activated() {
        let (control, rx) = mpsc::unbounded_channel();
        let bus = spawn_bus(Stage::Pack, 1, 1, control);
        bus.relay("npm@10.0.0".into(), StageSignal::TargetBegin);
        bus.relay(
            "npm@10.0.0".into(),
            StageSignal::ItemOk {
                subject: "a".into(),
                output: packed("a"),
            },
        );
        bus.relay("npm@10.0.0".into(), StageSignal::TargetOk);
        bus.activate(Vec::new());

        let (names, ok, errors) = collect(rx).await;
        assert_eq!(
            names,
            vec![
                "Pack.Begin",
                "Pack.TargetBegin",
                "Pack.ItemOk",
                "Pack.TargetOk",
                "Pack.Ok"
            ]
        );
        assert!(ok);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn target_failure_waits_for_other_targets() {
        let (control, mut rx) = mpsc::unbounded_channel();
        let bus = spawn_bus(Stage::Install, 2, 2, control);
        bus.activate(Vec::new());
        bus.relay(
            "a@1.0.0".into(),
            StageSignal::TargetFailed {
                error: ErrorInfo::new(ErrorKind::Install, "boom"),
            },
        );

        // Drain Begin and TargetFailed; the bus must still be running.
        for _ in 0..2 {
            assert!(matches!(rx.recv().await, Some(ControlMsg::BusEvent { .. })));
        }
        assert!(rx.try_recv().is_err());

        bus.relay("b@1.0.0".into(), StageSignal::TargetOk);
        let (names, ok, errors) = collect(rx).await;
        assert_eq!(names, vec!["Install.TargetOk", "Install.Failed"]);
        assert!(!ok);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "boom");
    }

    #[tokio::test]
    async fn finish_ends_an_incomplete_stage_as_failed() {
        let (control, rx) = mpsc::unbounded_channel();
        let bus = spawn_bus(Stage::Script, 1, 2, control);
        bus.activate(Vec::new());
        bus.finish();
        let (names, ok, _) = collect(rx).await;
        assert_eq!(names, vec!["Script.Begin", "Script.Failed"]);
        assert!(!ok);
    }
}
