//! Progress bar reporter with TTY detection.
//!
//! Registered under the `smoker-cli` plugin. It enables itself only when
//! stderr is a terminal and `--json` was not given, so piped and CI output
//! stays free of escape codes.

use std::io::IsTerminal;
use std::time::Instant;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use smoker::{Plugin, Reporter, ReporterContext, ReporterDef};
use smoker_types::{SmokerEvent, SmokerOptions, Stage, StageEventKind};
use tracing::debug;

/// Id of the plugin contributed by the CLI.
pub const PLUGIN_ID: &str = "smoker-cli";

/// The CLI's own plugin.
pub fn plugin() -> Plugin {
    Plugin::new(PLUGIN_ID)
        .with_description("command-line progress display")
        .with_reporter(ProgressReporterDef)
}

/// Detects whether stderr is connected to a TTY.
pub fn is_tty() -> bool {
    std::io::stderr().is_terminal()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressReporterDef;

impl ReporterDef for ProgressReporterDef {
    fn name(&self) -> &str {
        "progress"
    }

    fn description(&self) -> &str {
        "progress bar per stage on an interactive terminal"
    }

    fn when(&self, options: &SmokerOptions) -> bool {
        !options.json && is_tty()
    }

    fn create(&self, _ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(ProgressReporter::new(ProgressDrawTarget::stderr())))
    }
}

/// One bar, reset at the start of each stage.
pub struct ProgressReporter {
    bar: ProgressBar,
    stage: Option<Stage>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), target);
        bar.set_style(
            ProgressStyle::with_template("{prefix:>8} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self {
            bar,
            stage: None,
            start_time: Instant::now(),
        }
    }

    /// A reporter that tracks progress without drawing anything.
    pub fn hidden() -> Self {
        Self::new(ProgressDrawTarget::hidden())
    }

    fn handle(&mut self, event: &SmokerEvent) {
        match event {
            SmokerEvent::Stage(stage_event) => match &stage_event.kind {
                StageEventKind::Begin { total, .. } => {
                    self.stage = Some(stage_event.stage);
                    self.bar.reset();
                    self.bar.set_length(*total as u64);
                    self.bar.set_prefix(stage_event.stage.as_str());
                    self.bar.set_message("");
                }
                StageEventKind::ItemBegin { subject, .. }
                    if self.stage == Some(stage_event.stage) =>
                {
                    self.bar.set_message(subject.clone());
                }
                StageEventKind::ItemOk { completed, .. }
                | StageEventKind::ItemFailed { completed, .. }
                    if self.stage == Some(stage_event.stage) =>
                {
                    self.bar.set_position(*completed as u64);
                }
                _ => {}
            },
            SmokerEvent::BeforeExit => {
                debug!(elapsed = ?self.start_time.elapsed(), "progress finished");
                self.bar.finish_and_clear();
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Reporter for ProgressReporter {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()> {
        self.handle(event);
        Ok(())
    }

    async fn teardown(&mut self) -> anyhow::Result<()> {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
        Ok(())
    }
}
