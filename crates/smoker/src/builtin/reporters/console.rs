use std::fmt::Write as _;
use std::io::Write;

use async_trait::async_trait;
use smoker_types::{
    RuleResult, ScriptOutcome, SmokerEvent, SmokerOptions, StageEventKind, StageOutput,
};

use crate::reporter::{Reporter, ReporterContext, ReporterDef};

/// Human-readable summary on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporterDef;

impl ReporterDef for ConsoleReporterDef {
    fn name(&self) -> &str {
        "console"
    }

    fn description(&self) -> &str {
        "print a human-readable summary on stderr"
    }

    fn when(&self, options: &SmokerOptions) -> bool {
        !options.json
    }

    fn create(&self, ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(ConsoleReporter {
            verbose: ctx.options.verbose,
        }))
    }
}

struct ConsoleReporter {
    verbose: bool,
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()> {
        if let Some(text) = render(event, self.verbose) {
            let mut stderr = std::io::stderr().lock();
            writeln!(stderr, "{text}")?;
        }
        Ok(())
    }
}

/// Render one event, or `None` if it prints nothing.
///
/// Successful items are only shown when `verbose` is set; failures and
/// skipped scripts always are.
pub fn render(event: &SmokerEvent, verbose: bool) -> Option<String> {
    match event {
        SmokerEvent::RunBegin(begin) => Some(format!(
            "smoker v{}: {} workspace(s) with {}",
            begin.version,
            begin.workspaces.len(),
            begin.pkg_managers.join(", ")
        )),
        SmokerEvent::Stage(stage_event) => {
            let stage = stage_event.stage;
            match &stage_event.kind {
                StageEventKind::Begin { targets, total } => Some(format!(
                    "{stage}: {total} item(s) across {targets} package manager(s)"
                )),
                StageEventKind::ItemOk {
                    pkg_manager,
                    subject,
                    output,
                    completed,
                    total,
                } => {
                    if let StageOutput::Ran(result) = output {
                        if let ScriptOutcome::Skipped { reason } = &result.outcome {
                            return Some(format!(
                                "  - {subject} ({pkg_manager}) skipped: {reason}"
                            ));
                        }
                    }
                    verbose.then(|| {
                        format!("  ok {subject} ({pkg_manager}) [{completed}/{total}]")
                    })
                }
                StageEventKind::ItemFailed {
                    pkg_manager,
                    subject,
                    error,
                    output,
                    ..
                } => {
                    let mut text = format!("  x {subject} ({pkg_manager})");
                    match output {
                        Some(StageOutput::Linted(lint)) => {
                            for result in &lint.results {
                                render_rule_result(&mut text, result);
                            }
                        }
                        _ => {
                            for line in error.message.lines() {
                                let _ = write!(text, "\n      {line}");
                            }
                        }
                    }
                    Some(text)
                }
                StageEventKind::TargetFailed {
                    pkg_manager, error, ..
                } if verbose => Some(format!("  {pkg_manager} failed: {}", error.message)),
                StageEventKind::Ok(summary) => {
                    Some(format!("{stage} ok ({}/{})", summary.ok, summary.total))
                }
                StageEventKind::Failed(summary) => Some(format!(
                    "{stage} failed ({} ok, {} failed, {} expected)",
                    summary.ok, summary.failed, summary.total
                )),
                _ => None,
            }
        }
        SmokerEvent::Lingered { directories } => {
            let mut text = String::from("kept temp directories:");
            for dir in directories {
                let _ = write!(text, "\n  {}", dir.display());
            }
            Some(text)
        }
        SmokerEvent::BeforeExit => None,
        SmokerEvent::RunOk(_) => Some("smoke test passed".to_string()),
        SmokerEvent::RunFailed(outcome) => Some(match &outcome.error {
            Some(error) => {
                let mut text = format!("smoke test failed: {}", error.message);
                for cause in &error.causes {
                    let first = cause.message.lines().next().unwrap_or_default();
                    let _ = write!(text, "\n  - {first}");
                }
                text
            }
            None => "smoke test failed".to_string(),
        }),
    }
}

fn render_rule_result(text: &mut String, result: &RuleResult) {
    match result {
        RuleResult::Ok { .. } => {}
        RuleResult::Failed { rule_id, issues } => {
            for issue in issues {
                let _ = write!(
                    text,
                    "\n      [{}] {rule_id}: {}",
                    issue.severity, issue.message
                );
            }
        }
        RuleResult::Errored { rule_id, error } => {
            let _ = write!(text, "\n      [errored] {rule_id}: {}", error.message);
        }
    }
}
