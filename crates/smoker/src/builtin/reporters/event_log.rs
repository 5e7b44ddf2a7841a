use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use smoker_events::EventLog;
use smoker_types::{SmokerEvent, SmokerOptions};
use tracing::debug;

use crate::reporter::{Reporter, ReporterContext, ReporterDef};

/// Appends every event of the run to a JSONL file.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogReporterDef;

impl ReporterDef for EventLogReporterDef {
    fn name(&self) -> &str {
        "event-log"
    }

    fn description(&self) -> &str {
        "append every event to a JSONL file (--event-log)"
    }

    fn when(&self, options: &SmokerOptions) -> bool {
        options.event_log.is_some()
    }

    fn create(&self, ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>> {
        let path = ctx
            .options
            .event_log
            .clone()
            .unwrap_or_else(|| smoker_events::events_path(&ctx.options.cwd));
        Ok(Box::new(EventLogReporter {
            path,
            log: EventLog::new(),
        }))
    }
}

struct EventLogReporter {
    path: PathBuf,
    log: EventLog,
}

#[async_trait]
impl Reporter for EventLogReporter {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()> {
        self.log.record(event.clone());
        Ok(())
    }

    async fn teardown(&mut self) -> anyhow::Result<()> {
        debug!(path = %self.path.display(), events = self.log.len(), "writing event log");
        self.log
            .write_to_file(&self.path)
            .with_context(|| format!("failed to write event log {}", self.path.display()))
    }
}
