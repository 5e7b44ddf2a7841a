use std::io::Write;

use anyhow::Context;
use async_trait::async_trait;
use smoker_types::{SmokerEvent, SmokerOptions};

use crate::reporter::{Reporter, ReporterContext, ReporterDef};

/// Prints the final run outcome as JSON on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReporterDef;

impl ReporterDef for JsonReporterDef {
    fn name(&self) -> &str {
        "json"
    }

    fn description(&self) -> &str {
        "print the final result as JSON on stdout"
    }

    fn when(&self, options: &SmokerOptions) -> bool {
        options.json
    }

    fn create(&self, _ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(JsonReporter))
    }
}

struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()> {
        let Some(outcome) = event.outcome() else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(outcome).context("failed to serialize outcome")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{text}")?;
        stdout.flush()?;
        Ok(())
    }
}
