//! Reporters: the listeners that turn events into output.

use std::sync::Arc;

use async_trait::async_trait;
use smoker_types::{SmokerEvent, SmokerOptions};

/// What a reporter is created with.
#[derive(Debug, Clone)]
pub struct ReporterContext {
    pub options: Arc<SmokerOptions>,
    /// Version of the running tool
    pub version: String,
}

/// Consumes the ordered event stream of one run.
///
/// Errors are logged by the engine and never fail the run.
#[async_trait]
pub trait Reporter: Send {
    async fn on_event(&mut self, event: &SmokerEvent) -> anyhow::Result<()>;

    /// Called once after the last event, before the run reports its result.
    async fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A reporter factory registered by a plugin.
pub trait ReporterDef: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether to enable the reporter when none were requested explicitly.
    fn when(&self, _options: &SmokerOptions) -> bool {
        true
    }

    fn create(&self, ctx: &ReporterContext) -> anyhow::Result<Box<dyn Reporter>>;
}
