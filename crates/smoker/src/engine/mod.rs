//! The actor engine behind a smoke-test run.
//!
//! - [`control`]: loading, stage sequencing, and shutdown
//! - [`bus`]: one aggregator per stage
//! - [`worker`]: one per package-manager target, with four lanes
//! - [`rule_checker`]: one per (worker, rule)
//! - [`listener`]: one per reporter
//!
//! Actors share no mutable state; everything crosses a channel.

mod bus;
mod control;
mod guards;
mod listener;
mod message;
mod rule_checker;
mod worker;

use std::sync::Arc;

use smoker_types::{RunOutcome, SmokerOptions};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SmokerError;
use crate::executor::{Executor, SystemExecutor};
use crate::plugin::PluginRegistry;

use self::control::Control;
use self::message::ControlMsg;

/// A configured smoke-test run.
///
/// # Example
///
/// ```ignore
/// use smoker::{PluginRegistry, Smoker};
/// use smoker_types::SmokerOptions;
///
/// let options = SmokerOptions {
///     scripts: vec!["test".into()],
///     ..SmokerOptions::default()
/// };
/// let outcome = Smoker::new(options, PluginRegistry::with_builtins()).run().await?;
/// assert!(outcome.ok);
/// ```
pub struct Smoker {
    options: SmokerOptions,
    registry: PluginRegistry,
    executor: Arc<dyn Executor>,
    signal: CancellationToken,
}

impl Smoker {
    pub fn new(options: SmokerOptions, registry: PluginRegistry) -> Self {
        Self {
            options,
            registry,
            executor: Arc::new(SystemExecutor),
            signal: CancellationToken::new(),
        }
    }

    /// Replace the executor package-manager commands run through.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Use an externally owned abort signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    /// Spawn the run on the current tokio runtime.
    pub fn start(self) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Control::new(
            Arc::new(self.options),
            self.registry,
            self.executor,
            self.signal.clone(),
            tx.clone(),
            rx,
        );
        RunHandle {
            stop: StopHandle {
                control: tx,
                signal: self.signal,
            },
            join: tokio::spawn(control.run()),
        }
    }

    /// Run to completion.
    pub async fn run(self) -> Result<RunOutcome, SmokerError> {
        self.start().wait().await
    }
}

/// Stops a run from outside; cheap to clone.
#[derive(Clone)]
pub struct StopHandle {
    control: UnboundedSender<ControlMsg>,
    signal: CancellationToken,
}

impl StopHandle {
    /// Ask the run to stop once in-flight work settles.
    ///
    /// Jobs already running finish normally; see [`StopHandle::abort`] to
    /// interrupt them.
    pub fn halt(&self) {
        let _ = self.control.send(ControlMsg::Halt);
    }

    /// Trigger the abort signal: queued jobs fail without spawning anything
    /// and running processes are killed.
    pub fn abort(&self) {
        self.signal.cancel();
    }

    pub fn signal(&self) -> CancellationToken {
        self.signal.clone()
    }
}

/// A run in progress.
pub struct RunHandle {
    stop: StopHandle,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn halt(&self) {
        self.stop.halt();
    }

    pub fn abort(&self) {
        self.stop.abort();
    }

    /// A handle that outlives [`RunHandle::wait`].
    pub fn stopper(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the final outcome.
    ///
    /// A failed run is still `Ok`; `Err` means the engine itself crashed.
    pub async fn wait(self) -> Result<RunOutcome, SmokerError> {
        self.join
            .await
            .map_err(|e| SmokerError::lifecycle("control", format!("run crashed: {e}")))
    }
}
