//! Listener adapters: one task per reporter.

use std::sync::Arc;

use smoker_types::SmokerEvent;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message::ListenerMsg;
use crate::reporter::Reporter;

/// Sending side of a listener adapter.
#[derive(Debug, Clone)]
pub(crate) struct ListenerHandle {
    pub id: String,
    tx: UnboundedSender<ListenerMsg>,
}

impl ListenerHandle {
    pub fn send(&self, event: Arc<SmokerEvent>) {
        if self.tx.send(ListenerMsg::Event(event)).is_err() {
            debug!(reporter = %self.id, "listener already stopped");
        }
    }

    /// Ask the adapter to drain and stop.
    pub fn halt(&self) {
        let _ = self.tx.send(ListenerMsg::Halt);
    }
}

/// Spawn an adapter; the join handle resolves once the reporter has torn down.
pub(crate) fn spawn_listener(
    id: String,
    reporter: Box<dyn Reporter>,
) -> (ListenerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ListenerHandle { id: id.clone(), tx };
    let join = tokio::spawn(run(id, reporter, rx));
    (handle, join)
}

async fn run(id: String, mut reporter: Box<dyn Reporter>, mut rx: UnboundedReceiver<ListenerMsg>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ListenerMsg::Event(event) => {
                if let Err(e) = reporter.on_event(&event).await {
                    warn!(reporter = %id, event = %event.name(), error = %format!("{e:#}"), "reporter failed to handle event");
                }
            }
            ListenerMsg::Halt => break,
        }
    }
    if let Err(e) = reporter.teardown().await {
        warn!(reporter = %id, error = %format!("{e:#}"), "reporter teardown failed");
    }
    debug!(reporter = %id, "listener stopped");
}
