//! Built-in reporters.

mod console;
mod event_log;
mod json;

pub use console::{ConsoleReporterDef, render};
pub use event_log::EventLogReporterDef;
pub use json::JsonReporterDef;
