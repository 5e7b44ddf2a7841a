//! Event logging for smoker runs.
//!
//! This crate provides an append-only JSONL log of [`SmokerEvent`]s, each
//! stamped with the time it was recorded, with support for filtering by
//! dotted event name (`Pack.ItemOk`, `RunBegin`, ...).
//!
//! # Example
//!
//! ```
//! use smoker_events::EventLog;
//! use smoker_types::SmokerEvent;
//!
//! let mut log = EventLog::new();
//! log.record(SmokerEvent::BeforeExit);
//! assert_eq!(log.events_named("BeforeExit").len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smoker_types::SmokerEvent;

/// Default events file name
pub const EVENTS_FILE: &str = "smoker-events.jsonl";

/// Get the events file path for a directory
pub fn events_path(dir: &Path) -> PathBuf {
    dir.join(EVENTS_FILE)
}

/// A single log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SmokerEvent,
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RecordedEvent>,
}

impl EventLog {
    /// Create a new empty event log.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Record an event, stamped with the current time.
    pub fn record(&mut self, event: SmokerEvent) {
        self.record_at(Utc::now(), event);
    }

    /// Record an event with an explicit timestamp.
    pub fn record_at(&mut self, timestamp: DateTime<Utc>, event: SmokerEvent) {
        self.events.push(RecordedEvent { timestamp, event });
    }

    /// Write all recorded events to a file in JSONL format.
    ///
    /// Events are appended to the file if it already exists.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }

        writer.flush().context("failed to flush events file")?;

        Ok(())
    }

    /// Read all events from a JSONL file. Blank lines are ignored.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: RecordedEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    /// Get all events with the given dotted name.
    pub fn events_named(&self, name: &str) -> Vec<&RecordedEvent> {
        self.events
            .iter()
            .filter(|e| e.event.name() == name)
            .collect()
    }

    /// Get all recorded events.
    pub fn all_events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Clear all recorded events from memory.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Get the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use smoker_types::{RunOutcome, Stage, StageEventKind};
    use tempfile::tempdir;

    fn item_ok(pm: &str) -> SmokerEvent {
        SmokerEvent::stage(
            Stage::Pack,
            StageEventKind::TargetOk {
                pkg_manager: pm.to_string(),
                completed: 1,
                targets: 1,
            },
        )
    }

    #[test]
    fn new_log_is_empty() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn write_then_read_preserves_order() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());

        let mut log = EventLog::new();
        log.record(SmokerEvent::BeforeExit);
        log.record(item_ok("npm@10.2.0"));
        log.record(SmokerEvent::RunOk(RunOutcome {
            ok: true,
            ..RunOutcome::default()
        }));
        log.write_to_file(&path).expect("write");

        let read = EventLog::read_from_file(&path).expect("read");
        let names: Vec<String> = read.all_events().iter().map(|e| e.event.name()).collect();
        assert_eq!(names, vec!["BeforeExit", "Pack.TargetOk", "RunOk"]);
    }

    #[test]
    fn writes_append_to_existing_file() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("nested").join("log.jsonl");

        let mut first = EventLog::new();
        first.record(SmokerEvent::BeforeExit);
        first.write_to_file(&path).expect("write");

        let mut second = EventLog::new();
        second.record(item_ok("npm@9.8.1"));
        second.write_to_file(&path).expect("write");

        let read = EventLog::read_from_file(&path).expect("read");
        assert_eq!(read.len(), 2);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let td = tempdir().expect("tempdir");
        let read = EventLog::read_from_file(&td.path().join("nope.jsonl")).expect("read");
        assert!(read.is_empty());
    }

    #[test]
    fn malformed_line_is_an_error() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());
        fs::write(&path, "{not json}\n").expect("write");
        assert!(EventLog::read_from_file(&path).is_err());
    }

    #[test]
    fn events_named_filters() {
        let mut log = EventLog::new();
        log.record(item_ok("npm@10.2.0"));
        log.record(SmokerEvent::BeforeExit);
        log.record(item_ok("npm@9.8.1"));
        assert_eq!(log.events_named("Pack.TargetOk").len(), 2);
        assert_eq!(log.events_named("Install.TargetOk").len(), 0);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn line_format_is_flat() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("ts");
        let mut log = EventLog::new();
        log.record_at(ts, SmokerEvent::BeforeExit);
        let line = serde_json::to_string(&log.all_events()[0]).expect("json");
        insta::assert_snapshot!(line, @r#"{"timestamp":"2024-01-02T03:04:05Z","event":"before_exit"}"#);
    }
}
