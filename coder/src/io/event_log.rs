//! Append-only execution event log (`.coder/logs/<task-id>.jsonl`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    pub task_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

/// Appends structured events for one task.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    task_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            task_id: task_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Failures are logged and otherwise ignored.
    pub fn record(&self, event: &str, step_id: Option<&str>, details: Value) {
        let record = EventRecord {
            ts: Utc::now(),
            task_id: self.task_id.clone(),
            event: event.to_string(),
            step_id: step_id.map(str::to_string),
            details,
        };
        if let Err(err) = self.append(&record) {
            warn!(error = %format!("{err:#}"), event, "failed to append event log");
        }
    }

    fn append(&self, record: &EventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append event log {}", self.path.display()))
    }
}

/// Read every event from a log file (missing file yields no events).
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read event log {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse event log {} line {}", path.display(), idx + 1))
        })
        .collect()
}
