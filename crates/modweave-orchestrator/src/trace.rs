//! Execution trace and observer hooks.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One attempted or skipped step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    /// Module invoked (or skipped).
    pub module: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Nesting depth of the composition that ran the step.
    #[serde(default)]
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceEntry {
    /// Entry for a step that was not executed.
    pub fn skipped(module: impl Into<String>, depth: usize) -> Self {
        let now = Utc::now();
        Self {
            module: module.into(),
            start_time: now,
            end_time: now,
            duration_ms: 0,
            success: true,
            skipped: true,
            depth,
            error: None,
        }
    }
}

/// Measures one step.
pub(crate) struct StepTimer {
    module: String,
    depth: usize,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StepTimer {
    pub(crate) fn start(module: impl Into<String>, depth: usize) -> Self {
        Self {
            module: module.into(),
            depth,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(self, success: bool, error: Option<String>) -> TraceEntry {
        TraceEntry {
            module: self.module,
            start_time: self.started_at,
            end_time: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            success,
            skipped: false,
            depth: self.depth,
            error,
        }
    }
}

/// Append-only trace shared by every step of one `execute()` call,
/// including concurrent branches and nested compositions.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: TraceEntry) {
        self.entries.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ordered by start time (ties keep recording order).
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        let mut entries = self.entries.lock().clone();
        entries.sort_by_key(|entry| entry.start_time);
        entries
    }
}

/// Receives step notifications during one `execute()` call.
pub trait ExecutionObserver: Send + Sync {
    /// A dependency is about to run.
    fn on_step_started(&self, _module: &str, _depth: usize) {}

    /// A dependency finished or was skipped.
    fn on_step_finished(&self, _entry: &TraceEntry) {}
}
