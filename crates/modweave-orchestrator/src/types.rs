//! Orchestration inputs and outputs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use modweave_protocols::{ModuleResult, ResultError};

use crate::trace::{ExecutionObserver, TraceEntry};

/// Outcome of one `execute()` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    /// Identifier of this run.
    pub run_id: Uuid,
    pub ok: bool,
    /// Envelope bound to the composition output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModuleResult>,
    /// Raw result of every direct dependency, fallbacks included.
    pub module_results: HashMap<String, ModuleResult>,
    pub trace: Vec<TraceEntry>,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
}

impl OrchestrationResult {
    /// Error code, if the run failed.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Result data of the final envelope.
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.result.as_ref().and_then(|r| r.data.as_ref())
    }
}

/// Per-call overrides.
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Recursion limit. Falls back to the configured `max_depth`.
    pub max_depth: Option<usize>,
    /// Whole-run budget in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Receives step notifications.
    pub observer: Option<Arc<dyn ExecutionObserver>>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("max_depth", &self.max_depth)
            .field("timeout_ms", &self.timeout_ms)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Dependency results of one composition level.
///
/// Shared with the caller so that results survive a whole-run timeout.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResultStore {
    results: Arc<Mutex<HashMap<String, ModuleResult>>>,
}

impl ResultStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, name: impl Into<String>, result: ModuleResult) {
        self.results.lock().insert(name.into(), result);
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, ModuleResult> {
        self.results.lock().clone()
    }
}
