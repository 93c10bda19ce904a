//! Per-call execution context threaded through recursive module execution.

use std::sync::Arc;

use modweave_protocols::ModuleResult;
use tracing::debug;

use crate::trace::{ExecutionObserver, StepTimer, TraceEntry, TraceRecorder};
use crate::types::ResultStore;

/// Error code stored for a step cut off by an enclosing deadline.
const INTERRUPTED_CODE: &str = "TIMEOUT";

/// Depth, ancestry and trace sink for one level of composition nesting.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    /// Nesting depth. The entry module runs at depth 0.
    pub(crate) depth: usize,
    pub(crate) max_depth: usize,
    /// Compositions currently executing, outermost first.
    pub(crate) ancestors: Vec<String>,
    pub(crate) trace: TraceRecorder,
    pub(crate) observer: Option<Arc<dyn ExecutionObserver>>,
}

impl ExecutionContext {
    pub(crate) fn root(max_depth: usize, observer: Option<Arc<dyn ExecutionObserver>>) -> Self {
        Self {
            depth: 0,
            max_depth,
            ancestors: Vec::new(),
            trace: TraceRecorder::new(),
            observer,
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Context for the dependencies of composition `name`.
    pub(crate) fn descend(&self, name: &str) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(name.to_string());
        Self {
            depth: self.depth + 1,
            max_depth: self.max_depth,
            ancestors,
            trace: self.trace.clone(),
            observer: self.observer.clone(),
        }
    }

    /// Ancestor chain closed by `name`, e.g. `a -> b -> a`.
    pub(crate) fn cycle_through(&self, name: &str) -> Option<String> {
        let start = self.ancestors.iter().position(|a| a == name)?;
        let mut chain: Vec<&str> = self.ancestors[start..].iter().map(String::as_str).collect();
        chain.push(name);
        Some(chain.join(" -> "))
    }

    pub(crate) fn step_started(&self, module: &str) {
        if let Some(observer) = &self.observer {
            observer.on_step_started(module, self.depth);
        }
    }

    /// Append to the trace and notify the observer.
    pub(crate) fn record(&self, entry: TraceEntry) {
        if let Some(observer) = &self.observer {
            observer.on_step_finished(&entry);
        }
        self.trace.record(entry);
    }

    pub(crate) fn record_skipped(&self, module: &str) {
        self.record(TraceEntry::skipped(module, self.depth));
    }

    /// Start timing `module`, whose result will land in `store`.
    pub(crate) fn begin_step<'a>(
        &'a self,
        module: &str,
        store: &'a ResultStore,
    ) -> PendingStep<'a> {
        PendingStep {
            ctx: self,
            store,
            module: module.to_string(),
            timer: Some(StepTimer::start(module, self.depth)),
        }
    }
}

/// A step in flight.
///
/// Dropped without `finish`, it records the step as failed with `TIMEOUT`:
/// an enclosing deadline cancelled the future that owned it.
pub(crate) struct PendingStep<'a> {
    ctx: &'a ExecutionContext,
    store: &'a ResultStore,
    module: String,
    timer: Option<StepTimer>,
}

impl PendingStep<'_> {
    pub(crate) fn finish(mut self, result: &ModuleResult) {
        if let Some(timer) = self.timer.take() {
            self.close(timer, result.clone());
        }
    }

    fn close(&self, timer: StepTimer, result: ModuleResult) {
        self.ctx
            .record(timer.finish(result.ok, result.error_code().map(str::to_string)));
        self.store.insert(self.module.clone(), result);
    }
}

impl Drop for PendingStep<'_> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!("Step {} interrupted before completion", self.module);
            let result = ModuleResult::failure(
                INTERRUPTED_CODE,
                format!("'{}' was interrupted by an enclosing timeout", self.module),
            );
            self.close(timer, result);
        }
    }
}
