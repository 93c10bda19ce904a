//! Pattern executors and the dataflow machinery they share.
//!
//! Each pattern is an `impl Orchestrator` block in its own file.

mod conditional;
mod iterative;
mod parallel;
mod sequential;

#[cfg(test)]
#[path = "patterns_tests.rs"]
mod tests;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use modweave_protocols::{
    AggregateStrategy, CompositionConfig, CompositionPattern, DataflowStep, ModuleResult, StepRef,
    INPUT_ENDPOINT, OUTPUT_ENDPOINT,
};

use crate::aggregate::{aggregate_results, collect_array};
use crate::context::ExecutionContext;
use crate::dataflow::{apply_mapping, build_step_input};
use crate::error::CompositionError;
use crate::expression::evaluate_condition;
use crate::orchestrator::{DependencyOutcome, Orchestrator};
use crate::types::ResultStore;

/// One composed module being executed.
pub(crate) struct CompositionScope<'a> {
    pub(crate) module: &'a str,
    pub(crate) config: &'a CompositionConfig,
    /// The composition's own input.
    pub(crate) input: Value,
    /// Context for the composition's dependencies.
    pub(crate) ctx: ExecutionContext,
    pub(crate) store: &'a ResultStore,
}

impl CompositionScope<'_> {
    /// The composition input as an ok envelope.
    pub(crate) fn input_result(&self) -> ModuleResult {
        ModuleResult::success(self.input.clone())
    }
}

/// Results available to downstream steps, keyed by dependency name.
///
/// A dependency recovered by its fallback is stored under its own name.
#[derive(Debug, Default)]
pub(crate) struct Produced {
    results: HashMap<String, ModuleResult>,
    last: Option<String>,
}

impl Produced {
    pub(crate) fn insert(&mut self, name: &str, result: ModuleResult) {
        self.last = Some(name.to_string());
        self.results.insert(name.to_string(), result);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ModuleResult> {
        self.results.get(name)
    }

    /// Name of the most recently completed dependency.
    pub(crate) fn last_name(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Most recently completed result.
    pub(crate) fn last(&self) -> Option<&ModuleResult> {
        self.last_name().and_then(|name| self.results.get(name))
    }
}

/// How the targets of one dataflow wave are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FanOut {
    Serial,
    Concurrent,
}

/// What a dataflow step does once its source is known.
#[derive(Debug)]
pub(crate) enum StepPlan {
    /// Targets that will not run.
    Skip(Vec<String>),
    /// Invoke every target with `input`.
    Run { targets: Vec<String>, input: Value },
    /// The step binds the composition output.
    Output(ModuleResult),
}

/// Declared dependency names in order, duplicates collapsed.
pub(crate) fn dependency_names(config: &CompositionConfig) -> Vec<&str> {
    let mut seen = HashSet::new();
    config
        .requires
        .iter()
        .map(|entry| entry.name.as_str())
        .filter(|name| seen.insert(*name))
        .collect()
}

/// The configured dataflow, or the implicit one for a composition that
/// declares none: a chain for sequential, a fan-out and merge for parallel.
pub(crate) fn effective_dataflow(config: &CompositionConfig) -> Cow<'_, [DataflowStep]> {
    if !config.dataflow.is_empty() {
        return Cow::Borrowed(&config.dataflow);
    }
    let names = dependency_names(config);
    if names.is_empty() {
        return Cow::Borrowed(&config.dataflow);
    }
    match config.pattern {
        CompositionPattern::Sequential => {
            let mut steps = Vec::with_capacity(names.len() + 1);
            let mut previous = INPUT_ENDPOINT;
            for &name in &names {
                steps.push(DataflowStep::new(previous, name));
                previous = name;
            }
            steps.push(DataflowStep::new(previous, OUTPUT_ENDPOINT));
            Cow::Owned(steps)
        }
        CompositionPattern::Parallel => Cow::Owned(vec![
            DataflowStep::new(INPUT_ENDPOINT, StepRef::from(names.clone())),
            DataflowStep::new(StepRef::from(names), OUTPUT_ENDPOINT),
        ]),
        CompositionPattern::Conditional | CompositionPattern::Iterative => {
            Cow::Borrowed(&config.dataflow)
        }
    }
}

/// Source envelope of a step. Several sources are aggregated with the
/// step's strategy over those present; an `array` step keeps its
/// `results` wrapper even when one source is left. `None` when no source
/// has produced a result.
pub(crate) fn resolve_source(
    step: &DataflowStep,
    scope: &CompositionScope<'_>,
    produced: &Produced,
) -> Option<ModuleResult> {
    let lookup = |name: &str| -> Option<ModuleResult> {
        if name == INPUT_ENDPOINT {
            Some(scope.input_result())
        } else {
            produced.get(name).cloned()
        }
    };

    if !step.from.is_many() {
        return step.from.names().first().and_then(|name| lookup(name));
    }

    let present: Vec<ModuleResult> = step.from.names().into_iter().filter_map(lookup).collect();
    if present.is_empty() {
        return None;
    }
    match step.aggregate.unwrap_or_default() {
        // Consumers index `results` however many sources survived.
        AggregateStrategy::Array => Some(collect_array(&present)),
        strategy => Some(aggregate_results(&present, strategy)),
    }
}

/// Decide what `step` does given the results produced so far.
pub(crate) fn plan_step(
    step: &DataflowStep,
    scope: &CompositionScope<'_>,
    produced: &Produced,
) -> StepPlan {
    let targets: Vec<String> = step
        .to
        .names()
        .into_iter()
        .filter(|name| *name != INPUT_ENDPOINT && *name != OUTPUT_ENDPOINT)
        .map(str::to_string)
        .collect();

    let Some(source) = resolve_source(step, scope, produced) else {
        debug!("Step {:?} -> {:?} has no available source", step.from, step.to);
        return StepPlan::Skip(targets);
    };

    if let Some(condition) = &step.condition {
        if !evaluate_condition(condition, &source.to_envelope()) {
            debug!("Condition '{}' is false, skipping {:?}", condition, step.to);
            return StepPlan::Skip(targets);
        }
    }

    if step.is_output() {
        return StepPlan::Output(map_output(step, source));
    }

    StepPlan::Run {
        targets,
        input: build_step_input(step, source.data_or_null()),
    }
}

/// Apply an output step's mapping to the envelope bound to the output.
pub(crate) fn map_output(step: &DataflowStep, mut source: ModuleResult) -> ModuleResult {
    if let Some(mapping) = &step.mapping {
        source.data = Some(apply_mapping(mapping, source.data_or_null()));
    }
    source
}

/// End of the wave starting at `start`: consecutive non-output steps that do
/// not read from each other's targets.
fn wave_end(steps: &[DataflowStep], start: usize, fan_out: FanOut) -> usize {
    if fan_out == FanOut::Serial || steps[start].is_output() {
        return start + 1;
    }
    let mut targets: HashSet<&str> = steps[start].to.names().into_iter().collect();
    let mut end = start + 1;
    while let Some(step) = steps.get(end) {
        if step.is_output() || step.from.names().iter().any(|n| targets.contains(n)) {
            break;
        }
        targets.extend(step.to.names());
        end += 1;
    }
    end
}

impl Orchestrator {
    /// Walk `steps` in order, recording results into `produced`.
    ///
    /// Returns the output envelope if an output step ran. A required
    /// dependency failure aborts immediately with the remaining steps unrun.
    pub(crate) async fn run_steps(
        &self,
        scope: &CompositionScope<'_>,
        steps: &[DataflowStep],
        fan_out: FanOut,
        produced: &mut Produced,
    ) -> Result<Option<ModuleResult>, CompositionError> {
        let mut output = None;
        let mut start = 0;

        while start < steps.len() {
            let end = wave_end(steps, start, fan_out);
            let mut runs: Vec<(String, Value)> = Vec::new();

            for step in &steps[start..end] {
                match plan_step(step, scope, produced) {
                    StepPlan::Skip(targets) => {
                        for target in targets {
                            scope.ctx.record_skipped(&target);
                        }
                    }
                    StepPlan::Output(result) => output = Some(result),
                    StepPlan::Run { targets, input } => {
                        runs.extend(targets.into_iter().map(|t| (t, input.clone())));
                    }
                }
            }

            match fan_out {
                FanOut::Serial => {
                    for (target, input) in runs {
                        let outcome = self.invoke_dependency(scope, &target, input).await;
                        absorb(produced, &target, outcome)?;
                    }
                }
                FanOut::Concurrent => {
                    let outcomes = futures::future::join_all(
                        runs.iter()
                            .map(|(target, input)| self.invoke_dependency(scope, target, input.clone())),
                    )
                    .await;
                    // Every branch settles before the first abort is surfaced.
                    let mut aborted = None;
                    for ((target, _), outcome) in runs.iter().zip(outcomes) {
                        if let Err(e) = absorb(produced, target, outcome) {
                            aborted.get_or_insert(e);
                        }
                    }
                    if let Some(e) = aborted {
                        return Err(e);
                    }
                }
            }

            start = end;
        }

        Ok(output)
    }

    /// Run a whole dataflow and pick the final envelope: the output step,
    /// else the last completed dependency, else the input.
    pub(crate) async fn run_dataflow(
        &self,
        scope: &CompositionScope<'_>,
        fan_out: FanOut,
    ) -> Result<ModuleResult, CompositionError> {
        let steps = effective_dataflow(scope.config);
        let mut produced = Produced::default();
        let output = self.run_steps(scope, &steps, fan_out, &mut produced).await?;

        Ok(output
            .or_else(|| produced.last().cloned())
            .unwrap_or_else(|| scope.input_result()))
    }
}

fn absorb(
    produced: &mut Produced,
    target: &str,
    outcome: DependencyOutcome,
) -> Result<(), CompositionError> {
    match outcome {
        DependencyOutcome::Completed(result) => {
            produced.insert(target, result);
            Ok(())
        }
        DependencyOutcome::Absent => Ok(()),
        DependencyOutcome::Aborted(e) => Err(e),
    }
}
