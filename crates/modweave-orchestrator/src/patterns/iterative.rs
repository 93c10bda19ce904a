//! Iterative pattern: re-run one module, feeding each result forward.

use serde_json::Value;
use tracing::{debug, info};

use modweave_protocols::{ModuleResult, INPUT_ENDPOINT, OUTPUT_ENDPOINT};

use super::{dependency_names, map_output, CompositionScope};
use crate::dataflow::build_step_input;
use crate::error::CompositionError;
use crate::expression::evaluate_condition;
use crate::orchestrator::{DependencyOutcome, Orchestrator};

impl Orchestrator {
    pub(crate) async fn run_iterative(
        &self,
        scope: &CompositionScope<'_>,
    ) -> Result<ModuleResult, CompositionError> {
        let config = scope.config;
        let Some(iteration) = &config.iteration else {
            return Err(CompositionError::InvalidComposition {
                module: scope.module.to_string(),
                reason: "missing iteration config".to_string(),
            });
        };
        let Some(target) = iteration_target(scope) else {
            return Err(CompositionError::InvalidComposition {
                module: scope.module.to_string(),
                reason: "no module to iterate".to_string(),
            });
        };

        let mut input = config
            .dataflow
            .iter()
            .find(|step| step.from.contains(INPUT_ENDPOINT) && step.to.contains(target))
            .map(|step| build_step_input(step, &scope.input))
            .unwrap_or_else(|| scope.input.clone());
        let mut latest: Option<ModuleResult> = None;

        for round in 1..=iteration.max_iterations {
            debug!(
                "Iteration {}/{} of {} in {}",
                round, iteration.max_iterations, target, scope.module
            );
            let result = match self.invoke_dependency(scope, target, input.clone()).await {
                DependencyOutcome::Completed(result) => result,
                DependencyOutcome::Absent => break,
                DependencyOutcome::Aborted(e) => return Err(e),
            };

            let envelope = result.to_envelope();
            let stop = iteration
                .stop_condition
                .as_deref()
                .is_some_and(|c| evaluate_condition(c, &envelope));
            let halt = iteration
                .continue_condition
                .as_deref()
                .is_some_and(|c| !evaluate_condition(c, &envelope));

            input = next_iteration_input(input, result.data_or_null());
            latest = Some(result);

            if stop || halt {
                info!(
                    "Iteration of {} in {} finished after {} rounds",
                    target, scope.module, round
                );
                break;
            }
            if round == iteration.max_iterations {
                info!(
                    "Iteration of {} in {} reached max_iterations {}",
                    target, scope.module, round
                );
            }
        }

        let result = latest.unwrap_or_else(|| scope.input_result());
        let output_step = config
            .dataflow
            .iter()
            .find(|step| step.is_output() && step.from.contains(target));
        Ok(match output_step {
            Some(step) => map_output(step, result),
            None => result,
        })
    }
}

/// The first non-output dataflow target, else the first declared dependency.
fn iteration_target<'a>(scope: &CompositionScope<'a>) -> Option<&'a str> {
    scope
        .config
        .dataflow
        .iter()
        .flat_map(|step| step.to.names())
        .find(|name| *name != OUTPUT_ENDPOINT && *name != INPUT_ENDPOINT)
        .or_else(|| dependency_names(scope.config).into_iter().next())
}

/// Input for the next round: the previous input object with the latest data
/// merged over it. Non-object data replaces the input.
pub(crate) fn next_iteration_input(previous: Value, data: &Value) -> Value {
    match (previous, data) {
        (Value::Object(mut merged), Value::Object(latest)) => {
            for (key, value) in latest {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, latest) => latest.clone(),
    }
}
