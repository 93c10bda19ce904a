//! Conditional pattern: run the classifier, then exactly one routed branch.

use tracing::info;

use modweave_protocols::{DataflowStep, ModuleResult, INPUT_ENDPOINT};

use super::{
    dependency_names, plan_step, resolve_source, CompositionScope, FanOut, Produced, StepPlan,
};
use crate::dataflow::build_step_input;
use crate::error::CompositionError;
use crate::expression::evaluate_condition;
use crate::orchestrator::{DependencyOutcome, Orchestrator};

impl Orchestrator {
    pub(crate) async fn run_conditional(
        &self,
        scope: &CompositionScope<'_>,
    ) -> Result<ModuleResult, CompositionError> {
        let config = scope.config;
        let mut route_targets: Vec<&str> = Vec::new();
        for next in config.routing.iter().filter_map(|rule| rule.next.as_deref()) {
            if !route_targets.contains(&next) {
                route_targets.push(next);
            }
        }
        let feeds_route =
            |step: &DataflowStep| step.to.names().iter().any(|n| route_targets.contains(n));

        let classifier_steps: Vec<DataflowStep> = config
            .dataflow
            .iter()
            .filter(|step| !step.is_output() && !feeds_route(step))
            .cloned()
            .collect();

        let mut produced = Produced::default();
        if classifier_steps.is_empty() {
            let Some(classifier) = dependency_names(config)
                .into_iter()
                .find(|name| !route_targets.contains(name))
            else {
                return Err(CompositionError::InvalidComposition {
                    module: scope.module.to_string(),
                    reason: "no classifier dependency outside the routing targets".to_string(),
                });
            };
            match self
                .invoke_dependency(scope, classifier, scope.input.clone())
                .await
            {
                DependencyOutcome::Completed(result) => produced.insert(classifier, result),
                DependencyOutcome::Absent => {}
                DependencyOutcome::Aborted(e) => return Err(e),
            }
        } else {
            self.run_steps(scope, &classifier_steps, FanOut::Serial, &mut produced)
                .await?;
        }

        let classifier_name = produced.last_name().unwrap_or(INPUT_ENDPOINT).to_string();
        let classifier = produced
            .last()
            .cloned()
            .unwrap_or_else(|| scope.input_result());

        let envelope = classifier.to_envelope();
        let matched = config
            .routing
            .iter()
            .position(|rule| evaluate_condition(&rule.condition, &envelope));
        let next = matched.and_then(|i| config.routing[i].next.as_deref());
        match matched {
            Some(i) => info!(
                "Routing rule {} matched in {}: next={}",
                i,
                scope.module,
                next.unwrap_or("<classifier>")
            ),
            None => info!(
                "No routing rule matched in {}, keeping {} result",
                scope.module, classifier_name
            ),
        }

        for target in &route_targets {
            if Some(*target) != next {
                scope.ctx.record_skipped(target);
            }
        }

        let Some(next) = next else {
            return Ok(bind_output(scope, &produced, &classifier_name, classifier));
        };

        let branch_step = config
            .dataflow
            .iter()
            .find(|step| !step.is_output() && step.to.contains(next));
        let input = match branch_step {
            Some(step) => {
                let source = resolve_source(step, scope, &produced)
                    .unwrap_or_else(|| classifier.clone());
                build_step_input(step, source.data_or_null())
            }
            None => classifier.data_or_null().clone(),
        };

        match self.invoke_dependency(scope, next, input).await {
            DependencyOutcome::Completed(result) => {
                produced.insert(next, result.clone());
                Ok(bind_output(scope, &produced, next, result))
            }
            DependencyOutcome::Absent => {
                Ok(bind_output(scope, &produced, &classifier_name, classifier))
            }
            DependencyOutcome::Aborted(e) => Err(e),
        }
    }
}

/// Final envelope: the first output step reading from `name`, or `result`.
fn bind_output(
    scope: &CompositionScope<'_>,
    produced: &Produced,
    name: &str,
    result: ModuleResult,
) -> ModuleResult {
    for step in scope
        .config
        .dataflow
        .iter()
        .filter(|step| step.is_output() && step.from.contains(name))
    {
        if let StepPlan::Output(output) = plan_step(step, scope, produced) {
            return output;
        }
    }
    result
}
