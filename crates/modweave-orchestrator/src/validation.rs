//! Static checks on a composition config before it runs.

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;

use std::collections::HashSet;

use modweave_protocols::{
    CompositionConfig, CompositionPattern, INPUT_ENDPOINT, OUTPUT_ENDPOINT,
};

use crate::expression::check_condition_syntax;
use crate::version::is_valid_requirement;

/// A problem found in a composition config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionIssue {
    /// Location inside the config, e.g. `dataflow[1].condition`.
    pub path: String,
    pub message: String,
}

impl CompositionIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CompositionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validation report.
#[derive(Debug, Default)]
pub struct CompositionReport {
    pub errors: Vec<CompositionIssue>,
    pub warnings: Vec<CompositionIssue>,
}

impl CompositionReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(CompositionIssue::new(path, message));
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(CompositionIssue::new(path, message));
    }

    /// All errors on one line.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a composition config.
pub fn validate_composition(config: &CompositionConfig) -> CompositionReport {
    let mut report = CompositionReport::default();

    validate_requires(config, &mut report);
    validate_dataflow(config, &mut report);
    validate_routing(config, &mut report);
    validate_iteration(config, &mut report);

    if config.timeout_ms == Some(0) {
        report.error("timeout_ms", "timeout_ms must be greater than 0");
    }

    report
}

fn validate_requires(config: &CompositionConfig, report: &mut CompositionReport) {
    let mut seen = HashSet::new();
    for (i, entry) in config.requires.iter().enumerate() {
        let path = format!("requires[{}]", i);
        if entry.name.trim().is_empty() {
            report.error(format!("{}.name", path), "dependency name is empty");
            continue;
        }
        if entry.name == INPUT_ENDPOINT || entry.name == OUTPUT_ENDPOINT {
            report.error(
                format!("{}.name", path),
                format!("'{}' is a reserved endpoint name", entry.name),
            );
        }
        if !seen.insert(entry.name.as_str()) {
            report.warn(
                path.clone(),
                format!("duplicate dependency '{}'; the first entry is used", entry.name),
            );
        }
        if let Some(version) = &entry.version {
            if !is_valid_requirement(version) {
                report.error(
                    format!("{}.version", path),
                    format!("invalid version requirement '{}'", version),
                );
            }
        }
        if entry.timeout_ms == Some(0) {
            report.error(format!("{}.timeout_ms", path), "timeout_ms must be greater than 0");
        }
        if entry.fallback.as_deref() == Some(entry.name.as_str()) {
            report.error(
                format!("{}.fallback", path),
                "a dependency cannot be its own fallback",
            );
        }
    }
}

fn validate_dataflow(config: &CompositionConfig, report: &mut CompositionReport) {
    let declared: HashSet<&str> = config.requires.iter().map(|e| e.name.as_str()).collect();

    for (i, step) in config.dataflow.iter().enumerate() {
        let path = format!("dataflow[{}]", i);
        for name in step.from.names().into_iter().chain(step.to.names()) {
            if name == INPUT_ENDPOINT || name == OUTPUT_ENDPOINT {
                continue;
            }
            if !declared.contains(name) {
                report.warn(
                    path.clone(),
                    format!("'{}' is not declared in requires", name),
                );
            }
        }
        if step.to.names().contains(&INPUT_ENDPOINT) {
            report.error(format!("{}.to", path), "'input' cannot be a step target");
        }
        if step.from.names().contains(&OUTPUT_ENDPOINT) {
            report.error(format!("{}.from", path), "'output' cannot be a step source");
        }
        if let Some(condition) = &step.condition {
            if let Err(e) = check_condition_syntax(condition) {
                report.error(format!("{}.condition", path), e);
            }
        }
    }

    if config.pattern == CompositionPattern::Parallel {
        // Branches may share one array step or each take a mapped step of their own.
        let branches: HashSet<&str> = config
            .dataflow
            .iter()
            .filter(|step| step.from.contains(INPUT_ENDPOINT) && !step.is_output())
            .flat_map(|step| step.to.names())
            .collect();
        if branches.len() == 1 && declared.len() > 1 {
            report.warn("dataflow", "parallel fan-out reaches a single branch");
        }
    }
}

fn validate_routing(config: &CompositionConfig, report: &mut CompositionReport) {
    if config.pattern == CompositionPattern::Conditional {
        if config.routing.is_empty() {
            report.error("routing", "conditional composition requires routing rules");
        }
    } else if !config.routing.is_empty() {
        report.warn(
            "routing",
            format!("routing is ignored by the {} pattern", config.pattern.as_str()),
        );
    }

    for (i, rule) in config.routing.iter().enumerate() {
        if let Err(e) = check_condition_syntax(&rule.condition) {
            report.error(format!("routing[{}].condition", i), e);
        }
        if let Some(next) = &rule.next {
            if config.requires_entry(next).is_none() {
                report.warn(
                    format!("routing[{}].next", i),
                    format!("'{}' is not declared in requires", next),
                );
            }
        }
    }
}

fn validate_iteration(config: &CompositionConfig, report: &mut CompositionReport) {
    let Some(iteration) = &config.iteration else {
        if config.pattern == CompositionPattern::Iterative {
            report.error("iteration", "iterative composition requires an iteration config");
        }
        return;
    };

    if config.pattern != CompositionPattern::Iterative {
        report.warn(
            "iteration",
            format!("iteration is ignored by the {} pattern", config.pattern.as_str()),
        );
    }
    if iteration.max_iterations == 0 {
        report.error("iteration.max_iterations", "max_iterations must be greater than 0");
    }
    if iteration.continue_condition.is_none() && iteration.stop_condition.is_none() {
        report.error(
            "iteration",
            "one of continue_condition or stop_condition is required",
        );
    }
    for (field, condition) in [
        ("continue_condition", &iteration.continue_condition),
        ("stop_condition", &iteration.stop_condition),
    ] {
        if let Some(condition) = condition {
            if let Err(e) = check_condition_syntax(condition) {
                report.error(format!("iteration.{}", field), e);
            }
        }
    }
    if config.requires.is_empty() && config.dataflow.iter().all(|s| s.is_output()) {
        report.error("requires", "iterative composition has no module to iterate");
    }
}
