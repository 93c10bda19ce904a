//! Module and composition definitions.

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dataflow endpoint naming the composition's own input.
pub const INPUT_ENDPOINT: &str = "input";

/// Dataflow endpoint naming the composition's final result.
pub const OUTPUT_ENDPOINT: &str = "output";

/// A resolved module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Module name.
    pub name: String,
    /// Declared semantic version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Composition config. Absent for leaf modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<CompositionConfig>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

impl ModuleDefinition {
    /// Create a leaf module.
    pub fn leaf(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            composition: None,
        }
    }

    /// Create a composed module.
    pub fn composed(
        name: impl Into<String>,
        version: impl Into<String>,
        composition: CompositionConfig,
    ) -> Self {
        Self {
            composition: Some(composition),
            ..Self::leaf(name, version)
        }
    }

    /// Set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Whether this module is executed directly by the runner.
    pub fn is_leaf(&self) -> bool {
        self.composition.is_none()
    }
}

/// Composition pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionPattern {
    Sequential,
    Parallel,
    Conditional,
    Iterative,
}

impl CompositionPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionPattern::Sequential => "sequential",
            CompositionPattern::Parallel => "parallel",
            CompositionPattern::Conditional => "conditional",
            CompositionPattern::Iterative => "iterative",
        }
    }
}

/// Strategy for combining converging results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStrategy {
    #[default]
    Merge,
    Array,
    First,
}

/// A declared dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiresEntry {
    /// Dependency module name.
    pub name: String,
    /// Version requirement (`*`, exact, `>=`, `>`, `^`, `~`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Failure does not abort the composition.
    #[serde(default)]
    pub optional: bool,
    /// Module invoked with the same input when this one fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Per-dependency time budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RequiresEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: false,
            fallback: None,
            timeout_ms: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// One endpoint or a list of endpoints in a dataflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Single(String),
    Many(Vec<String>),
}

impl StepRef {
    /// Endpoint names with any `.output` suffix removed.
    pub fn names(&self) -> Vec<&str> {
        match self {
            StepRef::Single(name) => vec![endpoint_name(name)],
            StepRef::Many(names) => names.iter().map(|n| endpoint_name(n)).collect(),
        }
    }

    /// Whether the endpoint is written as a list.
    pub fn is_many(&self) -> bool {
        matches!(self, StepRef::Many(_))
    }

    /// Whether `name` is one of the endpoints.
    pub fn contains(&self, name: &str) -> bool {
        self.names().contains(&name)
    }
}

impl From<&str> for StepRef {
    fn from(name: &str) -> Self {
        StepRef::Single(name.to_string())
    }
}

impl From<Vec<&str>> for StepRef {
    fn from(names: Vec<&str>) -> Self {
        StepRef::Many(names.into_iter().map(str::to_string).collect())
    }
}

fn endpoint_name(raw: &str) -> &str {
    match raw.strip_suffix(".output") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => raw,
    }
}

/// One edge of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowStep {
    pub from: StepRef,
    pub to: StepRef,
    /// Output key to path expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateStrategy>,
    /// Skip condition; the step runs only when it evaluates true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DataflowStep {
    pub fn new(from: impl Into<StepRef>, to: impl Into<StepRef>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            mapping: None,
            aggregate: None,
            condition: None,
        }
    }

    pub fn with_mapping<K, V>(mut self, mapping: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.mapping = Some(
            mapping
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_aggregate(mut self, strategy: AggregateStrategy) -> Self {
        self.aggregate = Some(strategy);
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Whether this step sinks into the composition output.
    pub fn is_output(&self) -> bool {
        self.to.contains(OUTPUT_ENDPOINT)
    }
}

/// Conditional routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub condition: String,
    /// Branch module, or `None` to keep the classifier result.
    #[serde(default)]
    pub next: Option<String>,
}

impl RoutingRule {
    pub fn new(condition: impl Into<String>, next: Option<&str>) -> Self {
        Self {
            condition: condition.into(),
            next: next.map(str::to_string),
        }
    }
}

/// Iteration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationConfig {
    pub max_iterations: u32,
    /// Keep iterating while true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_condition: Option<String>,
    /// Stop once true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_condition: Option<String>,
}

/// Composition configuration attached to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionConfig {
    pub pattern: CompositionPattern,
    #[serde(default)]
    pub requires: Vec<RequiresEntry>,
    #[serde(default)]
    pub dataflow: Vec<DataflowStep>,
    #[serde(default)]
    pub routing: Vec<RoutingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationConfig>,
    /// Whole-run time budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CompositionConfig {
    pub fn new(pattern: CompositionPattern) -> Self {
        Self {
            pattern,
            requires: Vec::new(),
            dataflow: Vec::new(),
            routing: Vec::new(),
            iteration: None,
            timeout_ms: None,
        }
    }

    pub fn with_requires(mut self, entry: RequiresEntry) -> Self {
        self.requires.push(entry);
        self
    }

    pub fn with_step(mut self, step: DataflowStep) -> Self {
        self.dataflow.push(step);
        self
    }

    pub fn with_route(mut self, rule: RoutingRule) -> Self {
        self.routing.push(rule);
        self
    }

    pub fn with_iteration(mut self, iteration: IterationConfig) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Look up a declared dependency. Duplicates collapse to the first entry.
    pub fn requires_entry(&self, name: &str) -> Option<&RequiresEntry> {
        self.requires.iter().find(|entry| entry.name == name)
    }
}
