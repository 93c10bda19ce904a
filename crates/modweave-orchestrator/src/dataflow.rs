//! Dataflow mapping between steps.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use modweave_protocols::DataflowStep;

use crate::expression::evaluate_json_path;

/// Build an object by evaluating each `output key -> path` pair against `source`.
///
/// Unresolved paths leave the key out of the result.
pub fn apply_mapping(mapping: &BTreeMap<String, String>, source: &Value) -> Value {
    let mut output = Map::with_capacity(mapping.len());
    for (key, path) in mapping {
        match evaluate_json_path(path, source) {
            Some(value) => {
                output.insert(key.clone(), value);
            }
            None => debug!("Mapping '{}' <- '{}' did not resolve", key, path),
        }
    }
    Value::Object(output)
}

/// Input for the step's targets: the mapped projection, or the raw payload.
pub fn build_step_input(step: &DataflowStep, source: &Value) -> Value {
    match &step.mapping {
        Some(mapping) => apply_mapping(mapping, source),
        None => source.clone(),
    }
}
