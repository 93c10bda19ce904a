//! Combining converging branch results.

#[cfg(test)]
#[path = "aggregate_tests.rs"]
mod tests;

use serde_json::{json, Value};

use modweave_protocols::{AggregateStrategy, ModuleResult, ResultMeta, RiskLevel};

/// Error code of an aggregation over zero results.
pub const EMPTY_AGGREGATION: &str = "EMPTY_AGGREGATION";

/// Combine `results` into one envelope using `strategy`.
pub fn aggregate_results(results: &[ModuleResult], strategy: AggregateStrategy) -> ModuleResult {
    match results {
        [] => ModuleResult::failure(EMPTY_AGGREGATION, "No results to aggregate"),
        [single] => single.clone(),
        _ => match strategy {
            AggregateStrategy::Merge => merge(results),
            AggregateStrategy::Array => collect_array(results),
            AggregateStrategy::First => first_success(results),
        },
    }
}

fn merge(results: &[ModuleResult]) -> ModuleResult {
    let mut data = json!({});
    let mut any_success = false;
    for result in results.iter().filter(|r| r.ok) {
        any_success = true;
        if let Some(payload) = &result.data {
            deep_merge(&mut data, payload);
        }
    }

    let confidence =
        results.iter().map(|r| r.meta.confidence).sum::<f64>() / results.len() as f64;
    let risk = results
        .iter()
        .map(|r| r.meta.risk)
        .max()
        .unwrap_or(RiskLevel::None);
    let explain = results
        .iter()
        .map(|r| r.meta.explain.as_str())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let meta = ResultMeta::new(confidence, risk, explain);

    if any_success {
        ModuleResult::success(data).with_meta(meta)
    } else {
        all_failed(results).with_meta(meta)
    }
}

pub(crate) fn collect_array(results: &[ModuleResult]) -> ModuleResult {
    let collected: Vec<Value> = results.iter().filter_map(|r| r.data.clone()).collect();
    let meta = results[0].meta.clone();

    if results.iter().any(|r| r.ok) {
        ModuleResult::success(json!({ "results": collected })).with_meta(meta)
    } else {
        all_failed(results).with_meta(meta)
    }
}

fn first_success(results: &[ModuleResult]) -> ModuleResult {
    results
        .iter()
        .find(|r| r.ok)
        .unwrap_or(&results[0])
        .clone()
}

fn all_failed(results: &[ModuleResult]) -> ModuleResult {
    match results.iter().find_map(|r| r.error.as_ref()) {
        Some(error) => ModuleResult::failure(error.code.clone(), error.message.clone()),
        None => ModuleResult::failure(
            "AGGREGATION_FAILED",
            format!("All {} results failed", results.len()),
        ),
    }
}

/// Recursively merge `incoming` into `target`; non-object values from `incoming` win.
pub(crate) fn deep_merge(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(key) {
                        deep_merge(existing, value);
                    }
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}
