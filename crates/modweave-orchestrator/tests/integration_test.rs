//! End-to-end tests for composition execution.
//!
//! Modules are served from an in-memory registry and run by a scripted
//! runner that records every call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use modweave_orchestrator::{ExecuteOptions, MemoryModuleLoader, OrchestrationResult, Orchestrator};
use modweave_protocols::{
    AggregateStrategy, CompositionConfig, CompositionPattern, DataflowStep, IterationConfig,
    ModuleDefinition, ModuleResult, ModuleRunner, ProtocolError, Provider, ProviderHandle,
    RequiresEntry, ResultMeta, RiskLevel, RoutingRule,
};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Clone)]
enum Behavior {
    /// Return the input as data.
    Echo,
    Reply(ModuleResult),
    Fail(&'static str),
    Delay(u64, ModuleResult),
}

/// Runner that answers from a script and records calls.
#[derive(Default)]
struct ScriptedRunner {
    script: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, Value)>>,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self::default()
    }

    fn on(self, module: &str, behavior: Behavior) -> Self {
        self.script.lock().unwrap().insert(module.to_string(), behavior);
        self
    }

    fn count(&self, module: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(m, _)| m == module).count()
    }

    fn inputs(&self, module: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == module)
            .map(|(_, input)| input.clone())
            .collect()
    }

    fn peak(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleRunner for ScriptedRunner {
    async fn run_module(
        &self,
        module: &ModuleDefinition,
        _provider: &ProviderHandle,
        input: &Value,
    ) -> Result<ModuleResult, ProtocolError> {
        self.calls
            .lock()
            .unwrap()
            .push((module.name.clone(), input.clone()));
        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(&module.name)
            .cloned()
            .unwrap_or(Behavior::Echo);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let result = match behavior {
            Behavior::Echo => ModuleResult::success(input.clone()),
            Behavior::Reply(result) => result,
            Behavior::Fail(code) => ModuleResult::failure(code, format!("{} failed", module.name)),
            Behavior::Delay(ms, result) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                result
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

struct TestProvider;

impl Provider for TestProvider {
    fn id(&self) -> &str {
        "test"
    }
}

fn build(loader: MemoryModuleLoader, runner: &Arc<ScriptedRunner>) -> Orchestrator {
    Orchestrator::new(Arc::new(loader), runner.clone(), Arc::new(TestProvider))
}

fn leaf(name: &str) -> ModuleDefinition {
    ModuleDefinition::leaf(name, "1.0.0")
}

fn composed(name: &str, config: CompositionConfig) -> ModuleDefinition {
    ModuleDefinition::composed(name, "1.0.0", config)
}

fn reply(data: Value) -> Behavior {
    Behavior::Reply(ModuleResult::success(data))
}

fn reply_with_confidence(data: Value, confidence: f64) -> Behavior {
    Behavior::Reply(
        ModuleResult::success(data).with_meta(ResultMeta::new(confidence, RiskLevel::Low, "")),
    )
}

async fn run(orchestrator: &Orchestrator, name: &str, input: Value) -> OrchestrationResult {
    orchestrator.execute(name, input, ExecuteOptions::default()).await
}

// ============================================================================
// Sequential
// ============================================================================

#[tokio::test]
async fn test_sequential_mapping_projects_fields() {
    let runner = Arc::new(ScriptedRunner::new().on(
        "extract",
        reply(json!({"extracted": "X", "nested": {"deep": "Y"}, "noise": true})),
    ));
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("extract"))
        .with_requires(RequiresEntry::new("consume"))
        .with_step(DataflowStep::new("input", "extract"))
        .with_step(
            DataflowStep::new("extract.output", "consume")
                .with_mapping([("mapped_field", "$.extracted"), ("nested_value", "$.nested.deep")]),
        )
        .with_step(DataflowStep::new("consume.output", "output"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("extract"))
        .with_module(leaf("consume"))
        .with_module(composed("pipeline", config));

    let outcome = run(&build(loader, &runner), "pipeline", json!({"doc": "text"})).await;

    assert!(outcome.ok, "{:?}", outcome.error);
    let expected = json!({"mapped_field": "X", "nested_value": "Y"});
    assert_eq!(runner.inputs("extract"), vec![json!({"doc": "text"})]);
    assert_eq!(runner.inputs("consume"), vec![expected.clone()]);
    assert_eq!(outcome.data(), Some(&expected));
    assert_eq!(outcome.trace.len(), 2);
    assert_eq!(outcome.module_results.len(), 2);
}

#[tokio::test]
async fn test_sequential_implicit_chain() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("first", reply(json!({"step": 1})))
            .on("second", Behavior::Echo),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("first"))
        .with_requires(RequiresEntry::new("second"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("first"))
        .with_module(leaf("second"))
        .with_module(composed("chain", config));

    let outcome = run(&build(loader, &runner), "chain", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(runner.inputs("second"), vec![json!({"step": 1})]);
    assert_eq!(outcome.data(), Some(&json!({"step": 1})));
}

#[tokio::test]
async fn test_false_step_condition_skips_target() {
    let runner = Arc::new(ScriptedRunner::new().on("score", reply(json!({"score": 2}))));
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("score"))
        .with_requires(RequiresEntry::new("escalate"))
        .with_step(DataflowStep::new("input", "score"))
        .with_step(DataflowStep::new("score", "escalate").with_condition("$.data.score > 5"))
        .with_step(DataflowStep::new("score", "output"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("score"))
        .with_module(leaf("escalate"))
        .with_module(composed("triage", config));

    let outcome = run(&build(loader, &runner), "triage", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("escalate"), 0);
    let skipped: Vec<_> = outcome.trace.iter().filter(|e| e.skipped).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].module, "escalate");
    assert_eq!(outcome.data(), Some(&json!({"score": 2})));
}

// ============================================================================
// Parallel
// ============================================================================

fn parallel_loader(strategy: AggregateStrategy) -> MemoryModuleLoader {
    let config = CompositionConfig::new(CompositionPattern::Parallel)
        .with_requires(RequiresEntry::new("a"))
        .with_requires(RequiresEntry::new("b"))
        .with_requires(RequiresEntry::new("c"))
        .with_step(DataflowStep::new("input", vec!["a", "b", "c"]))
        .with_step(DataflowStep::new(vec!["a", "b", "c"], "output").with_aggregate(strategy));
    MemoryModuleLoader::new()
        .with_module(leaf("a"))
        .with_module(leaf("b"))
        .with_module(leaf("c"))
        .with_module(composed("fan", config))
}

#[tokio::test]
async fn test_parallel_array_aggregation() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", reply(json!({"id": "a"})))
            .on("b", reply(json!({"id": "b"})))
            .on("c", reply(json!({"id": "c"}))),
    );
    let outcome = run(&build(parallel_loader(AggregateStrategy::Array), &runner), "fan", json!({})).await;

    assert!(outcome.ok);
    let results = outcome.data().unwrap()["results"].as_array().unwrap().clone();
    assert_eq!(results.len(), 3);
    let ids: HashSet<_> = results.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()]));
}

#[tokio::test]
async fn test_parallel_merge_aggregation() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", reply_with_confidence(json!({"summary": "s"}), 0.6))
            .on("b", reply_with_confidence(json!({"keywords": ["k"]}), 0.8))
            .on("c", reply_with_confidence(json!({"sentiment": "positive"}), 1.0)),
    );
    let outcome = run(&build(parallel_loader(AggregateStrategy::Merge), &runner), "fan", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(
        outcome.data(),
        Some(&json!({"summary": "s", "keywords": ["k"], "sentiment": "positive"}))
    );
    let confidence = outcome.result.as_ref().unwrap().meta.confidence;
    assert!((confidence - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_parallel_branches_receive_same_input_concurrently() {
    let delayed = |id: &str| Behavior::Delay(50, ModuleResult::success(json!({"id": id})));
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", delayed("a"))
            .on("b", delayed("b"))
            .on("c", delayed("c")),
    );
    let outcome = run(
        &build(parallel_loader(AggregateStrategy::Merge), &runner),
        "fan",
        json!({"doc": 1}),
    )
    .await;

    assert!(outcome.ok);
    assert_eq!(runner.peak(), 3);
    for branch in ["a", "b", "c"] {
        assert_eq!(runner.inputs(branch), vec![json!({"doc": 1})]);
    }
}

#[tokio::test]
async fn test_parallel_individually_mapped_branches() {
    let delayed = |data: Value| Behavior::Delay(30, ModuleResult::success(data));
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", delayed(json!({"summary": "short"})))
            .on("b", delayed(json!({"keywords": ["k"]}))),
    );
    let config = CompositionConfig::new(CompositionPattern::Parallel)
        .with_requires(RequiresEntry::new("a"))
        .with_requires(RequiresEntry::new("b"))
        .with_step(DataflowStep::new("input", "a").with_mapping([("x", "$.text")]))
        .with_step(DataflowStep::new("input", "b").with_mapping([("y", "$.text")]))
        .with_step(
            DataflowStep::new(vec!["a", "b"], "output").with_aggregate(AggregateStrategy::Merge),
        );
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("a"))
        .with_module(leaf("b"))
        .with_module(composed("fan", config));

    let outcome = run(&build(loader, &runner), "fan", json!({"text": "doc"})).await;

    assert!(outcome.ok, "{:?}", outcome.error);
    assert_eq!(runner.inputs("a"), vec![json!({"x": "doc"})]);
    assert_eq!(runner.inputs("b"), vec![json!({"y": "doc"})]);
    assert_eq!(runner.peak(), 2);
    assert_eq!(
        outcome.data(),
        Some(&json!({"summary": "short", "keywords": ["k"]}))
    );
}

#[tokio::test]
async fn test_parallel_optional_branch_failure_is_tolerated() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", reply(json!({"x": 1})))
            .on("b", Behavior::Fail("PARSE_ERROR")),
    );
    let config = CompositionConfig::new(CompositionPattern::Parallel)
        .with_requires(RequiresEntry::new("a"))
        .with_requires(RequiresEntry::new("b").optional())
        .with_step(DataflowStep::new("input", vec!["a", "b"]))
        .with_step(
            DataflowStep::new(vec!["a", "b"], "output").with_aggregate(AggregateStrategy::Array),
        );
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("a"))
        .with_module(leaf("b"))
        .with_module(composed("fan", config));

    let outcome = run(&build(loader, &runner), "fan", json!({})).await;

    assert!(outcome.ok);
    // The array shape survives the missing branch.
    assert_eq!(outcome.data(), Some(&json!({"results": [{"x": 1}]})));
    assert!(!outcome.module_results["b"].ok);
}

#[tokio::test]
async fn test_parallel_required_failure_aborts_after_join() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", Behavior::Fail("SCHEMA_VIOLATION"))
            .on("b", Behavior::Delay(30, ModuleResult::success(json!({"y": 2})))),
    );
    let config = CompositionConfig::new(CompositionPattern::Parallel)
        .with_requires(RequiresEntry::new("a"))
        .with_requires(RequiresEntry::new("b"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("a"))
        .with_module(leaf("b"))
        .with_module(composed("fan", config));

    let outcome = run(&build(loader, &runner), "fan", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("SCHEMA_VIOLATION"));
    // The sibling settled and was kept for diagnosis.
    assert!(outcome.module_results["b"].ok);
    assert_eq!(outcome.trace.len(), 2);
}

// ============================================================================
// Conditional
// ============================================================================

fn routed(confidence: f64) -> (Orchestrator, Arc<ScriptedRunner>) {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("classify", reply_with_confidence(json!({"label": "invoice"}), confidence))
            .on("careful", reply(json!({"path": "careful"})))
            .on("fast", reply(json!({"path": "fast"}))),
    );
    let config = CompositionConfig::new(CompositionPattern::Conditional)
        .with_requires(RequiresEntry::new("classify"))
        .with_requires(RequiresEntry::new("fast"))
        .with_requires(RequiresEntry::new("careful"))
        .with_step(DataflowStep::new("input", "classify"))
        .with_step(DataflowStep::new("classify", "fast"))
        .with_step(DataflowStep::new("classify", "careful"))
        .with_route(RoutingRule::new("$.meta.confidence > 0.8", Some("fast")))
        .with_route(RoutingRule::new("true", Some("careful")));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("classify"))
        .with_module(leaf("fast"))
        .with_module(leaf("careful"))
        .with_module(composed("router", config));
    (build(loader, &runner), runner)
}

#[tokio::test]
async fn test_conditional_high_confidence_branch() {
    let (orchestrator, runner) = routed(0.9);
    let outcome = run(&orchestrator, "router", json!({"doc": "x"})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("fast"), 1);
    assert_eq!(runner.count("careful"), 0);
    assert_eq!(runner.inputs("fast"), vec![json!({"label": "invoice"})]);
    assert_eq!(outcome.data(), Some(&json!({"path": "fast"})));
    assert!(outcome.trace.iter().any(|e| e.module == "careful" && e.skipped));
}

#[tokio::test]
async fn test_conditional_low_confidence_inverts_branch() {
    let (orchestrator, runner) = routed(0.8);
    let outcome = run(&orchestrator, "router", json!({"doc": "x"})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("fast"), 0);
    assert_eq!(runner.count("careful"), 1);
    assert_eq!(outcome.data(), Some(&json!({"path": "careful"})));
}

#[tokio::test]
async fn test_conditional_null_next_keeps_classifier_result() {
    let runner = Arc::new(ScriptedRunner::new().on("classify", reply(json!({"label": "spam"}))));
    let config = CompositionConfig::new(CompositionPattern::Conditional)
        .with_requires(RequiresEntry::new("classify"))
        .with_requires(RequiresEntry::new("handle"))
        .with_route(RoutingRule::new("$.data.label == \"spam\"", None))
        .with_route(RoutingRule::new("true", Some("handle")));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("classify"))
        .with_module(leaf("handle"))
        .with_module(composed("filter", config));

    let outcome = run(&build(loader, &runner), "filter", json!({"mail": "..."})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("classify"), 1);
    assert_eq!(runner.count("handle"), 0);
    assert_eq!(outcome.data(), Some(&json!({"label": "spam"})));
}

// ============================================================================
// Iterative
// ============================================================================

fn iterative(
    max_iterations: u32,
    continue_condition: Option<&str>,
    stop_condition: Option<&str>,
) -> CompositionConfig {
    CompositionConfig::new(CompositionPattern::Iterative)
        .with_requires(RequiresEntry::new("refine"))
        .with_iteration(IterationConfig {
            max_iterations,
            continue_condition: continue_condition.map(str::to_string),
            stop_condition: stop_condition.map(str::to_string),
        })
}

#[tokio::test]
async fn test_iterative_halts_at_max_iterations() {
    let runner = Arc::new(ScriptedRunner::new());
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("refine"))
        .with_module(composed("loop", iterative(3, Some("true"), None)));

    let outcome = run(&build(loader, &runner), "loop", json!({"draft": "v0"})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("refine"), 3);
    assert_eq!(outcome.trace.len(), 3);
}

#[tokio::test]
async fn test_iterative_stop_condition() {
    let runner = Arc::new(ScriptedRunner::new().on("refine", reply(json!({"done": true}))));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("refine"))
        .with_module(composed("loop", iterative(5, None, Some("$.data.done == true"))));

    let outcome = run(&build(loader, &runner), "loop", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(runner.count("refine"), 1);
}

#[tokio::test]
async fn test_iterative_feeds_result_forward() {
    let runner = Arc::new(ScriptedRunner::new().on("refine", reply(json!({"score": 0.4}))));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("refine"))
        .with_module(composed("loop", iterative(2, Some("$.data.score < 0.9"), None)));

    let outcome = run(&build(loader, &runner), "loop", json!({"text": "draft"})).await;

    assert!(outcome.ok);
    assert_eq!(
        runner.inputs("refine"),
        vec![json!({"text": "draft"}), json!({"text": "draft", "score": 0.4})]
    );
    assert_eq!(outcome.data(), Some(&json!({"score": 0.4})));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_nonexistent_module() {
    let runner = Arc::new(ScriptedRunner::new());
    let orchestrator = build(MemoryModuleLoader::new(), &runner);

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        run(&orchestrator, "nonexistent-module", json!({})),
    )
    .await
    .expect("execute should return promptly");

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("MODULE_NOT_FOUND"));
    assert!(outcome.trace.is_empty());
    assert!(outcome.module_results.is_empty());
    assert!(outcome.result.is_none());
}

#[tokio::test]
async fn test_missing_dependency() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("ghost"));
    let loader = MemoryModuleLoader::new().with_module(composed("outer", config));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("MODULE_NOT_FOUND"));
    assert_eq!(outcome.trace.len(), 1);
    assert!(!outcome.trace[0].success);
}

#[tokio::test]
async fn test_fallback_receives_identical_input() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("primary", Behavior::Fail("LLM_ERROR"))
            .on("backup", reply(json!({"source": "backup"}))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("primary").with_fallback("backup"))
        .with_requires(RequiresEntry::new("finish"))
        .with_step(DataflowStep::new("input", "primary").with_mapping([("q", "$.question")]))
        .with_step(DataflowStep::new("primary", "finish"))
        .with_step(DataflowStep::new("finish", "output"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("primary"))
        .with_module(leaf("backup"))
        .with_module(leaf("finish"))
        .with_module(composed("robust", config));

    let outcome = run(&build(loader, &runner), "robust", json!({"question": "why?"})).await;

    assert!(outcome.ok, "{:?}", outcome.error);
    assert_eq!(runner.inputs("primary"), vec![json!({"q": "why?"})]);
    assert_eq!(runner.inputs("backup"), runner.inputs("primary"));
    // Downstream consumers see the fallback's result in the primary's slot.
    assert_eq!(runner.inputs("finish"), vec![json!({"source": "backup"})]);
    assert_eq!(outcome.data(), Some(&json!({"source": "backup"})));
    assert!(!outcome.module_results["primary"].ok);
    assert!(outcome.module_results["backup"].ok);
}

#[tokio::test]
async fn test_required_failure_aborts_and_keeps_partial_results() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("first", reply(json!({"a": 1})))
            .on("second", Behavior::Fail("SCHEMA_VIOLATION")),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("first"))
        .with_requires(RequiresEntry::new("second"))
        .with_requires(RequiresEntry::new("third"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("first"))
        .with_module(leaf("second"))
        .with_module(leaf("third"))
        .with_module(composed("chain", config));

    let outcome = run(&build(loader, &runner), "chain", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("SCHEMA_VIOLATION"));
    assert_eq!(runner.count("third"), 0);
    assert_eq!(outcome.module_results.len(), 2);
    assert_eq!(outcome.trace.len(), 2);
}

#[tokio::test]
async fn test_optional_dependency_failure_continues() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("enrich", Behavior::Fail("PROVIDER_ERROR"))
            .on("summarize", reply(json!({"summary": "ok"}))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("enrich").optional())
        .with_requires(RequiresEntry::new("annotate"))
        .with_requires(RequiresEntry::new("summarize"))
        .with_step(DataflowStep::new("input", "enrich"))
        .with_step(DataflowStep::new("enrich", "annotate"))
        .with_step(DataflowStep::new("input", "summarize"))
        .with_step(DataflowStep::new("summarize", "output"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("enrich"))
        .with_module(leaf("annotate"))
        .with_module(leaf("summarize"))
        .with_module(composed("report", config));

    let outcome = run(&build(loader, &runner), "report", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(outcome.data(), Some(&json!({"summary": "ok"})));
    assert!(!outcome.module_results["enrich"].ok);
    assert_eq!(runner.count("annotate"), 0);
    assert!(outcome.trace.iter().any(|e| e.module == "annotate" && e.skipped));
    assert!(outcome.trace.iter().any(|e| e.module == "enrich" && !e.success));
}

#[tokio::test]
async fn test_dependency_timeout() {
    let runner = Arc::new(
        ScriptedRunner::new().on("slow", Behavior::Delay(2_000, ModuleResult::success(json!({})))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("slow").with_timeout_ms(50));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("slow"))
        .with_module(composed("outer", config));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("TIMEOUT"));
    assert!(outcome.total_time_ms < 1_000);
    assert_eq!(outcome.module_results["slow"].error_code(), Some("TIMEOUT"));
}

#[tokio::test]
async fn test_timed_out_dependency_uses_fallback() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("slow", Behavior::Delay(2_000, ModuleResult::success(json!({"from": "slow"}))))
            .on("quick", reply(json!({"from": "quick"}))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential).with_requires(
        RequiresEntry::new("slow")
            .with_timeout_ms(50)
            .with_fallback("quick"),
    );
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("slow"))
        .with_module(leaf("quick"))
        .with_module(composed("outer", config));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(outcome.ok);
    assert_eq!(outcome.data(), Some(&json!({"from": "quick"})));
}

#[tokio::test]
async fn test_whole_run_timeout_keeps_partial_progress() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("fast", reply(json!({"a": 1})))
            .on("slow", Behavior::Delay(2_000, ModuleResult::success(json!({})))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("fast"))
        .with_requires(RequiresEntry::new("slow"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("fast"))
        .with_module(leaf("slow"))
        .with_module(composed("outer", config));

    let outcome = build(loader, &runner)
        .execute("outer", json!({}), ExecuteOptions::new().with_timeout_ms(100))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("TIMEOUT"));
    assert!(outcome.module_results["fast"].ok);
    assert!(outcome.trace.iter().any(|e| e.module == "fast" && e.success));
    assert!(outcome.total_time_ms < 1_000);

    // The step cut off by the deadline is recorded as attempted.
    assert_eq!(runner.count("slow"), 1);
    let slow = outcome.trace.iter().find(|e| e.module == "slow").unwrap();
    assert!(!slow.success);
    assert_eq!(slow.error.as_deref(), Some("TIMEOUT"));
    assert_eq!(outcome.module_results["slow"].error_code(), Some("TIMEOUT"));
}

#[tokio::test]
async fn test_composition_timeout() {
    let runner = Arc::new(
        ScriptedRunner::new().on("slow", Behavior::Delay(2_000, ModuleResult::success(json!({})))),
    );
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("slow"))
        .with_timeout_ms(50);
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("slow"))
        .with_module(composed("outer", config));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("TIMEOUT"));
    assert_eq!(outcome.trace.len(), 1);
    assert_eq!(outcome.trace[0].module, "slow");
    assert!(!outcome.trace[0].success);
    assert!(!outcome.module_results["slow"].ok);
}

#[tokio::test]
async fn test_entry_leaf_timeout_is_traced() {
    let runner = Arc::new(
        ScriptedRunner::new().on("slow", Behavior::Delay(2_000, ModuleResult::success(json!({})))),
    );
    let loader = MemoryModuleLoader::new().with_module(leaf("slow"));

    let outcome = build(loader, &runner)
        .execute("slow", json!({}), ExecuteOptions::new().with_timeout_ms(50))
        .await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("TIMEOUT"));
    assert_eq!(outcome.trace.len(), 1);
    assert!(!outcome.trace[0].success);
    assert_eq!(outcome.module_results["slow"].error_code(), Some("TIMEOUT"));
}

#[tokio::test]
async fn test_max_depth_exceeded() {
    let runner = Arc::new(ScriptedRunner::new());
    let mut loader = MemoryModuleLoader::new().with_module(leaf("bottom"));
    for level in 0..6 {
        let next = if level == 5 { "bottom".to_string() } else { format!("level-{}", level + 1) };
        let config = CompositionConfig::new(CompositionPattern::Sequential)
            .with_requires(RequiresEntry::new(next));
        loader = loader.with_module(composed(&format!("level-{}", level), config));
    }
    let orchestrator = build(loader, &runner);

    let outcome = orchestrator
        .execute("level-0", json!({}), ExecuteOptions::new().with_max_depth(2))
        .await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("MAX_DEPTH_EXCEEDED"));
    assert_eq!(runner.count("bottom"), 0);

    let outcome = run(&orchestrator, "level-0", json!({})).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("MAX_DEPTH_EXCEEDED"));

    let outcome = orchestrator
        .execute("level-0", json!({}), ExecuteOptions::new().with_max_depth(6))
        .await;
    assert!(outcome.ok, "{:?}", outcome.error);
    assert_eq!(runner.count("bottom"), 1);
}

#[tokio::test]
async fn test_circular_dependency_terminates() {
    let runner = Arc::new(ScriptedRunner::new());
    let a = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("b"));
    let b = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("a"));
    let loader = MemoryModuleLoader::new()
        .with_module(composed("a", a))
        .with_module(composed("b", b));

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        run(&build(loader, &runner), "a", json!({})),
    )
    .await
    .expect("cycle must terminate");

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("CIRCULAR_DEPENDENCY"));
    assert!(outcome.error.unwrap().message.contains("a -> b -> a"));
}

#[tokio::test]
async fn test_version_mismatch() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("parser").with_version("^1.0.0"));
    let loader = MemoryModuleLoader::new()
        .with_module(ModuleDefinition::leaf("parser", "2.0.0"))
        .with_module(composed("outer", config));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("VERSION_MISMATCH"));
    assert_eq!(runner.count("parser"), 0);
}

#[tokio::test]
async fn test_invalid_composition() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = CompositionConfig::new(CompositionPattern::Iterative)
        .with_requires(RequiresEntry::new("refine"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("refine"))
        .with_module(composed("loop", config));

    let outcome = run(&build(loader, &runner), "loop", json!({})).await;

    assert!(!outcome.ok);
    assert_eq!(outcome.error_code(), Some("INVALID_COMPOSITION"));
    assert_eq!(runner.count("refine"), 0);
}

// ============================================================================
// Nesting
// ============================================================================

#[tokio::test]
async fn test_nested_composition_shares_trace() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("a", reply(json!({"a": 1})))
            .on("b", reply(json!({"b": 2}))),
    );
    let inner = CompositionConfig::new(CompositionPattern::Parallel)
        .with_requires(RequiresEntry::new("a"))
        .with_requires(RequiresEntry::new("b"));
    let outer = CompositionConfig::new(CompositionPattern::Sequential)
        .with_requires(RequiresEntry::new("inner"))
        .with_requires(RequiresEntry::new("publish"));
    let loader = MemoryModuleLoader::new()
        .with_module(leaf("a"))
        .with_module(leaf("b"))
        .with_module(leaf("publish"))
        .with_module(composed("inner", inner))
        .with_module(composed("outer", outer));

    let outcome = run(&build(loader, &runner), "outer", json!({})).await;

    assert!(outcome.ok, "{:?}", outcome.error);
    assert_eq!(runner.inputs("publish"), vec![json!({"a": 1, "b": 2})]);

    let mut keys: Vec<_> = outcome.module_results.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["inner", "publish"]);

    assert_eq!(outcome.trace.len(), 4);
    let depth_of = |name: &str| outcome.trace.iter().find(|e| e.module == name).unwrap().depth;
    assert_eq!(depth_of("inner"), 1);
    assert_eq!(depth_of("a"), 2);
    assert!(outcome
        .trace
        .windows(2)
        .all(|w| w[0].start_time <= w[1].start_time));
}
