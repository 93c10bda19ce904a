//! Orchestrator driver - resolves modules and runs compositions.

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use modweave_config::OrchestratorConfig;
use modweave_protocols::{
    CompositionPattern, ModuleDefinition, ModuleLoader, ModuleResult, ModuleRunner,
    ProviderHandle, ResultError,
};

use crate::context::ExecutionContext;
use crate::error::CompositionError;
use crate::patterns::CompositionScope;
use crate::types::{ExecuteOptions, OrchestrationResult, ResultStore};
use crate::validation::validate_composition;
use crate::version::version_matches;

/// Error code for runner calls that returned `Err`.
pub const RUNNER_ERROR: &str = "RUNNER_ERROR";

/// Error code for a failed envelope that carried no error of its own.
pub const MODULE_FAILED: &str = "MODULE_FAILED";

/// Result of invoking one dependency with fallback and optional handling.
#[derive(Debug)]
pub(crate) enum DependencyOutcome {
    /// The dependency, or its fallback, succeeded.
    Completed(ModuleResult),
    /// An optional dependency failed; downstream treats it as missing.
    Absent,
    /// A required dependency failed.
    Aborted(CompositionError),
}

/// Composition orchestrator.
///
/// Holds no state across `execute()` calls besides its collaborators and config.
pub struct Orchestrator {
    loader: Arc<dyn ModuleLoader>,
    runner: Arc<dyn ModuleRunner>,
    provider: ProviderHandle,
    config: OrchestratorConfig,
    /// Caps concurrent runner calls.
    limiter: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    /// Create an orchestrator with default configuration.
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        runner: Arc<dyn ModuleRunner>,
        provider: ProviderHandle,
    ) -> Self {
        Self {
            loader,
            runner,
            provider,
            config: OrchestratorConfig::default(),
            limiter: None,
        }
    }

    /// Apply configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.limiter = match config.max_concurrency {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute a module by name. Failures are reported in the result, never
    /// as a panic or `Err`.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        options: ExecuteOptions,
    ) -> OrchestrationResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let max_depth = options.max_depth.unwrap_or(self.config.max_depth);
        let budget = options.timeout_ms.or(self.config.timeout_ms);
        let ctx = ExecutionContext::root(max_depth, options.observer.clone());
        let store = ResultStore::new();
        let span = info_span!("execute", run_id = %run_id, module = name);

        let outcome = async {
            info!("Executing module {} (max depth {})", name, max_depth);
            let run = self.execute_module(name, input, None, &ctx, &store);
            match budget {
                Some(timeout_ms) => {
                    match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!("Module {} timed out after {}ms", name, timeout_ms);
                            Err(CompositionError::Timeout {
                                module: name.to_string(),
                                timeout_ms,
                            })
                        }
                    }
                }
                None => run.await,
            }
        }
        .instrument(span)
        .await;

        let (ok, result, error) = match outcome {
            Ok(result) => {
                let error = if result.ok {
                    None
                } else {
                    Some(result.error.clone().unwrap_or_else(|| {
                        ResultError::new(MODULE_FAILED, format!("Module '{}' failed", name))
                    }))
                };
                (result.ok, Some(result), error)
            }
            Err(e) => {
                error!("Module {} failed: {}", name, e);
                (false, None, Some(e.to_result_error()))
            }
        };

        let total_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Module {} finished: ok={} in {}ms (run {})",
            name, ok, total_time_ms, run_id
        );

        OrchestrationResult {
            run_id,
            ok,
            result,
            module_results: store.snapshot(),
            trace: ctx.trace.snapshot(),
            total_time_ms,
            error,
        }
    }

    /// Resolve and run one module (boxed for recursion).
    pub(crate) fn execute_module<'a>(
        &'a self,
        name: &'a str,
        input: Value,
        required_version: Option<&'a str>,
        ctx: &'a ExecutionContext,
        store: &'a ResultStore,
    ) -> Pin<Box<dyn Future<Output = Result<ModuleResult, CompositionError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(chain) = ctx.cycle_through(name) {
                warn!("Circular dependency detected: {}", chain);
                return Err(CompositionError::CircularDependency(chain));
            }
            if ctx.depth > ctx.max_depth {
                warn!("Maximum depth {} exceeded at {}", ctx.max_depth, name);
                return Err(CompositionError::MaxDepthExceeded {
                    module: name.to_string(),
                    max_depth: ctx.max_depth,
                });
            }

            let module = self.resolve(name).await?;

            if let Some(required) = required_version {
                if !version_matches(&module.version, required) {
                    warn!(
                        "Module {} version {} does not satisfy {}",
                        name, module.version, required
                    );
                    return Err(CompositionError::VersionMismatch {
                        module: name.to_string(),
                        actual: module.version.clone(),
                        required: required.to_string(),
                    });
                }
            }

            match &module.composition {
                None => Ok(self.run_leaf(&module, &input, ctx, store).await),
                Some(config) => {
                    let report = validate_composition(config);
                    for warning in &report.warnings {
                        warn!("Composition {}: {}", name, warning);
                    }
                    if !report.is_valid() {
                        return Err(CompositionError::InvalidComposition {
                            module: name.to_string(),
                            reason: report.error_summary(),
                        });
                    }

                    let scope = CompositionScope {
                        module: name,
                        config,
                        input,
                        ctx: ctx.descend(name),
                        store,
                    };
                    let run = self.run_pattern(&scope);
                    match config.timeout_ms {
                        Some(timeout_ms) => {
                            tokio::time::timeout(Duration::from_millis(timeout_ms), run)
                                .await
                                .unwrap_or_else(|_| {
                                    warn!("Composition {} timed out after {}ms", name, timeout_ms);
                                    Err(CompositionError::Timeout {
                                        module: name.to_string(),
                                        timeout_ms,
                                    })
                                })
                        }
                        None => run.await,
                    }
                }
            }
        })
    }

    async fn resolve(&self, name: &str) -> Result<ModuleDefinition, CompositionError> {
        match self.loader.find_module(name, &self.config.search_paths).await {
            Ok(Some(module)) => Ok(module),
            Ok(None) => {
                warn!("Module not found: {}", name);
                Err(CompositionError::ModuleNotFound(name.to_string()))
            }
            Err(e) => {
                warn!("Failed to load module {}: {}", name, e);
                Err(CompositionError::ModuleNotFound(name.to_string()))
            }
        }
    }

    async fn run_leaf(
        &self,
        module: &ModuleDefinition,
        input: &Value,
        ctx: &ExecutionContext,
        store: &ResultStore,
    ) -> ModuleResult {
        // The entry module has no enclosing composition to record it.
        let step = ctx.is_root().then(|| ctx.begin_step(&module.name, store));
        let _permit = match &self.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };

        debug!("Running leaf module {}@{}", module.name, module.version);
        let result = match self.runner.run_module(module, &self.provider, input).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Runner failed for {}: {}", module.name, e);
                ModuleResult::failure(RUNNER_ERROR, e.to_string())
            }
        };

        if let Some(step) = step {
            step.finish(&result);
        }
        result
    }

    async fn run_pattern(
        &self,
        scope: &CompositionScope<'_>,
    ) -> Result<ModuleResult, CompositionError> {
        info!(
            "Running {} composition {} at depth {}",
            scope.config.pattern.as_str(),
            scope.module,
            scope.ctx.depth
        );
        match scope.config.pattern {
            CompositionPattern::Sequential => self.run_sequential(scope).await,
            CompositionPattern::Parallel => self.run_parallel(scope).await,
            CompositionPattern::Conditional => self.run_conditional(scope).await,
            CompositionPattern::Iterative => self.run_iterative(scope).await,
        }
    }

    /// Run one dependency under its time budget and record it. A dependency
    /// cut off by an enclosing deadline is still recorded, as a `TIMEOUT`.
    ///
    /// Nested compositions get their own result store; only direct
    /// dependencies land in `scope.store`.
    pub(crate) async fn call_dependency(
        &self,
        scope: &CompositionScope<'_>,
        name: &str,
        input: Value,
    ) -> ModuleResult {
        let entry = scope.config.requires_entry(name);
        let required_version = entry.and_then(|e| e.version.as_deref());
        let budget = entry
            .and_then(|e| e.timeout_ms)
            .or(self.config.dependency_timeout_ms);

        scope.ctx.step_started(name);
        debug!("Invoking dependency {} from {}", name, scope.module);

        let step = scope.ctx.begin_step(name, scope.store);
        let nested = ResultStore::new();
        let run = self.execute_module(name, input, required_version, &scope.ctx, &nested);
        let outcome = match budget {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), run)
                .await
                .unwrap_or_else(|_| {
                    warn!("Dependency {} timed out after {}ms", name, timeout_ms);
                    Err(CompositionError::Timeout {
                        module: name.to_string(),
                        timeout_ms,
                    })
                }),
            None => run.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                debug!("Dependency {} failed: {}", name, e);
                e.to_module_result()
            }
        };

        step.finish(&result);
        result
    }

    /// Invoke a dependency, substituting its fallback or tolerating an
    /// optional failure.
    pub(crate) async fn invoke_dependency(
        &self,
        scope: &CompositionScope<'_>,
        name: &str,
        input: Value,
    ) -> DependencyOutcome {
        let entry = scope.config.requires_entry(name);
        let fallback = entry.and_then(|e| e.fallback.as_deref());
        let fallback_input = fallback.map(|_| input.clone());

        let primary = self.call_dependency(scope, name, input).await;
        if primary.ok {
            return DependencyOutcome::Completed(primary);
        }

        if let (Some(fallback), Some(fallback_input)) = (fallback, fallback_input) {
            info!("Dependency {} failed, invoking fallback {}", name, fallback);
            let substitute = self.call_dependency(scope, fallback, fallback_input).await;
            if substitute.ok {
                return DependencyOutcome::Completed(substitute);
            }
            warn!("Fallback {} for {} also failed", fallback, name);
        }

        if entry.is_some_and(|e| e.optional) {
            info!("Optional dependency {} failed, continuing without it", name);
            return DependencyOutcome::Absent;
        }

        let error = primary.error.unwrap_or_else(|| {
            ResultError::new(MODULE_FAILED, format!("Dependency '{}' failed", name))
        });
        error!("Required dependency {} failed: {}", name, error);
        DependencyOutcome::Aborted(CompositionError::DependencyFailed {
            module: name.to_string(),
            error,
        })
    }
}
