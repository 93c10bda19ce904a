//! # Modweave
//!
//! Composition orchestrator for independently versioned task modules.
//!
//! A module is either a leaf, executed by an external [`ModuleRunner`], or a
//! composition that chains, fans out, branches or iterates over other
//! modules. [`Orchestrator::execute`] runs a module by name and returns an
//! [`OrchestrationResult`] carrying the final envelope, every direct
//! dependency result and a full execution trace.
//!
//! ## Crates
//!
//! - [`protocols`] - envelope and composition types, collaborator traits
//! - [`config`] - TOML configuration with environment expansion
//! - [`orchestrator`] - expression evaluator, aggregation and pattern executors
//!
//! ```ignore
//! let config = ConfigLoader::load(Path::new("modweave.toml"))?;
//! telemetry::init_tracing(&config.logging)?;
//!
//! let orchestrator = Orchestrator::new(loader, runner, provider)
//!     .with_config(config.orchestrator);
//! let outcome = orchestrator
//!     .execute("review-pipeline", input, ExecuteOptions::default())
//!     .await;
//! ```

pub mod telemetry;

pub use modweave_config as config;
pub use modweave_orchestrator as orchestrator;
pub use modweave_protocols as protocols;

pub use modweave_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig, OrchestratorConfig};
pub use modweave_orchestrator::{
    aggregate_results, apply_mapping, evaluate_condition, evaluate_json_path,
    validate_composition, version_matches, CompositionError, ExecuteOptions, ExecutionObserver,
    MemoryModuleLoader, OrchestrationResult, Orchestrator, TraceEntry,
};
pub use modweave_protocols::{
    CompositionConfig, CompositionPattern, ModuleDefinition, ModuleLoader, ModuleResult,
    ModuleRunner, Provider, ProviderHandle,
};
