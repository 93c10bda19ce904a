//! # Modweave Protocols
//!
//! Core protocol definitions for the modweave composition orchestrator.
//! Contains only data types and collaborator interfaces - no orchestration logic.
//!
//! ## Core Types
//!
//! - [`ModuleResult`] - The `{ok, meta, data|error}` envelope produced by one module run
//! - [`ModuleDefinition`] - A resolved module, optionally carrying a [`CompositionConfig`]
//!
//! ## Collaborator Traits
//!
//! - [`ModuleLoader`] - Resolves module names to definitions
//! - [`ModuleRunner`] - Executes a single leaf module
//! - [`Provider`] - Opaque backend handle passed through to the runner

pub mod error;
pub mod module;
pub mod result;
pub mod traits;

pub use error::ProtocolError;
pub use module::{
    AggregateStrategy, CompositionConfig, CompositionPattern, DataflowStep, IterationConfig,
    ModuleDefinition, RequiresEntry, RoutingRule, StepRef, INPUT_ENDPOINT, OUTPUT_ENDPOINT,
};
pub use result::{ModuleResult, ResultError, ResultMeta, RiskLevel};
pub use traits::{ModuleLoader, ModuleRunner, Provider, ProviderHandle};
