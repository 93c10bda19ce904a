//! # Modweave Orchestrator
//!
//! Executes module compositions: declarative workflows that chain, fan out,
//! branch or iterate calls to independently versioned modules.
//!
//! ## Components
//!
//! - [`evaluate_json_path`] / [`evaluate_condition`] - path queries and routing conditions
//! - [`apply_mapping`] - field projection between steps
//! - [`aggregate_results`] - merge, array and first strategies
//! - [`version_matches`] - semantic version requirements
//! - [`validate_composition`] - static checks before a composition runs
//! - [`Orchestrator`] - the driver and its four pattern executors
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(loader, runner, provider)
//!     .with_config(config.orchestrator);
//! let outcome = orchestrator
//!     .execute("summarize-report", json!({"text": "..."}), ExecuteOptions::default())
//!     .await;
//! if !outcome.ok {
//!     eprintln!("{:?}", outcome.error);
//! }
//! ```

pub mod aggregate;
pub mod dataflow;
pub mod error;
pub mod expression;
pub mod orchestrator;
pub mod registry;
pub mod trace;
pub mod types;
pub mod validation;
pub mod version;

mod context;
mod patterns;

pub use aggregate::{aggregate_results, EMPTY_AGGREGATION};
pub use dataflow::{apply_mapping, build_step_input};
pub use error::CompositionError;
pub use expression::{check_condition_syntax, evaluate_condition, evaluate_json_path};
pub use orchestrator::{Orchestrator, MODULE_FAILED, RUNNER_ERROR};
pub use registry::MemoryModuleLoader;
pub use trace::{ExecutionObserver, TraceEntry, TraceRecorder};
pub use types::{ExecuteOptions, OrchestrationResult};
pub use validation::{validate_composition, CompositionIssue, CompositionReport};
pub use version::{is_valid_requirement, version_matches, SemVer};
