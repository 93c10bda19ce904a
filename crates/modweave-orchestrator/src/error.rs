//! Composition error taxonomy.

use thiserror::Error;

use modweave_protocols::{ModuleResult, ResultError};

/// Composition-level failure. Distinct from the error codes a runner puts
/// into a module envelope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompositionError {
    /// Entry module or a dependency could not be resolved.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// A dependency names one of its own ancestors.
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// Nesting went deeper than allowed.
    #[error("Maximum composition depth {max_depth} exceeded at module '{module}'")]
    MaxDepthExceeded { module: String, max_depth: usize },

    /// A dependency or whole-run budget elapsed.
    #[error("Module '{module}' timed out after {timeout_ms}ms")]
    Timeout { module: String, timeout_ms: u64 },

    /// Resolved dependency does not satisfy the declared requirement.
    #[error("Module '{module}' version {actual} does not satisfy '{required}'")]
    VersionMismatch {
        module: String,
        actual: String,
        required: String,
    },

    /// Composition config failed validation.
    #[error("Invalid composition for '{module}': {reason}")]
    InvalidComposition { module: String, reason: String },

    /// A required dependency failed and no fallback recovered it.
    #[error("Dependency '{module}' failed: {error}")]
    DependencyFailed { module: String, error: ResultError },
}

impl CompositionError {
    /// Stable wire code.
    pub fn code(&self) -> &str {
        match self {
            CompositionError::ModuleNotFound(_) => "MODULE_NOT_FOUND",
            CompositionError::CircularDependency(_) => "CIRCULAR_DEPENDENCY",
            CompositionError::MaxDepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
            CompositionError::Timeout { .. } => "TIMEOUT",
            CompositionError::VersionMismatch { .. } => "VERSION_MISMATCH",
            CompositionError::InvalidComposition { .. } => "INVALID_COMPOSITION",
            CompositionError::DependencyFailed { error, .. } => &error.code,
        }
    }

    /// Error payload surfaced to callers. A failed dependency surfaces its own error.
    pub fn to_result_error(&self) -> ResultError {
        match self {
            CompositionError::DependencyFailed { error, .. } => error.clone(),
            other => ResultError::new(other.code(), other.to_string()),
        }
    }

    /// Failure envelope carrying this error.
    pub fn to_module_result(&self) -> ModuleResult {
        let error = self.to_result_error();
        ModuleResult::failure(error.code, error.message)
    }
}
