//! Collaborator interfaces consumed by the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::module::ModuleDefinition;
use crate::result::ModuleResult;

/// Opaque backend handle. The orchestrator only passes it through to the runner.
pub trait Provider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;
}

/// Shared provider handle.
pub type ProviderHandle = Arc<dyn Provider>;

/// Resolves module names to definitions.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Find a module by name. `Ok(None)` means the module does not exist.
    async fn find_module(
        &self,
        name: &str,
        search_paths: &[PathBuf],
    ) -> Result<Option<ModuleDefinition>, ProtocolError>;
}

/// Executes a single leaf module and returns its envelope.
///
/// Validation and repair of the envelope are the runner's concern. The
/// orchestrator inspects only `ok`.
#[async_trait]
pub trait ModuleRunner: Send + Sync {
    async fn run_module(
        &self,
        module: &ModuleDefinition,
        provider: &ProviderHandle,
        input: &Value,
    ) -> Result<ModuleResult, ProtocolError>;
}
