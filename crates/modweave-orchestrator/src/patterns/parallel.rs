//! Parallel pattern: independent steps fan out together and join before
//! any step that reads their results.

use tracing::debug;

use modweave_protocols::ModuleResult;

use super::{CompositionScope, FanOut};
use crate::error::CompositionError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    pub(crate) async fn run_parallel(
        &self,
        scope: &CompositionScope<'_>,
    ) -> Result<ModuleResult, CompositionError> {
        debug!(
            "Fanning out {} dependencies of {}",
            scope.config.requires.len(),
            scope.module
        );
        self.run_dataflow(scope, FanOut::Concurrent).await
    }
}
