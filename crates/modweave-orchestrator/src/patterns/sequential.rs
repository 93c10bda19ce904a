//! Sequential pattern: dataflow steps run one after another.

use modweave_protocols::ModuleResult;

use super::{CompositionScope, FanOut};
use crate::error::CompositionError;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    pub(crate) async fn run_sequential(
        &self,
        scope: &CompositionScope<'_>,
    ) -> Result<ModuleResult, CompositionError> {
        self.run_dataflow(scope, FanOut::Serial).await
    }
}
