use async_trait::async_trait;

use super::{ExecutionContext, StageError, StageKind, StageOutput};
use crate::pipeline::import::DocumentHandle;

/// One step of the analysis pipeline.
///
/// `prior` holds the outputs of every earlier stage of the same run, in order.
#[async_trait]
pub trait AnalysisStage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(
        &self,
        handle: &DocumentHandle,
        query: &str,
        prior: &[StageOutput],
        ctx: &ExecutionContext,
    ) -> Result<StageOutput, StageError>;
}
