use std::sync::Arc;

use crate::pipeline::import::DocumentStore;
use crate::pipeline::{BackgroundScheduler, PipelineOrchestrator};
use crate::registry::TaskRegistry;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiContext {
    pub registry: Arc<dyn TaskRegistry>,
    pub documents: Arc<DocumentStore>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub scheduler: Arc<BackgroundScheduler>,
}

impl ApiContext {
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        documents: Arc<DocumentStore>,
        orchestrator: Arc<PipelineOrchestrator>,
        scheduler: Arc<BackgroundScheduler>,
    ) -> Self {
        Self {
            registry,
            documents,
            orchestrator,
            scheduler,
        }
    }
}
