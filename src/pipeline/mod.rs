pub mod archive;
pub mod extraction;
pub mod import;
pub mod llm;
pub mod orchestrator;
pub mod scheduler;
pub mod stages;

pub use archive::{ArchivalError, FsResultArchive, ResultArchive};
pub use orchestrator::{PipelineOrchestrator, PipelineOutcome};
pub use scheduler::{BackgroundScheduler, SchedulerError, SchedulerHandle};
