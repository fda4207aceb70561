pub mod api;
pub mod config;
pub mod db;
pub mod pipeline;
pub mod registry;

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::config::AppConfig;
use crate::pipeline::extraction::PdfTextReader;
use crate::pipeline::import::DocumentStore;
use crate::pipeline::llm::{LlmError, OpenAiClient};
use crate::pipeline::scheduler::PanicHook;
use crate::pipeline::stages::{standard_stages, ExecutionContext};
use crate::pipeline::{BackgroundScheduler, FsResultArchive, PipelineOrchestrator};
use crate::registry::{RegistryError, SqliteTaskRegistry, TaskRegistry, TaskStatus};

/// Anything that stops the service from coming up (or shutting down cleanly).
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to build async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Task registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    #[error("Language model client: {0}")]
    Llm(#[from] LlmError),

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(std::io::Error),
}

/// Process entry point: logging, runtime, then the HTTP service until Ctrl-C.
pub fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    runtime.block_on(serve_app(config))
}

async fn serve_app(config: AppConfig) -> Result<(), StartupError> {
    if config.llm.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set, reasoning calls will be unauthenticated");
    }

    let registry: Arc<dyn TaskRegistry> = Arc::new(SqliteTaskRegistry::open(&config.database_path)?);
    tracing::info!(path = %config.database_path.display(), "Task registry opened");

    let documents = Arc::new(DocumentStore::new(&config.data_dir, config.max_upload_bytes));
    let purged = documents.purge_orphans();
    if purged > 0 {
        tracing::info!(count = purged, "Removed staged documents left by a previous run");
    }

    let ctx = ExecutionContext::new(
        Arc::new(OpenAiClient::new(&config.llm)?),
        Arc::new(PdfTextReader),
        config.stage_limits,
    );
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        standard_stages(),
        registry.clone(),
        Arc::new(FsResultArchive::new(&config.output_dir)),
        ctx,
    ));

    let (scheduler, scheduler_handle) = BackgroundScheduler::start(Some(panic_hook(registry.clone())));

    let app = api::api_router(ApiContext::new(
        registry,
        documents,
        orchestrator,
        Arc::new(scheduler),
    ));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_addr,
            source,
        })?;

    let served = api::serve(listener, app, api::server::ctrl_c()).await;

    tracing::info!("Waiting for in-flight analyses to finish");
    scheduler_handle.shutdown().await;

    served.map_err(StartupError::Server)
}

/// A panicking run never reaches its own terminal write, so record the failure here.
fn panic_hook(registry: Arc<dyn TaskRegistry>) -> PanicHook {
    Arc::new(move |task_id: &str, message: &str| {
        registry.update_result(
            task_id,
            &format!("pipeline aborted: {message}"),
            None,
            TaskStatus::Failed,
        );
    })
}
