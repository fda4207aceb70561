//! PipelineOrchestrator: runs the analysis stages for one task and records the outcome.
//!
//! Stages run strictly in order, each seeing the outputs of the ones before it.
//! The first stage error ends the run. Archival and the registry write are
//! independent: a failure in one is logged and never blocks the other.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};

use super::archive::{ArchiveEntry, ResultArchive};
use super::import::DocumentHandle;
use super::stages::{AnalysisStage, ExecutionContext, StageError, StageKind, StageOutput};
use crate::registry::{TaskRegistry, TaskStatus};

/// How a run ended, as recorded in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed {
        analysis: Value,
        output_path: Option<String>,
    },
    Failed {
        stage: StageKind,
        error: String,
    },
}

pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn AnalysisStage>>,
    registry: Arc<dyn TaskRegistry>,
    archive: Arc<dyn ResultArchive>,
    ctx: ExecutionContext,
}

impl PipelineOrchestrator {
    pub fn new(
        stages: Vec<Arc<dyn AnalysisStage>>,
        registry: Arc<dyn TaskRegistry>,
        archive: Arc<dyn ResultArchive>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            stages,
            registry,
            archive,
            ctx,
        }
    }

    /// Run every stage for `task_id` and record the result.
    ///
    /// Consumes the document handle. The staged file is removed before the
    /// terminal write, or while unwinding.
    pub async fn run(
        &self,
        task_id: &str,
        query: &str,
        handle: DocumentHandle,
        filename: &str,
    ) -> PipelineOutcome {
        let start = Instant::now();
        self.registry.mark_running(task_id);
        tracing::info!(task_id, filename, stages = self.stages.len(), "Pipeline started");

        let stages = self.run_stages(task_id, query, &handle).await;
        // A task observed as terminal no longer has a staged file.
        drop(handle);

        let outcome = match stages {
            Ok(outputs) => self.complete(task_id, query, filename, outputs).await,
            Err(failure) => self.fail(task_id, query, filename, failure).await,
        };

        tracing::info!(
            task_id,
            completed = matches!(outcome, PipelineOutcome::Completed { .. }),
            duration_ms = start.elapsed().as_millis() as u64,
            "Pipeline finished"
        );
        outcome
    }

    async fn run_stages(
        &self,
        task_id: &str,
        query: &str,
        handle: &DocumentHandle,
    ) -> Result<Vec<StageOutput>, StageFailure> {
        let mut outputs: Vec<StageOutput> = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let kind = stage.kind();
            let stage_start = Instant::now();

            let output = match stage.execute(handle, query, &outputs, &self.ctx).await {
                Ok(output) => output,
                Err(error) => {
                    return Err(StageFailure {
                        stage: kind,
                        error,
                        completed: outputs,
                    })
                }
            };

            if output.is_negative_verification() {
                let status = output
                    .payload
                    .get("verification_status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                tracing::warn!(
                    task_id,
                    stage = %kind,
                    status,
                    "Document did not pass verification, continuing analysis"
                );
            }

            tracing::debug!(
                task_id,
                stage = %kind,
                duration_ms = stage_start.elapsed().as_millis() as u64,
                "Stage complete"
            );
            outputs.push(output);
        }

        Ok(outputs)
    }

    async fn complete(
        &self,
        task_id: &str,
        query: &str,
        filename: &str,
        outputs: Vec<StageOutput>,
    ) -> PipelineOutcome {
        let analysis = aggregate(outputs);
        let output_path = self.write_snapshot(task_id, query, filename, &analysis).await;

        self.registry.update_result(
            task_id,
            &analysis.to_string(),
            output_path.as_deref(),
            TaskStatus::Completed,
        );

        PipelineOutcome::Completed {
            analysis,
            output_path,
        }
    }

    async fn fail(
        &self,
        task_id: &str,
        query: &str,
        filename: &str,
        failure: StageFailure,
    ) -> PipelineOutcome {
        let StageFailure {
            stage,
            error: err,
            completed,
        } = failure;
        let error = format!("{stage} stage failed: {err}");
        tracing::error!(task_id, stage = %stage, error = %err, "Pipeline failed");

        // The snapshot keeps whatever the earlier stages found.
        let snapshot = json!({
            "failed_stage": stage.as_str(),
            "error": error,
            "partial_results": aggregate(completed),
        });
        let output_path = self.write_snapshot(task_id, query, filename, &snapshot).await;

        self.registry
            .update_result(task_id, &error, output_path.as_deref(), TaskStatus::Failed);

        PipelineOutcome::Failed { stage, error }
    }

    /// Best effort: a failed write is logged and leaves the task's output path empty.
    async fn write_snapshot(
        &self,
        task_id: &str,
        query: &str,
        filename: &str,
        analysis: &Value,
    ) -> Option<String> {
        let entry = ArchiveEntry {
            task_id,
            timestamp: Utc::now(),
            query,
            file_processed: filename,
            analysis,
        };
        match self.archive.store(&entry).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to archive analysis");
                None
            }
        }
    }
}

struct StageFailure {
    stage: StageKind,
    error: StageError,
    /// Outputs of the stages that finished before the failure.
    completed: Vec<StageOutput>,
}

/// Key each stage payload by its result name.
fn aggregate(outputs: Vec<StageOutput>) -> Value {
    let map: Map<String, Value> = outputs
        .into_iter()
        .map(|o| (o.stage.result_key().to_string(), o.payload))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::StageLimits;
    use crate::pipeline::archive::{ArchivalError, FsResultArchive};
    use crate::pipeline::extraction::{DocumentReader, ExtractionError};
    use crate::pipeline::import::DocumentStore;
    use crate::pipeline::llm::mock::MockLlmClient;
    use crate::pipeline::llm::LlmError;
    use crate::registry::SqliteTaskRegistry;

    struct StubStage {
        kind: StageKind,
        payload: Value,
        fail: bool,
        calls: AtomicUsize,
        prior_seen: Mutex<Vec<StageKind>>,
    }

    impl StubStage {
        fn ok(kind: StageKind, payload: Value) -> Arc<Self> {
            Arc::new(Self {
                kind,
                payload,
                fail: false,
                calls: AtomicUsize::new(0),
                prior_seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(kind: StageKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                payload: Value::Null,
                fail: true,
                calls: AtomicUsize::new(0),
                prior_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisStage for StubStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn execute(
            &self,
            handle: &DocumentHandle,
            _query: &str,
            prior: &[StageOutput],
            _ctx: &ExecutionContext,
        ) -> Result<StageOutput, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(handle.path().exists(), "document must exist while stages run");
            *self.prior_seen.lock().unwrap() = prior.iter().map(|o| o.stage).collect();

            if self.fail {
                return Err(StageError::Llm(LlmError::Api {
                    status: 500,
                    body: "model exploded".into(),
                }));
            }
            Ok(StageOutput::new(self.kind, self.payload.clone()))
        }
    }

    struct BrokenArchive;

    #[async_trait]
    impl ResultArchive for BrokenArchive {
        async fn store(&self, _entry: &ArchiveEntry<'_>) -> Result<String, ArchivalError> {
            Err(ArchivalError::Io(std::io::Error::other("disk full")))
        }
    }

    struct NoopReader;

    impl DocumentReader for NoopReader {
        fn read_text(&self, _path: &Path) -> Result<String, ExtractionError> {
            Ok(String::new())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        registry: Arc<SqliteTaskRegistry>,
        store: DocumentStore,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = DocumentStore::new(dir.path().join("data"), 1024 * 1024);
            Self {
                registry: Arc::new(SqliteTaskRegistry::in_memory().unwrap()),
                store,
                dir,
            }
        }

        fn orchestrator(
            &self,
            stages: Vec<Arc<dyn AnalysisStage>>,
            archive: Arc<dyn ResultArchive>,
        ) -> PipelineOrchestrator {
            let ctx = ExecutionContext::new(
                Arc::new(MockLlmClient::new("{}")),
                Arc::new(NoopReader),
                StageLimits::default(),
            );
            PipelineOrchestrator::new(stages, self.registry.clone(), archive, ctx)
        }

        fn fs_archive(&self) -> Arc<dyn ResultArchive> {
            Arc::new(FsResultArchive::new(self.dir.path().join("outputs")))
        }

        async fn submit(&self) -> (String, DocumentHandle) {
            let task_id = self.registry.create("10-K.pdf", "Is revenue growing?").unwrap();
            let handle = self
                .store
                .ingest("10-K.pdf", b"%PDF-1.7 test document")
                .await
                .unwrap();
            (task_id, handle)
        }
    }

    fn four_stages() -> Vec<Arc<StubStage>> {
        vec![
            StubStage::ok(
                StageKind::Verification,
                json!({"is_financial_document": true, "verification_status": "PASSED"}),
            ),
            StubStage::ok(StageKind::MetricExtraction, json!({"company": "Acme"})),
            StubStage::ok(StageKind::InvestmentAnalysis, json!({"investment_stance": "Neutral"})),
            StubStage::ok(StageKind::RiskAssessment, json!({"overall_risk_rating": "Medium"})),
        ]
    }

    fn as_dyn(stages: &[Arc<StubStage>]) -> Vec<Arc<dyn AnalysisStage>> {
        stages
            .iter()
            .map(|s| s.clone() as Arc<dyn AnalysisStage>)
            .collect()
    }

    #[tokio::test]
    async fn successful_run_records_four_key_aggregate() {
        let h = Harness::new();
        let stages = four_stages();
        let orchestrator = h.orchestrator(as_dyn(&stages), h.fs_archive());
        let (task_id, handle) = h.submit().await;
        let doc_path = handle.path().to_path_buf();

        let outcome = orchestrator.run(&task_id, "Is revenue growing?", handle, "10-K.pdf").await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));

        let record = h.registry.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        let result: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
        let mut keys: Vec<_> = result.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            ["financial_analysis", "investment_analysis", "risk_assessment", "verification"]
        );
        assert_eq!(result["financial_analysis"]["company"], "Acme");

        let output_path = record.output_path.expect("archived");
        let archived: Value = serde_json::from_slice(&std::fs::read(&output_path).unwrap()).unwrap();
        assert_eq!(archived["analysis"], result);
        assert_eq!(archived["file_processed"], "10-K.pdf");

        assert!(!doc_path.exists());
        for stage in &stages {
            assert_eq!(stage.calls(), 1);
        }
    }

    #[tokio::test]
    async fn each_stage_sees_all_earlier_outputs() {
        let h = Harness::new();
        let stages = four_stages();
        let orchestrator = h.orchestrator(as_dyn(&stages), h.fs_archive());
        let (task_id, handle) = h.submit().await;

        orchestrator.run(&task_id, "q", handle, "10-K.pdf").await;

        for (i, stage) in stages.iter().enumerate() {
            let seen = stage.prior_seen.lock().unwrap().clone();
            assert_eq!(seen, StageKind::ALL[..i].to_vec());
        }
    }

    #[tokio::test]
    async fn stage_failure_stops_later_stages() {
        let h = Harness::new();
        let stages = vec![
            StubStage::ok(StageKind::Verification, json!({"verification_status": "PASSED"})),
            StubStage::failing(StageKind::MetricExtraction),
            StubStage::ok(StageKind::InvestmentAnalysis, json!({})),
            StubStage::ok(StageKind::RiskAssessment, json!({})),
        ];
        let orchestrator = h.orchestrator(as_dyn(&stages), h.fs_archive());
        let (task_id, handle) = h.submit().await;
        let doc_path = handle.path().to_path_buf();

        let outcome = orchestrator.run(&task_id, "q", handle, "10-K.pdf").await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed { stage: StageKind::MetricExtraction, .. }
        ));

        let record = h.registry.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.result.unwrap();
        assert!(error.starts_with("metric_extraction stage failed:"), "{error}");
        assert!(error.contains("model exploded"));
        assert!(record.completed_at.is_some());

        let output_path = record.output_path.expect("failed runs are archived too");
        let archived: Value = serde_json::from_slice(&std::fs::read(&output_path).unwrap()).unwrap();
        assert_eq!(archived["analysis"]["failed_stage"], "metric_extraction");
        assert_eq!(archived["analysis"]["error"], error.as_str());
        assert_eq!(
            archived["analysis"]["partial_results"]["verification"]["verification_status"],
            "PASSED"
        );

        assert_eq!(stages[2].calls(), 0);
        assert_eq!(stages[3].calls(), 0);
        assert!(!doc_path.exists());
    }

    #[tokio::test]
    async fn archive_failure_still_completes_task() {
        let h = Harness::new();
        let stages = four_stages();
        let orchestrator = h.orchestrator(as_dyn(&stages), Arc::new(BrokenArchive));
        let (task_id, handle) = h.submit().await;

        orchestrator.run(&task_id, "q", handle, "10-K.pdf").await;

        let record = h.registry.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.output_path.is_none());
        let result: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
        assert_eq!(result.as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn negative_verification_does_not_short_circuit() {
        let h = Harness::new();
        let mut stages = four_stages();
        stages[0] = StubStage::ok(
            StageKind::Verification,
            json!({"is_financial_document": false, "verification_status": "FAILED"}),
        );
        let orchestrator = h.orchestrator(as_dyn(&stages), h.fs_archive());
        let (task_id, handle) = h.submit().await;

        orchestrator.run(&task_id, "q", handle, "recipe.pdf").await;

        let record = h.registry.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        let result: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
        assert_eq!(result["verification"]["verification_status"], "FAILED");
        assert!(stages.iter().all(|s| s.calls() == 1));
    }

    #[tokio::test]
    async fn panicking_stage_still_removes_document() {
        struct PanicStage;

        #[async_trait]
        impl AnalysisStage for PanicStage {
            fn kind(&self) -> StageKind {
                StageKind::Verification
            }

            async fn execute(
                &self,
                _handle: &DocumentHandle,
                _query: &str,
                _prior: &[StageOutput],
                _ctx: &ExecutionContext,
            ) -> Result<StageOutput, StageError> {
                panic!("stage bug");
            }
        }

        let h = Harness::new();
        let orchestrator = Arc::new(h.orchestrator(vec![Arc::new(PanicStage)], h.fs_archive()));
        let (task_id, handle) = h.submit().await;
        let doc_path = handle.path().to_path_buf();

        let joined = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let task_id = task_id.clone();
            async move { orchestrator.run(&task_id, "q", handle, "10-K.pdf").await }
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert!(!doc_path.exists());
        assert_eq!(h.registry.get(&task_id).unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn completed_task_is_not_overwritten_by_second_run() {
        let h = Harness::new();
        let ok = h.orchestrator(as_dyn(&four_stages()), h.fs_archive());
        let failing = h.orchestrator(
            vec![StubStage::failing(StageKind::Verification) as Arc<dyn AnalysisStage>],
            h.fs_archive(),
        );
        let (task_id, handle) = h.submit().await;
        ok.run(&task_id, "q", handle, "10-K.pdf").await;

        let second = h.store.ingest("10-K.pdf", b"%PDF-1.7 again").await.unwrap();
        failing.run(&task_id, "q", second, "10-K.pdf").await;

        assert_eq!(h.registry.get(&task_id).unwrap().status, TaskStatus::Completed);
    }

    /// Registry that notes whether a watched file still exists at the terminal write.
    struct WatchingRegistry {
        inner: SqliteTaskRegistry,
        watched: Mutex<Option<std::path::PathBuf>>,
        existed_at_write: Mutex<Option<bool>>,
    }

    impl TaskRegistry for WatchingRegistry {
        fn create(&self, filename: &str, query: &str) -> Result<String, crate::registry::RegistryError> {
            self.inner.create(filename, query)
        }

        fn mark_running(&self, task_id: &str) {
            self.inner.mark_running(task_id)
        }

        fn update_result(
            &self,
            task_id: &str,
            result: &str,
            output_path: Option<&str>,
            status: TaskStatus,
        ) {
            let exists = self.watched.lock().unwrap().as_ref().map(|p| p.exists());
            *self.existed_at_write.lock().unwrap() = exists;
            self.inner.update_result(task_id, result, output_path, status)
        }

        fn get(&self, task_id: &str) -> Result<crate::registry::TaskRecord, crate::registry::RegistryError> {
            self.inner.get(task_id)
        }
    }

    #[tokio::test]
    async fn document_is_removed_before_terminal_write() {
        for fail in [false, true] {
            let h = Harness::new();
            let registry = Arc::new(WatchingRegistry {
                inner: SqliteTaskRegistry::in_memory().unwrap(),
                watched: Mutex::new(None),
                existed_at_write: Mutex::new(None),
            });
            let stages = if fail {
                vec![StubStage::failing(StageKind::Verification) as Arc<dyn AnalysisStage>]
            } else {
                as_dyn(&four_stages())
            };
            let ctx = ExecutionContext::new(
                Arc::new(MockLlmClient::new("{}")),
                Arc::new(NoopReader),
                StageLimits::default(),
            );
            let orchestrator = PipelineOrchestrator::new(stages, registry.clone(), h.fs_archive(), ctx);

            let task_id = registry.create("10-K.pdf", "q").unwrap();
            let handle = h.store.ingest("10-K.pdf", b"%PDF-1.7 test document").await.unwrap();
            *registry.watched.lock().unwrap() = Some(handle.path().to_path_buf());

            orchestrator.run(&task_id, "q", handle, "10-K.pdf").await;

            assert_eq!(*registry.existed_at_write.lock().unwrap(), Some(false), "fail={fail}");
            assert!(registry.get(&task_id).unwrap().status.is_terminal());
        }
    }
}
