use std::sync::Arc;

use async_trait::async_trait;

use super::prompts::{build_stage_prompt, build_system_prompt};
use super::{parse_stage_response, AnalysisStage, ExecutionContext, StageError, StageKind, StageOutput};
use crate::pipeline::import::DocumentHandle;

/// A stage answered by the shared language model.
pub struct LlmStage {
    kind: StageKind,
}

impl LlmStage {
    pub fn new(kind: StageKind) -> Self {
        Self { kind }
    }
}

/// The production pipeline: one model-backed stage per kind, in order.
pub fn standard_stages() -> Vec<Arc<dyn AnalysisStage>> {
    StageKind::ALL
        .into_iter()
        .map(|kind| Arc::new(LlmStage::new(kind)) as Arc<dyn AnalysisStage>)
        .collect()
}

#[async_trait]
impl AnalysisStage for LlmStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(
        &self,
        handle: &DocumentHandle,
        query: &str,
        prior: &[StageOutput],
        ctx: &ExecutionContext,
    ) -> Result<StageOutput, StageError> {
        let text = handle.text(&ctx.reader).await?;
        let system = build_system_prompt(self.kind);
        let prompt = build_stage_prompt(self.kind, text, query, prior);

        let attempts = ctx.limits.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            ctx.limiter.acquire(self.kind, ctx.limits.max_rate_wait).await?;

            match ctx.llm.complete(&system, &prompt).await {
                Ok(reply) => match parse_stage_response(&reply) {
                    Ok(payload) => {
                        tracing::debug!(stage = %self.kind, attempt, model = ctx.llm.model(), "Stage output parsed");
                        return Ok(StageOutput::new(self.kind, payload));
                    }
                    Err(e) => {
                        tracing::warn!(stage = %self.kind, attempt, error = %e, "Unusable stage output");
                        last_error = e.to_string();
                    }
                },
                Err(e) if !e.is_transient() => return Err(StageError::Llm(e)),
                Err(e) => {
                    tracing::warn!(stage = %self.kind, attempt, error = %e, "Language model call failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(StageError::RetriesExhausted {
            attempts,
            last: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::StageLimits;
    use crate::pipeline::extraction::{DocumentReader, ExtractionError};
    use crate::pipeline::import::DocumentStore;
    use crate::pipeline::llm::mock::MockLlmClient;
    use crate::pipeline::llm::{LlmClient, LlmError};

    struct FixedReader(&'static str);

    impl DocumentReader for FixedReader {
        fn read_text(&self, _path: &Path) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    struct EmptyReader;

    impl DocumentReader for EmptyReader {
        fn read_text(&self, _path: &Path) -> Result<String, ExtractionError> {
            Err(ExtractionError::NoText)
        }
    }

    fn limits(max_attempts: u32) -> StageLimits {
        StageLimits {
            max_attempts,
            max_calls_per_minute: 100,
            max_rate_wait: Duration::from_secs(1),
        }
    }

    fn context(llm: Arc<MockLlmClient>, max_attempts: u32) -> ExecutionContext {
        let llm: Arc<dyn LlmClient> = llm;
        ExecutionContext::new(llm, Arc::new(FixedReader("Revenue 120")), limits(max_attempts))
    }

    async fn staged(dir: &tempfile::TempDir) -> DocumentHandle {
        DocumentStore::new(dir.path(), 1024 * 1024)
            .ingest("report.pdf", b"%PDF-1.4 test")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn parses_first_good_reply() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(MockLlmClient::new(r#"```json
{"verification_status": "PASSED", "is_financial_document": true}
```"#));
        let ctx = context(llm.clone(), 5);

        let out = LlmStage::new(StageKind::Verification)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap();

        assert_eq!(out.stage, StageKind::Verification);
        assert_eq!(out.payload["verification_status"], "PASSED");
        assert_eq!(llm.calls(), 1);
        assert!(llm.prompts()[0].contains("Revenue 120"));
    }

    #[tokio::test]
    async fn retries_malformed_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(
            MockLlmClient::new(r#"{"company": "Acme"}"#)
                .then_reply("sorry, no json")
                .then_fail(LlmError::Api { status: 503, body: "busy".into() }),
        );
        let ctx = context(llm.clone(), 5);

        let out = LlmStage::new(StageKind::MetricExtraction)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap();

        assert_eq!(out.payload, json!({"company": "Acme"}));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(MockLlmClient::new("never json"));
        let ctx = context(llm.clone(), 3);

        let err = LlmStage::new(StageKind::RiskAssessment)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_llm_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(
            MockLlmClient::new("{}").then_fail(LlmError::Api { status: 401, body: "bad key".into() }),
        );
        let ctx = context(llm.clone(), 5);

        let err = LlmStage::new(StageKind::Verification)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Llm(_)));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn unreadable_document_fails_without_calling_model() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(MockLlmClient::new("{}"));
        let llm_dyn: Arc<dyn LlmClient> = llm.clone();
        let ctx = ExecutionContext::new(llm_dyn, Arc::new(EmptyReader), limits(5));

        let err = LlmStage::new(StageKind::Verification)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Document(ExtractionError::NoText)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn rate_ceiling_fails_instead_of_stalling() {
        let dir = tempfile::tempdir().unwrap();
        let handle = staged(&dir).await;
        let llm = Arc::new(MockLlmClient::new("no json"));
        let llm_dyn: Arc<dyn LlmClient> = llm.clone();
        let ctx = ExecutionContext::new(
            llm_dyn,
            Arc::new(FixedReader("text")),
            StageLimits {
                max_attempts: 5,
                max_calls_per_minute: 2,
                max_rate_wait: Duration::from_millis(10),
            },
        );

        let err = LlmStage::new(StageKind::Verification)
            .execute(&handle, "q", &[], &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::RateLimited(_)));
        assert_eq!(llm.calls(), 2);
    }

    #[test]
    fn standard_stages_cover_all_kinds_in_order() {
        let kinds: Vec<_> = standard_stages().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, StageKind::ALL);
    }
}
