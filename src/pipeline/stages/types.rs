use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::CallRateLimiter;
use crate::config::StageLimits;
use crate::pipeline::extraction::DocumentReader;
use crate::pipeline::llm::LlmClient;

/// The four analysis steps, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Verification,
    MetricExtraction,
    InvestmentAnalysis,
    RiskAssessment,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        Self::Verification,
        Self::MetricExtraction,
        Self::InvestmentAnalysis,
        Self::RiskAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::MetricExtraction => "metric_extraction",
            Self::InvestmentAnalysis => "investment_analysis",
            Self::RiskAssessment => "risk_assessment",
        }
    }

    /// Key under which this stage's payload appears in the aggregate result.
    pub fn result_key(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::MetricExtraction => "financial_analysis",
            Self::InvestmentAnalysis => "investment_analysis",
            Self::RiskAssessment => "risk_assessment",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage produced for one run. Held in memory only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutput {
    pub stage: StageKind,
    pub payload: Value,
}

impl StageOutput {
    pub fn new(stage: StageKind, payload: Value) -> Self {
        Self { stage, payload }
    }

    /// True when a verification payload says the document is not a usable
    /// financial report. Other stages never count as negative.
    pub fn is_negative_verification(&self) -> bool {
        if self.stage != StageKind::Verification {
            return false;
        }
        let not_financial = self.payload.get("is_financial_document") == Some(&Value::Bool(false));
        let failed = self
            .payload
            .get("verification_status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("failed"));
        not_financial || failed
    }
}

/// Shared collaborators handed to every stage execution.
#[derive(Clone)]
pub struct ExecutionContext {
    pub llm: Arc<dyn LlmClient>,
    pub reader: Arc<dyn DocumentReader>,
    pub limiter: Arc<CallRateLimiter>,
    pub limits: StageLimits,
}

impl ExecutionContext {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        reader: Arc<dyn DocumentReader>,
        limits: StageLimits,
    ) -> Self {
        Self {
            llm,
            reader,
            limiter: Arc::new(CallRateLimiter::per_minute(limits.max_calls_per_minute)),
            limits,
        }
    }
}
