use super::{StageKind, StageOutput};

/// Rules shared by every stage persona.
const COMMON_RULES: &str = r#"
RULES:
1. Base every statement strictly on the document text provided.
2. NEVER fabricate figures or cite sources outside the document.
3. If a value is not present in the document, use "N/A".
4. Output MUST be a single JSON object wrapped in ```json``` fences, with no other text.
"#;

/// Persona, task instructions and output shape for one stage.
pub struct StagePrompt {
    pub role: &'static str,
    pub persona: &'static str,
    pub instructions: &'static str,
    pub output_shape: &'static str,
}

const VERIFICATION: StagePrompt = StagePrompt {
    role: "Financial Document Compliance Verifier",
    persona: "You are a former SEC compliance officer and Big Four auditor. You decide whether a \
document is a genuine financial report (10-K, 10-Q, annual report, earnings release, audited \
statements) that follows GAAP or IFRS conventions, and you flag omissions and inconsistencies.",
    instructions: r#"1. Confirm whether the document is a legitimate financial report.
2. Check for the standard sections:
   - Income Statement (Revenue, COGS, Net Income)
   - Balance Sheet (Assets, Liabilities, Equity)
   - Cash Flow Statement (Operating, Investing, Financing)
   - Management Discussion & Analysis (MD&A), if present
3. Flag missing sections, inconsistent figures or unusual formatting.
4. Identify the reporting entity and the reporting period."#,
    output_shape: r#"{
  "is_financial_document": true,
  "document_type": "10-K | 10-Q | Annual Report | Earnings Release | Other",
  "reporting_entity": "Company name",
  "reporting_period": "Q2 2025 | FY 2024 | ...",
  "sections_found": ["Income Statement", "Balance Sheet", "Cash Flow", "MD&A"],
  "sections_missing": [],
  "anomalies_detected": [],
  "verification_status": "PASSED | FAILED | PARTIAL"
}"#,
};

const METRIC_EXTRACTION: StagePrompt = StagePrompt {
    role: "Senior Financial Analyst",
    persona: "You are a CFA-certified senior financial analyst specialising in fundamental \
analysis of income statements, balance sheets and cash flow statements. You report only what \
the data shows and flag uncertainty where it exists.",
    instructions: r#"1. Extract the key financial metrics:
   - Revenue and revenue growth (YoY %)
   - Gross and net profit margin
   - Earnings per share (basic and diluted)
   - EBITDA and operating cash flow
   - Total debt and debt-to-equity ratio
   - Current and quick ratio
   - Return on equity and return on assets
2. Identify trends, year-over-year changes and material financial events.
3. Answer the user query directly.
4. Note significant risks, opportunities or anomalies in the data."#,
    output_shape: r#"{
  "company": "Company name",
  "reporting_period": "Period covered",
  "summary": "2-3 sentence executive summary",
  "key_metrics": {
    "revenue": "value and YoY change",
    "net_income": "value and YoY change",
    "eps_diluted": "value",
    "gross_margin_pct": "value",
    "net_margin_pct": "value",
    "debt_to_equity": "value",
    "current_ratio": "value",
    "roe": "value",
    "operating_cash_flow": "value"
  },
  "key_trends": [],
  "query_response": "Direct answer to the user query",
  "risks": [],
  "opportunities": []
}"#,
};

const INVESTMENT_ANALYSIS: StagePrompt = StagePrompt {
    role: "Certified Investment Advisor",
    persona: "You are a CFA charterholder and licensed investment advisor. Every recommendation \
you give rests on verified financial data and standard valuation models, and you label each \
assumption you make.",
    instructions: r#"1. Using the earlier findings, assess the investment profile of the company.
2. Estimate valuation metrics where data allows: P/E, P/B, EV/EBITDA, free cash flow yield.
3. Compare against industry benchmarks only where the document mentions them.
4. Give a stance (Bullish, Neutral or Bearish) with justification.
5. Separate short-term (0-12 months) from long-term (1-3 years) considerations."#,
    output_shape: r#"{
  "investment_stance": "Bullish | Neutral | Bearish",
  "stance_justification": "Evidence-based reasoning",
  "valuation_metrics": {
    "pe_ratio": "value or N/A",
    "pb_ratio": "value or N/A",
    "ev_ebitda": "value or N/A",
    "fcf_yield": "value or N/A"
  },
  "short_term_outlook": "0-12 month assessment",
  "long_term_outlook": "1-3 year assessment",
  "key_catalysts": [],
  "key_concerns": [],
  "recommendation": "Buy | Hold | Sell with specific reasoning"
}"#,
};

const RISK_ASSESSMENT: StagePrompt = StagePrompt {
    role: "Financial Risk Assessment Specialist",
    persona: "You are an FRM-certified risk specialist experienced in quantitative risk \
modelling and stress testing. You give balanced risk profiles backed only by documented \
evidence, and you propose mitigations suited to the company's profile.",
    instructions: r#"1. Assess each risk category from documented evidence:
   - Market risk: macroeconomic exposure, FX, interest rate sensitivity
   - Credit risk: debt levels, credit ratings, interest coverage
   - Liquidity risk: current ratio, quick ratio, cash runway
   - Operational risk: supply chain, cost pressures
   - Regulatory risk: legal proceedings, regulator notices, litigation
2. Rate each category Low, Medium or High with justification.
3. Propose mitigation strategies."#,
    output_shape: r#"{
  "overall_risk_rating": "Low | Medium | High",
  "risk_summary": "2-3 sentence overview",
  "risk_categories": {
    "market_risk": {"rating": "Low | Medium | High", "factors": [], "evidence": ""},
    "credit_risk": {"rating": "Low | Medium | High", "factors": [], "evidence": ""},
    "liquidity_risk": {"rating": "Low | Medium | High", "factors": [], "evidence": ""},
    "operational_risk": {"rating": "Low | Medium | High", "factors": [], "evidence": ""},
    "regulatory_risk": {"rating": "Low | Medium | High", "factors": [], "evidence": ""}
  },
  "key_risk_indicators": [],
  "mitigation_strategies": []
}"#,
};

pub fn stage_prompt(kind: StageKind) -> &'static StagePrompt {
    match kind {
        StageKind::Verification => &VERIFICATION,
        StageKind::MetricExtraction => &METRIC_EXTRACTION,
        StageKind::InvestmentAnalysis => &INVESTMENT_ANALYSIS,
        StageKind::RiskAssessment => &RISK_ASSESSMENT,
    }
}

/// System message: the stage persona plus the shared output rules.
pub fn build_system_prompt(kind: StageKind) -> String {
    let prompt = stage_prompt(kind);
    format!("Role: {}\n\n{}\n{COMMON_RULES}", prompt.role, prompt.persona)
}

/// User message: document, query, earlier findings and the expected JSON shape.
pub fn build_stage_prompt(
    kind: StageKind,
    document_text: &str,
    query: &str,
    prior: &[StageOutput],
) -> String {
    let prompt = stage_prompt(kind);

    // Verification judges the document alone; the query would only bias it.
    let query_section = match kind {
        StageKind::Verification => String::new(),
        _ => format!("User query: {query}\n\n"),
    };

    let prior_section = if prior.is_empty() {
        String::new()
    } else {
        let findings: Vec<String> = prior
            .iter()
            .map(|o| {
                let body = serde_json::to_string_pretty(&o.payload).unwrap_or_default();
                format!("<{key}>\n{body}\n</{key}>", key = o.stage.result_key())
            })
            .collect();
        format!("Findings from earlier stages:\n{}\n\n", findings.join("\n"))
    };

    format!(
        r#"<document>
{document_text}
</document>

{query_section}{prior_section}Instructions:
{instructions}

Respond with a JSON object of exactly this shape:
```json
{shape}
```"#,
        instructions = prompt.instructions,
        shape = prompt.output_shape,
    )
}
