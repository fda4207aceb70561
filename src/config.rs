use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Financial Document Analyzer";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Query used when the caller submits none (or only whitespace).
pub const DEFAULT_QUERY: &str = "Analyze this financial document for investment insights";

/// Default reasoning model and sampling temperature.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Per-stage bounds on the reasoning calls.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_CALLS_PER_MINUTE: u32 = 10;

/// Longest a stage will wait for a free call slot before giving up.
pub const DEFAULT_MAX_RATE_WAIT_SECS: u64 = 90;

/// Upload ceiling in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 100;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    "fin_analyzer=info,tower_http=info".to_string()
}

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Working directory for uploaded documents (removed after each run).
    pub data_dir: PathBuf,
    /// Append-only archive of finished runs.
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub llm: LlmConfig,
    pub stage_limits: StageLimits,
    pub max_upload_bytes: usize,
}

/// Connection settings for the reasoning service.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

/// Bounds applied to every analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub max_attempts: u32,
    pub max_calls_per_minute: u32,
    pub max_rate_wait: Duration,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_calls_per_minute: DEFAULT_MAX_CALLS_PER_MINUTE,
            max_rate_wait: Duration::from_secs(DEFAULT_MAX_RATE_WAIT_SECS),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("outputs"),
            database_path: PathBuf::from("financial_analysis.db"),
            llm: LlmConfig::default(),
            stage_limits: StageLimits::default(),
            max_upload_bytes: megabytes_to_bytes(DEFAULT_MAX_UPLOAD_MB),
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (environment in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("FIN_ANALYZER_ADDR")
            .and_then(|v| match v.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "Ignoring invalid FIN_ANALYZER_ADDR");
                    None
                }
            })
            .unwrap_or(defaults.bind_addr);

        let llm = LlmConfig {
            base_url: get("OPENAI_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.llm.base_url),
            api_key: get("OPENAI_API_KEY"),
            model: get("FIN_ANALYZER_MODEL").unwrap_or(defaults.llm.model),
            temperature: parse_or(get("FIN_ANALYZER_TEMPERATURE"), defaults.llm.temperature),
            request_timeout: defaults.llm.request_timeout,
        };

        let stage_limits = StageLimits {
            max_attempts: parse_or(get("FIN_ANALYZER_MAX_ATTEMPTS"), DEFAULT_MAX_ATTEMPTS).max(1),
            max_calls_per_minute: parse_or(get("FIN_ANALYZER_MAX_RPM"), DEFAULT_MAX_CALLS_PER_MINUTE)
                .max(1),
            max_rate_wait: defaults.stage_limits.max_rate_wait,
        };

        let max_upload_mb: u64 = parse_or(get("FIN_ANALYZER_MAX_UPLOAD_MB"), DEFAULT_MAX_UPLOAD_MB);

        Self {
            bind_addr,
            data_dir: get("FIN_ANALYZER_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            output_dir: get("FIN_ANALYZER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            database_path: get("FIN_ANALYZER_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            llm,
            stage_limits,
            max_upload_bytes: megabytes_to_bytes(max_upload_mb),
        }
    }
}

/// Saturates instead of overflowing on absurd settings.
fn megabytes_to_bytes(mb: u64) -> usize {
    usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, fallback: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(fallback)
}
