//! Reasoning-service client used by the analysis stages.

pub mod openai;
#[cfg(test)]
pub mod mock;

pub use openai::*;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Language model service unreachable at {0}")]
    Connection(String),

    #[error("Language model returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Language model returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::HttpClient(_) | Self::EmptyCompletion => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::ResponseParsing(_) => true,
        }
    }
}

/// One chat-style completion: a system persona plus a user prompt.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;

    /// Model identifier, for logs.
    fn model(&self) -> &str;
}
