//! Analysis stages: the four steps every uploaded document goes through.

pub mod limiter;
pub mod llm_stage;
pub mod parser;
pub mod prompts;
pub mod traits;
pub mod types;

pub use limiter::*;
pub use llm_stage::*;
pub use parser::*;
pub use traits::*;
pub use types::*;

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;
use crate::pipeline::llm::LlmError;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("call rate ceiling reached, next slot in {}s", .0.as_secs())]
    RateLimited(Duration),

    #[error("document unreadable: {0}")]
    Document(#[from] ExtractionError),
}
