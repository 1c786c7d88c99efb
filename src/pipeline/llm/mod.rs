//! LLM gateway: router, judge, and JSON repair over one chat-completions client.
//!
//! Transport and parse failures are folded into typed outcomes here
//! (`RouteOutcome`, `JudgeOutcome`); nothing in this module aborts a chunk.

pub mod client;
pub mod judge;
pub mod parser;
pub mod prompt;
pub mod router;

use thiserror::Error;

pub use client::{ChatCompletionsClient, CompletionRequest, LlmClient, LlmRole};
pub use judge::{judge, JudgeFinding, JudgeOutcome, JudgeRequest};
pub use router::{route, RouteOutcome, RouterCandidate};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Classification service is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Classification service returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Model returned an empty completion")]
    EmptyResponse,

    #[error("Model output failed validation: {0}")]
    InvalidOutput(String),
}
