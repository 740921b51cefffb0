//! Error types for convolab operations.
//!
//! - `JobError`: a job function failed on one message
//! - `LabError`: setup-time misuse of the engine (bad config, unknown job)
//! - `LlmError`: LLM provider interactions

use thiserror::Error;

/// Errors raised by job functions.
///
/// The workload never lets these escape a run: each one is logged and turned
/// into an error-kind `JobResult` for its (job, message) pair.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job configuration: {0}")]
    Config(String),

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Could not parse job output: {0}")]
    Parse(String),

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Lab error: {0}")]
    Lab(#[from] LabError),
}

/// Usage errors surfaced while building or loading a workload.
#[derive(Debug, Error)]
pub enum LabError {
    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    #[error("Unknown job function '{0}'")]
    UnknownJobFunction(String),

    #[error("Unknown executor type '{0}': expected sequential, parallel or parallel_jobs")]
    UnknownExecutorType(String),

    #[error("Invalid sample rate {0}: must be within [0, 1]")]
    InvalidSample(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}
