//! convolab: batch analytics over conversation logs.
//!
//! Jobs (event detectors, evaluators, custom functions) run over batches of
//! conversational messages with bounded concurrency. Alternative
//! configurations of a job can be explored and the job switched to the
//! cheapest one that agrees with its current results.

pub mod cli;
pub mod config;
pub mod detectors;
pub mod error;
pub mod lab;
pub mod llm;
pub mod metrics;
pub mod pipeline;

// Re-export commonly used types
pub use config::{ConfigError, LabConfig};
pub use error::{JobError, LabError, LlmError};
pub use lab::{ExecutorType, Job, JobConfig, JobResult, Message, Workload};
