//! The analytics execution engine.
//!
//! - [`Message`]: one conversational turn with its context
//! - [`JobResult`]: outcome of one job on one message
//! - [`JobConfig`]: parameters of a job and their selectable variants
//! - [`Job`]: a job function bound to a configuration and its results
//! - [`Workload`]: runs jobs over batches of messages and optimizes them

pub mod job;
pub mod job_config;
pub mod loader;
pub mod message;
pub mod progress;
pub mod result;
pub mod table;
pub mod workload;

pub use job::{
    job_fn, sync_job_fn, FnJob, Job, JobContext, JobFunction, ResultTable, SyncFnJob,
    WorkloadHandle,
};
pub use job_config::{JobConfig, SelectableField, TypedJobConfig};
pub use loader::{JobRegistry, JobSpec, WorkloadSpec};
pub use message::{truncate, Elision, Message, TranscriptOptions};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use result::{JobResult, ResultType};
pub use table::{Cell, ResultsTable};
pub use workload::{ExecutorType, Workload, DEFAULT_MAX_PARALLELISM, MAX_PARALLELISM};
