//! Event detection for projects.
//!
//! Logged [`Task`]s are turned into [`Message`](crate::lab::Message)s, one
//! detector job is built per [`EventDefinition`](crate::detectors::EventDefinition)
//! of the project, and every positive detection becomes a [`DetectedEvent`]
//! handed to the configured [`EventSink`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use convolab::config::LabConfig;
//! use convolab::detectors::EventDefinition;
//! use convolab::llm::LiteLlmClient;
//! use convolab::pipeline::{EventDetectionPipeline, MemorySink, ProjectSettings, Task};
//!
//! let provider = Arc::new(LiteLlmClient::from_env()?);
//! let sink = Arc::new(MemorySink::new());
//! let pipeline =
//!     EventDetectionPipeline::new(provider, LabConfig::default()).with_sink(sink.clone());
//!
//! let project = ProjectSettings::new("project-1")
//!     .with_event(EventDefinition::keyword_detection("refund", "refund, money back"));
//! let tasks = vec![Task::new("t1", "I want my money back").with_output("Sorry to hear that.")];
//!
//! let report = pipeline.run(&project, &tasks).await?;
//! println!("{} events, {} billable units", report.events.len(), report.billable_units);
//! ```
//!
//! Sink failures are logged and counted in the report; they never abort a run.

pub mod orchestrator;
pub mod sink;
pub mod task;

pub use orchestrator::{
    EventDetectionPipeline, PipelineError, PipelineReport, ProjectSettings, EVALUATION_JOB_ID,
};
pub use sink::{DetectedEvent, EventSink, MemorySink, SinkError, WebhookSink};
pub use task::{messages_from_tasks, Task};
