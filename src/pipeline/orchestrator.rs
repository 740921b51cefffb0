//! Event detection over a project's logged tasks.
//!
//! The pipeline:
//! 1. Builds one detector job per event definition of the project
//! 2. Converts tasks into session-chained messages
//! 3. Runs the workload with the configured executor
//! 4. Dispatches every positive detection to the configured sinks

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, LabConfig};
use crate::detectors::{build_detection_workload, model_field, EventDefinition, LlmEvaluator};
use crate::lab::{Job, JobConfig, JobResult, Message, ResultTable};
use crate::llm::LlmProvider;
use crate::metrics::LabMetrics;

use super::sink::{DetectedEvent, EventSink};
use super::task::{messages_from_tasks, Task};

/// Job id of the success/failure evaluation.
pub const EVALUATION_JOB_ID: &str = "task_evaluation";

/// Errors that abort a pipeline run before any job executes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// What a project wants analyzed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
    /// Also evaluate every task as a success or a failure.
    #[serde(default)]
    pub evaluate_tasks: bool,
}

impl ProjectSettings {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_event(mut self, definition: EventDefinition) -> Self {
        self.events.push(definition);
        self
    }

    pub fn with_task_evaluation(mut self) -> Self {
        self.evaluate_tasks = true;
        self
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Results keyed by message id then job id, with `task_id` filled.
    pub results: ResultTable,
    pub events: Vec<DetectedEvent>,
    /// Number of error results.
    pub errors: usize,
    /// Number of results produced, excluding units skipped by sampling.
    pub billable_units: usize,
    /// Number of failed sink deliveries.
    pub sink_failures: usize,
}

/// Runs a project's event detection over batches of tasks.
pub struct EventDetectionPipeline {
    provider: Arc<dyn LlmProvider>,
    config: LabConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    metrics: Option<Arc<LabMetrics>>,
}

impl EventDetectionPipeline {
    pub fn new(provider: Arc<dyn LlmProvider>, config: LabConfig) -> Self {
        Self {
            provider,
            config,
            sinks: Vec::new(),
            metrics: None,
        }
    }

    /// Adds a destination for detected events.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LabMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Detects the project's events in `tasks`.
    ///
    /// Job failures end up as error results in the report and sink failures
    /// are counted; neither aborts the run.
    ///
    /// # Errors
    ///
    /// `PipelineError::Config` when the configuration does not validate.
    pub async fn run(
        &self,
        project: &ProjectSettings,
        tasks: &[Task],
    ) -> Result<PipelineReport, PipelineError> {
        self.config.validate()?;

        let mut workload = build_detection_workload(&project.events, self.provider.clone())
            .with_config(&self.config)
            .with_project_id(project.project_id.clone());
        if let Some(org_id) = &project.org_id {
            workload = workload.with_org_id(org_id.clone());
        }
        if let Some(metrics) = &self.metrics {
            workload = workload.with_metrics(metrics.clone());
        }
        if project.evaluate_tasks {
            workload.add_job(
                Job::from_function(LlmEvaluator::new(self.provider.clone()))
                    .with_id(EVALUATION_JOB_ID)
                    .with_config(JobConfig::new().with_selectable(model_field(None))),
            );
        }

        if workload.jobs().is_empty() || tasks.is_empty() {
            info!(
                project_id = %project.project_id,
                jobs = workload.jobs().len(),
                tasks = tasks.len(),
                "Nothing to analyze"
            );
            return Ok(PipelineReport::default());
        }

        let messages = messages_from_tasks(tasks);
        let mut results = workload
            .run(&messages, self.config.executor_type, self.config.max_parallelism)
            .await
            .clone();

        let mut report = PipelineReport::default();
        for message in &messages {
            let Some(row) = results.get_mut(&message.id) else {
                continue;
            };
            let task_id = message.metadata_str("task_id").map(str::to_string);

            for job in workload.jobs() {
                let Some(result) = row.get_mut(&job.id) else {
                    continue;
                };
                result.task_id = task_id.clone();
                report.billable_units += 1;
                if result.is_error() {
                    report.errors += 1;
                    continue;
                }
                if result.as_bool() != Some(true) {
                    continue;
                }
                if let Some(definition) = project.events.iter().find(|d| d.name == job.id) {
                    report
                        .events
                        .push(detected_event(definition, message, result, project));
                }
            }
        }

        for event in &report.events {
            report.sink_failures += self.dispatch(event).await;
        }
        report.results = results;

        info!(
            project_id = %project.project_id,
            tasks = tasks.len(),
            events = report.events.len(),
            errors = report.errors,
            billable_units = report.billable_units,
            sink_failures = report.sink_failures,
            "Event detection finished"
        );
        Ok(report)
    }

    /// Sends an event to every sink and returns the number of failures.
    async fn dispatch(&self, event: &DetectedEvent) -> usize {
        let deliveries = self.sinks.iter().map(|sink| async move {
            let outcome = sink.dispatch(event).await;
            if let Err(e) = &outcome {
                warn!(
                    sink = sink.name(),
                    event = %event.event_name,
                    message_id = %event.message_id,
                    error = %e,
                    "Event delivery failed"
                );
            }
            outcome.is_err()
        });

        futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|failed| *failed)
            .count()
    }
}

/// Stable id, so that re-running a batch yields the same events.
fn event_id(project_id: &str, message_id: &str, event_name: &str) -> String {
    let key = format!("{}/{}/{}", project_id, message_id, event_name);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

fn detected_event(
    definition: &EventDefinition,
    message: &Message,
    result: &JobResult,
    project: &ProjectSettings,
) -> DetectedEvent {
    let mut metadata = result.metadata.clone();
    metadata.insert("description".to_string(), Value::from(definition.description.as_str()));

    DetectedEvent {
        id: event_id(&project.project_id, &message.id, &definition.name),
        event_name: definition.name.clone(),
        source: definition.detection_engine.clone(),
        message_id: message.id.clone(),
        task_id: result.task_id.clone(),
        session_id: message.metadata_str("session_id").map(str::to_string),
        project_id: Some(project.project_id.clone()),
        org_id: project.org_id.clone(),
        created_at: Utc::now(),
        confidence: result.metadata.get("confidence").and_then(Value::as_f64),
        webhook_url: definition.webhook_url.clone(),
        metadata,
    }
}
