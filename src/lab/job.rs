//! Jobs: a job function bound to a configuration and its per-message results.
//!
//! Job functions implement the async [`JobFunction`] trait. They receive the
//! message, the configuration to use and a [`JobContext`] giving explicit
//! access to the job's identity and the owning workload. Plain closures are
//! adapted with [`job_fn`] (async) or [`sync_job_fn`] (blocking).

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{JobError, LabError};

use super::job_config::JobConfig;
use super::message::Message;
use super::result::JobResult;

/// Results of a run: message id → job id → result.
pub type ResultTable = HashMap<String, HashMap<String, JobResult>>;

/// Read access to the workload a job belongs to.
///
/// Holds the project and organization identifiers and a live view of the
/// results recorded so far in the current run, so a job function can build on
/// the output of sibling jobs.
#[derive(Debug, Clone, Default)]
pub struct WorkloadHandle {
    pub project_id: Option<String>,
    pub org_id: Option<String>,
    results: Arc<RwLock<ResultTable>>,
}

impl WorkloadHandle {
    pub(crate) fn new(project_id: Option<String>, org_id: Option<String>) -> Self {
        Self {
            project_id,
            org_id,
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the result a sibling job recorded for a message, if any.
    pub async fn result(&self, message_id: &str, job_id: &str) -> Option<JobResult> {
        let results = self.results.read().await;
        results
            .get(message_id)
            .and_then(|by_job| by_job.get(job_id))
            .cloned()
    }

    /// Returns every result recorded so far for a message.
    pub async fn results_for(&self, message_id: &str) -> HashMap<String, JobResult> {
        let results = self.results.read().await;
        results.get(message_id).cloned().unwrap_or_default()
    }

    pub(crate) async fn record(&self, message_id: &str, result: &JobResult) {
        let Some(job_id) = result.job_id.clone() else {
            return;
        };
        let mut results = self.results.write().await;
        results
            .entry(message_id.to_string())
            .or_default()
            .insert(job_id, result.clone());
    }

    pub(crate) async fn clear(&self) {
        self.results.write().await.clear();
    }
}

/// Everything a job function may know about the job invoking it.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub job_metadata: Map<String, Value>,
    pub workload: WorkloadHandle,
}

/// An analysis function run once per message.
///
/// Returning `Ok(None)` means "no result"; the engine records it as an error.
#[async_trait]
pub trait JobFunction: Send + Sync {
    /// Identifier used as the default job id.
    fn name(&self) -> &str;

    /// Runs the analysis on one message with the given configuration.
    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError>;
}

/// Adapter turning an async closure into a [`JobFunction`].
pub struct FnJob<F> {
    name: String,
    f: F,
}

/// Wraps an async closure taking owned arguments.
pub fn job_fn<F, Fut>(name: impl Into<String>, f: F) -> FnJob<F>
where
    F: Fn(Message, JobConfig, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<JobResult>, JobError>> + Send + 'static,
{
    FnJob {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> JobFunction for FnJob<F>
where
    F: Fn(Message, JobConfig, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<JobResult>, JobError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        (self.f)(message.clone(), config.clone(), ctx.clone()).await
    }
}

/// Adapter turning a blocking closure into a [`JobFunction`].
pub struct SyncFnJob<F> {
    name: String,
    f: F,
}

/// Wraps a synchronous closure. It runs inline on the executor, so it should
/// not block on I/O.
pub fn sync_job_fn<F>(name: impl Into<String>, f: F) -> SyncFnJob<F>
where
    F: Fn(&Message, &JobConfig, &JobContext) -> Result<Option<JobResult>, JobError>
        + Send
        + Sync
        + 'static,
{
    SyncFnJob {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> JobFunction for SyncFnJob<F>
where
    F: Fn(&Message, &JobConfig, &JobContext) -> Result<Option<JobResult>, JobError>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        (self.f)(message, config, ctx)
    }
}

/// A job function with its configuration and accumulated results.
pub struct Job {
    /// Stable identifier, defaults to the function's name.
    pub id: String,
    function: Arc<dyn JobFunction>,
    config: JobConfig,
    alternative_configs: Vec<JobConfig>,
    /// Results for the current configuration, by message id.
    pub results: HashMap<String, JobResult>,
    alternative_results: Vec<HashMap<String, JobResult>>,
    /// Passed through to every result this job produces.
    pub metadata: Map<String, Value>,
    sample: f64,
    workload: WorkloadHandle,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("function", &self.function.name())
            .field("config", &self.config)
            .field("alternative_configs", &self.alternative_configs.len())
            .field("results", &self.results.len())
            .field("sample", &self.sample)
            .finish()
    }
}

impl Job {
    /// Creates a job with an empty configuration.
    pub fn new(function: Arc<dyn JobFunction>) -> Self {
        Self {
            id: function.name().to_string(),
            function,
            config: JobConfig::new(),
            alternative_configs: Vec::new(),
            results: HashMap::new(),
            alternative_results: Vec::new(),
            metadata: Map::new(),
            sample: 1.0,
            workload: WorkloadHandle::default(),
        }
    }

    /// Creates a job from any job function value.
    pub fn from_function(function: impl JobFunction + 'static) -> Self {
        Self::new(Arc::new(function))
    }

    /// Overrides the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the configuration and derives its alternatives.
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.set_config(config);
        self
    }

    /// Sets the metadata copied onto every result.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the probability that the job runs on a given message.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidSample` unless `sample` is within [0, 1].
    pub fn with_sample(mut self, sample: f64) -> Result<Self, LabError> {
        if !(0.0..=1.0).contains(&sample) {
            return Err(LabError::InvalidSample(sample));
        }
        self.sample = sample;
        Ok(self)
    }

    /// Replaces the configuration. Alternatives are regenerated and their
    /// results discarded; results of the previous configuration are kept.
    pub fn set_config(&mut self, config: JobConfig) {
        self.alternative_configs = config.generate_configurations(true);
        self.alternative_results = vec![HashMap::new(); self.alternative_configs.len()];
        self.config = config;
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn alternative_configs(&self) -> &[JobConfig] {
        &self.alternative_configs
    }

    /// Results per alternative configuration, indexed like
    /// [`Job::alternative_configs`].
    pub fn alternative_results(&self) -> &[HashMap<String, JobResult>] {
        &self.alternative_results
    }

    pub fn sample(&self) -> f64 {
        self.sample
    }

    pub fn function(&self) -> &Arc<dyn JobFunction> {
        &self.function
    }

    pub(crate) fn attach(&mut self, workload: WorkloadHandle) {
        self.workload = workload;
    }

    fn context(&self) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            job_metadata: self.metadata.clone(),
            workload: self.workload.clone(),
        }
    }

    fn stamp(&self, mut result: JobResult) -> JobResult {
        result.job_id = Some(self.id.clone());
        result.job_metadata = self.metadata.clone();
        result
    }

    /// Invokes the job function once, without touching stored results.
    pub(crate) async fn execute(
        &self,
        message: &Message,
        config: &JobConfig,
    ) -> Result<JobResult, JobError> {
        let ctx = self.context();
        let produced = self.function.call(message, config, &ctx).await?;
        let result = match produced {
            Some(result) => result,
            None => {
                warn!(
                    job_id = %self.id,
                    message_id = %message.id,
                    "Job function returned no result"
                );
                JobResult::error("job function returned no result")
            }
        };
        Ok(self.stamp(result))
    }

    /// Invokes the job function with every failure mode contained.
    ///
    /// Errors, panics and timeouts all come back as error-kind results
    /// stamped with this job's id.
    pub(crate) async fn execute_isolated(
        &self,
        message: &Message,
        config: &JobConfig,
        timeout: Option<Duration>,
    ) -> JobResult {
        let call = AssertUnwindSafe(self.execute(message, config)).catch_unwind();

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        job_id = %self.id,
                        message_id = %message.id,
                        timeout = ?limit,
                        "Job timed out"
                    );
                    return self.stamp(JobResult::error(format!("timed out after {:?}", limit)));
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(job_id = %self.id, message_id = %message.id, error = %e, "Job failed");
                self.stamp(JobResult::error(e.to_string()))
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(job_id = %self.id, message_id = %message.id, panic = %reason, "Job panicked");
                self.stamp(JobResult::error(format!("job panicked: {}", reason)))
            }
        }
    }

    /// Runs the job on a message with the current configuration and stores
    /// the result under the message id.
    ///
    /// # Errors
    ///
    /// Errors from the job function are returned as is and nothing is stored.
    pub async fn run(&mut self, message: &Message) -> Result<JobResult, JobError> {
        let result = self.execute(message, &self.config).await?;
        self.results.insert(message.id.clone(), result.clone());
        Ok(result)
    }

    /// Blocking version of [`Job::run`] for callers outside a runtime.
    pub fn run_blocking(&mut self, message: &Message) -> Result<JobResult, JobError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| JobError::Failed(format!("failed to start runtime: {}", e)))?;
        runtime.block_on(self.run(message))
    }

    /// Runs the job on a message with every alternative configuration, in
    /// enumeration order, storing each result in the matching slot.
    ///
    /// # Errors
    ///
    /// Stops at the first job function error; earlier alternatives keep
    /// their stored results.
    pub async fn run_on_alternative_configurations(
        &mut self,
        message: &Message,
    ) -> Result<Vec<JobResult>, JobError> {
        if self.alternative_configs.is_empty() {
            debug!(job_id = %self.id, "No alternative configurations to run");
            return Ok(Vec::new());
        }

        let mut produced = Vec::with_capacity(self.alternative_configs.len());
        for i in 0..self.alternative_configs.len() {
            let result = self
                .execute(message, &self.alternative_configs[i])
                .await?;
            self.alternative_results[i].insert(message.id.clone(), result.clone());
            produced.push(result);
        }
        Ok(produced)
    }

    pub(crate) fn record(&mut self, message_id: &str, result: JobResult) {
        self.results.insert(message_id.to_string(), result);
    }

    pub(crate) fn record_alternatives(&mut self, message_id: &str, results: Vec<JobResult>) {
        for (slot, result) in self.alternative_results.iter_mut().zip(results) {
            slot.insert(message_id.to_string(), result);
        }
    }

    /// Agreement of each alternative configuration with the current one,
    /// over the messages in `results`.
    pub fn alternative_accuracies(&self) -> Vec<f64> {
        let total = self.results.len();
        self.alternative_results
            .iter()
            .map(|alternative| {
                if total == 0 {
                    return 0.0;
                }
                let matching = self
                    .results
                    .iter()
                    .filter(|(message_id, reference)| {
                        alternative
                            .get(message_id.as_str())
                            .is_some_and(|r| r.value == reference.value)
                    })
                    .count();
                matching as f64 / total as f64
            })
            .collect()
    }

    /// Switches to the cheapest alternative that agrees with the current
    /// configuration at least `accuracy_threshold` of the time.
    ///
    /// Alternatives are assumed to be ordered from most to least expensive,
    /// so the scan starts from the last one. The chosen configuration becomes
    /// the default and every alternative up to and including it is dropped.
    /// Returns the index of the chosen alternative, or `None` when nothing
    /// qualified or a precondition was not met.
    pub fn optimize(&mut self, accuracy_threshold: f64, min_count: usize) -> Option<usize> {
        if self.alternative_results.is_empty() {
            debug!(job_id = %self.id, "No alternative results, skipping optimize");
            return None;
        }
        if self
            .alternative_results
            .iter()
            .any(|alternative| alternative.len() != self.results.len())
        {
            warn!(
                job_id = %self.id,
                results = self.results.len(),
                "Alternative results do not cover the same messages, skipping optimize"
            );
            return None;
        }
        if self.results.len() < min_count || self.results.is_empty() {
            debug!(
                job_id = %self.id,
                results = self.results.len(),
                min_count = min_count,
                "Not enough results to optimize"
            );
            return None;
        }

        let accuracies = self.alternative_accuracies();
        let chosen = accuracies
            .iter()
            .rposition(|&accuracy| accuracy >= accuracy_threshold)?;

        info!(
            job_id = %self.id,
            index = chosen,
            accuracy = accuracies[chosen],
            "Switching to alternative configuration"
        );

        self.config = self.alternative_configs[chosen].clone();
        self.alternative_configs.drain(..=chosen);
        self.alternative_results.drain(..=chosen);
        Some(chosen)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::job_config::SelectableField;
    use crate::lab::result::ResultType;

    fn always_true() -> Job {
        Job::from_function(sync_job_fn("always_true", |_, _, _| {
            Ok(Some(JobResult::boolean(true)))
        }))
    }

    fn model_echo() -> Job {
        let config = JobConfig::new().with_selectable(SelectableField::new(
            "model",
            ["large", "medium", "small", "tiny"],
        ));
        Job::from_function(sync_job_fn("model_echo", |message: &Message, config: &JobConfig, _| {
            let model = config.get_str("model").unwrap_or_default();
            // "medium" disagrees with "large" on every message.
            let value = if model == "medium" {
                format!("{}-wrong", message.content)
            } else {
                message.content.clone()
            };
            Ok(Some(JobResult::string(value)))
        }))
        .with_config(config)
    }

    #[tokio::test]
    async fn test_run_stamps_and_stores() {
        let mut job = always_true().with_metadata(
            [("event".to_string(), Value::from("reset"))]
                .into_iter()
                .collect(),
        );
        let message = Message::user("How do I reset my password?");

        let result = job.run(&message).await.expect("job succeeds");

        assert_eq!(result.job_id.as_deref(), Some("always_true"));
        assert_eq!(result.job_metadata["event"], "reset");
        assert_eq!(job.results[&message.id].value, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_none_becomes_error_result() {
        let mut job = Job::from_function(sync_job_fn("silent", |_, _, _| Ok(None)));
        let message = Message::user("hello");

        job.run(&message).await.expect("no error raised");

        let stored = &job.results[&message.id];
        assert_eq!(stored.result_type, ResultType::Error);
        assert!(stored.value.is_none());
        assert_eq!(stored.job_id.as_deref(), Some("silent"));
    }

    #[tokio::test]
    async fn test_run_propagates_errors() {
        let mut job = Job::from_function(sync_job_fn("broken", |_, _, _| {
            Err(JobError::Failed("boom".to_string()))
        }));
        let message = Message::user("hello");

        assert!(job.run(&message).await.is_err());
        assert!(job.results.is_empty());
    }

    #[tokio::test]
    async fn test_execute_isolated_contains_panics_and_timeouts() {
        let panics = sync_job_fn(
            "panicking",
            |_, _, _| -> Result<Option<JobResult>, JobError> { panic!("bad state") },
        );
        let panicking = Job::from_function(panics);
        let message = Message::user("hello");
        let result = panicking
            .execute_isolated(&message, &JobConfig::new(), None)
            .await;
        assert!(result.is_error());
        assert!(result.logs[0].as_str().unwrap_or_default().contains("bad state"));

        let slow = Job::from_function(job_fn("slow", |_, _, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(JobResult::boolean(true)))
        }));
        let result = slow
            .execute_isolated(&message, &JobConfig::new(), Some(Duration::from_millis(10)))
            .await;
        assert!(result.is_error());
        assert_eq!(result.job_id.as_deref(), Some("slow"));
    }

    #[test]
    fn test_run_blocking() {
        let mut job = always_true();
        let message = Message::user("sync caller");
        let result = job.run_blocking(&message).expect("job succeeds");
        assert_eq!(result.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_alternative_configurations_in_order() {
        let mut job = model_echo();
        assert_eq!(job.alternative_configs().len(), 3);

        let message = Message::user("hi").with_id("m1");
        let produced = job
            .run_on_alternative_configurations(&message)
            .await
            .expect("alternatives run");

        let values: Vec<_> = produced.iter().map(|r| r.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                Some(Value::from("hi-wrong")),
                Some(Value::from("hi")),
                Some(Value::from("hi")),
            ]
        );
        assert!(job.alternative_results()[0].contains_key("m1"));
    }

    #[tokio::test]
    async fn test_no_alternatives_is_noop() {
        let mut job = always_true();
        let produced = job
            .run_on_alternative_configurations(&Message::user("x"))
            .await
            .expect("nothing to run");
        assert!(produced.is_empty());
    }

    #[tokio::test]
    async fn test_optimize_picks_latest_qualifying_alternative() {
        // Alternatives: small (0), medium (1), tiny (2); medium disagrees.
        let config = JobConfig::new().with_selectable(SelectableField::new(
            "model",
            ["large", "small", "medium", "tiny"],
        ));
        let mut job = model_echo().with_config(config);

        for i in 0..3 {
            let message = Message::user(format!("q{}", i)).with_id(format!("m{}", i));
            job.run(&message).await.expect("run");
            job.run_on_alternative_configurations(&message)
                .await
                .expect("alternatives");
        }

        let accuracies = job.alternative_accuracies();
        assert_eq!(accuracies, vec![1.0, 0.0, 1.0]);

        let chosen = job.optimize(0.9, 1);
        assert_eq!(chosen, Some(2));
        assert_eq!(job.config().get_str("model"), Some("tiny"));
        assert!(job.alternative_configs().is_empty());
        assert!(job.alternative_results().is_empty());
    }

    #[tokio::test]
    async fn test_optimize_truncates_up_to_choice() {
        // Alternatives: small (0), tiny (1), medium (2); only medium disagrees.
        let config = JobConfig::new().with_selectable(SelectableField::new(
            "model",
            ["large", "small", "tiny", "medium"],
        ));
        let mut job = model_echo().with_config(config);
        for i in 0..2 {
            let message = Message::user(format!("q{}", i)).with_id(format!("m{}", i));
            job.run(&message).await.expect("run");
            job.run_on_alternative_configurations(&message)
                .await
                .expect("alternatives");
        }

        assert_eq!(job.optimize(1.0, 2), Some(1));
        assert_eq!(job.config().get_str("model"), Some("tiny"));
        assert_eq!(job.alternative_configs().len(), 1);
        assert_eq!(job.alternative_configs()[0].get_str("model"), Some("medium"));
        assert_eq!(job.alternative_results().len(), 1);
        assert_eq!(job.results.len(), 2);
    }

    #[tokio::test]
    async fn test_optimize_preconditions() {
        let mut job = model_echo();
        let message = Message::user("q").with_id("m");

        // Alternatives never ran: sizes differ.
        job.run(&message).await.expect("run");
        assert_eq!(job.optimize(0.5, 1), None);

        job.run_on_alternative_configurations(&message)
            .await
            .expect("alternatives");
        // Not enough results.
        assert_eq!(job.optimize(0.5, 5), None);
        assert_eq!(job.config().get_str("model"), Some("large"));

        // No alternatives at all.
        let mut plain = always_true();
        assert_eq!(plain.optimize(0.5, 0), None);
    }

    #[tokio::test]
    async fn test_optimize_none_qualifies() {
        let mut job = model_echo();
        let message = Message::user("q").with_id("m");
        job.run(&message).await.expect("run");
        job.run_on_alternative_configurations(&message)
            .await
            .expect("alternatives");

        assert_eq!(job.optimize(1.5, 1), None);
        assert_eq!(job.alternative_configs().len(), 3);
    }

    #[tokio::test]
    async fn test_workload_handle_sibling_reads() {
        let handle = WorkloadHandle::new(Some("project".to_string()), None);
        let mut result = JobResult::boolean(true);
        result.job_id = Some("first".to_string());
        handle.record("m1", &result).await;

        assert!(handle.result("m1", "first").await.is_some());
        assert!(handle.result("m1", "second").await.is_none());
        assert_eq!(handle.results_for("m1").await.len(), 1);
    }
}
