//! Workload orchestration.
//!
//! A [`Workload`] owns a set of [`Job`]s and runs them over a batch of
//! messages under one of three strategies:
//!
//! - `sequential`: job by job, message by message, one invocation at a time
//! - `parallel`: job by job, with that job's messages fanned out
//! - `parallel_jobs`: the whole job × message product fanned out at once
//!
//! The concurrent strategies share one semaphore, so `max_parallelism` is a
//! hard ceiling on in-flight job function invocations. Every unit is isolated:
//! an error, panic or timeout in one never affects its siblings and ends up
//! as an error-kind result for that (job, message) pair.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::LabConfig;
use crate::error::LabError;
use crate::metrics::LabMetrics;

use super::job::{Job, JobFunction, ResultTable, WorkloadHandle};
use super::job_config::JobConfig;
use super::message::Message;
use super::progress::{ProgressCounters, ProgressMonitor};
use super::result::JobResult;
use super::table::ResultsTable;

/// Default cap on concurrently running job invocations.
pub const DEFAULT_MAX_PARALLELISM: usize = 10;

/// Largest ceiling a semaphore can hold.
pub const MAX_PARALLELISM: usize = Semaphore::MAX_PERMITS;

fn clamp_parallelism(max_parallelism: usize) -> usize {
    max_parallelism.clamp(1, MAX_PARALLELISM)
}

/// Strategy used to schedule (job, message) units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorType {
    Sequential,
    Parallel,
    #[default]
    ParallelJobs,
}

impl ExecutorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorType::Sequential => "sequential",
            ExecutorType::Parallel => "parallel",
            ExecutorType::ParallelJobs => "parallel_jobs",
        }
    }
}

impl fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorType {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(ExecutorType::Sequential),
            "parallel" => Ok(ExecutorType::Parallel),
            "parallel_jobs" | "parallel-jobs" => Ok(ExecutorType::ParallelJobs),
            other => Err(LabError::UnknownExecutorType(other.to_string())),
        }
    }
}

/// Shared state handed to every unit of one run.
struct UnitEnv<'a> {
    handle: &'a WorkloadHandle,
    semaphore: Option<&'a Semaphore>,
    timeout: Option<Duration>,
    counters: &'a ProgressCounters,
    metrics: Option<&'a LabMetrics>,
}

impl UnitEnv<'_> {
    fn stamp(&self, mut result: JobResult) -> JobResult {
        result.project_id = self.handle.project_id.clone();
        result.org_id = self.handle.org_id.clone();
        result
    }

    /// Runs one job on one message with its current configuration.
    async fn run(&self, job: &Job, message: &Message) -> JobResult {
        let _permit = match self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        if let Some(metrics) = self.metrics {
            metrics.unit_started();
        }
        let started = Instant::now();

        let result = job
            .execute_isolated(message, job.config(), self.timeout)
            .await;
        let result = self.stamp(result);
        self.handle.record(&message.id, &result).await;

        let failed = result.is_error();
        let completed = self.counters.record(failed);
        if let Some(metrics) = self.metrics {
            metrics.unit_finished(&job.id, failed, started.elapsed().as_secs_f64());
        }

        debug!(
            job_id = %job.id,
            message_id = %message.id,
            completed = completed,
            total = self.counters.total(),
            failed = failed,
            "Unit finished"
        );

        result
    }

    /// Runs one job on one message with each alternative configuration, in
    /// enumeration order, under a single permit.
    async fn run_alternatives(&self, job: &Job, message: &Message) -> Vec<JobResult> {
        let _permit = match self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        let mut produced = Vec::with_capacity(job.alternative_configs().len());
        for config in job.alternative_configs() {
            let result = job.execute_isolated(message, config, self.timeout).await;
            produced.push(self.stamp(result));
        }

        let completed = self.counters.record(produced.iter().any(JobResult::is_error));
        debug!(
            job_id = %job.id,
            message_id = %message.id,
            alternatives = produced.len(),
            completed = completed,
            total = self.counters.total(),
            "Alternative configurations finished"
        );

        produced
    }
}

/// A collection of jobs run together over batches of messages.
pub struct Workload {
    jobs: Vec<Job>,
    results: Option<ResultTable>,
    message_order: Vec<String>,
    handle: WorkloadHandle,
    max_parallelism: usize,
    unit_timeout: Option<Duration>,
    progress_interval: Option<Duration>,
    rng: ChaCha8Rng,
    metrics: Option<Arc<LabMetrics>>,
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("jobs", &self.jobs)
            .field("project_id", &self.handle.project_id)
            .field("org_id", &self.handle.org_id)
            .field("max_parallelism", &self.max_parallelism)
            .field("has_results", &self.results.is_some())
            .finish()
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload {
    /// Creates an empty workload.
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            results: None,
            message_order: Vec::new(),
            handle: WorkloadHandle::default(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            unit_timeout: None,
            progress_interval: None,
            rng: ChaCha8Rng::from_rng(&mut rand::rng()),
            metrics: None,
        }
    }

    /// Applies the runtime options of a [`LabConfig`].
    pub fn with_config(mut self, config: &LabConfig) -> Self {
        self.max_parallelism = clamp_parallelism(config.max_parallelism);
        self.unit_timeout = config.unit_timeout;
        self.progress_interval = config.progress_interval;
        if let Some(seed) = config.sample_seed {
            self.rng = ChaCha8Rng::seed_from_u64(seed);
        }
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.handle.project_id = Some(project_id.into());
        self.reattach();
        self
    }

    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.handle.org_id = Some(org_id.into());
        self.reattach();
        self
    }

    /// Caps in-flight invocations for [`Workload::run_on_alternative_configurations`].
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = clamp_parallelism(max_parallelism);
        self
    }

    /// Converts units running longer than `timeout` into error results.
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    /// Makes the sampling gate deterministic.
    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LabMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        self.handle.project_id.as_deref()
    }

    pub fn org_id(&self) -> Option<&str> {
        self.handle.org_id.as_deref()
    }

    /// Live view shared with every job of this workload.
    pub fn handle(&self) -> &WorkloadHandle {
        &self.handle
    }

    fn reattach(&mut self) {
        for job in &mut self.jobs {
            job.attach(self.handle.clone());
        }
    }

    /// Registers a job. A job with the same id is replaced in place.
    pub fn add_job(&mut self, mut job: Job) {
        job.attach(self.handle.clone());
        match self.jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => {
                debug!(job_id = %job.id, "Replacing job");
                *existing = job;
            }
            None => self.jobs.push(job),
        }
    }

    /// Wraps a job function in a [`Job`] and registers it.
    ///
    /// The id defaults to the function's name.
    pub fn add_function(
        &mut self,
        function: impl JobFunction + 'static,
        config: JobConfig,
        id: Option<String>,
        metadata: Map<String, Value>,
    ) {
        let mut job = Job::from_function(function)
            .with_config(config)
            .with_metadata(metadata);
        if let Some(id) = id {
            job = job.with_id(id);
        }
        self.add_job(job);
    }

    /// Jobs in insertion order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    fn sampled(&mut self, sample: f64) -> bool {
        if sample >= 1.0 {
            return true;
        }
        self.rng.random::<f64>() < sample
    }

    /// Draws the sampling gate for every (job, message) pair, job-major.
    fn plan(&mut self, message_count: usize) -> (Vec<(usize, usize)>, usize) {
        let mut units = Vec::with_capacity(self.jobs.len() * message_count);
        let mut skipped = 0;
        for j in 0..self.jobs.len() {
            let sample = self.jobs[j].sample();
            for m in 0..message_count {
                if self.sampled(sample) {
                    units.push((j, m));
                } else {
                    skipped += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.unit_skipped(&self.jobs[j].id);
                    }
                }
            }
        }
        (units, skipped)
    }

    /// Runs every job on every message and returns the aggregated results.
    ///
    /// Pairs rejected by a job's sampling rate produce no entry. Failures of
    /// individual units are recorded as error results and never abort the
    /// run.
    pub async fn run(
        &mut self,
        messages: &[Message],
        executor: ExecutorType,
        max_parallelism: usize,
    ) -> &ResultTable {
        let max_parallelism = clamp_parallelism(max_parallelism);
        self.handle.clear().await;

        let (units, skipped) = self.plan(messages.len());

        let counters = ProgressCounters::new();
        counters.add_scheduled(units.len());
        counters.add_skipped(skipped);

        info!(
            executor = %executor,
            jobs = self.jobs.len(),
            messages = messages.len(),
            units = units.len(),
            skipped = skipped,
            max_parallelism = max_parallelism,
            "Starting workload run"
        );

        let monitor = self
            .progress_interval
            .map(|interval| ProgressMonitor::start(counters.clone(), "run", interval));
        let started = Instant::now();

        let semaphore = Semaphore::new(max_parallelism);
        let env = UnitEnv {
            handle: &self.handle,
            semaphore: match executor {
                ExecutorType::Sequential => None,
                _ => Some(&semaphore),
            },
            timeout: self.unit_timeout,
            counters: &counters,
            metrics: self.metrics.as_deref(),
        };

        let jobs = &self.jobs;
        let mut produced: Vec<(usize, usize, JobResult)> = Vec::with_capacity(units.len());

        match executor {
            ExecutorType::Sequential => {
                for &(j, m) in &units {
                    let result = env.run(&jobs[j], &messages[m]).await;
                    produced.push((j, m, result));
                }
            }
            ExecutorType::Parallel => {
                for j in 0..jobs.len() {
                    let futures = units
                        .iter()
                        .filter(|(unit_job, _)| *unit_job == j)
                        .map(|&(j, m)| {
                            let env = &env;
                            async move { (j, m, env.run(&jobs[j], &messages[m]).await) }
                        });
                    produced.extend(join_all(futures).await);
                }
            }
            ExecutorType::ParallelJobs => {
                let futures = units.iter().map(|&(j, m)| {
                    let env = &env;
                    async move { (j, m, env.run(&jobs[j], &messages[m]).await) }
                });
                produced.extend(join_all(futures).await);
            }
        }

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }

        for (j, m, result) in produced {
            self.jobs[j].record(&messages[m].id, result);
        }

        let mut table: ResultTable = HashMap::new();
        for &(j, m) in &units {
            let job = &self.jobs[j];
            let message_id = &messages[m].id;
            if let Some(result) = job.results.get(message_id) {
                table
                    .entry(message_id.clone())
                    .or_default()
                    .insert(job.id.clone(), result.clone());
            }
        }

        let snapshot = counters.snapshot(started);
        info!(
            executor = %executor,
            completed = snapshot.completed(),
            failed = snapshot.failed,
            skipped = snapshot.skipped,
            elapsed_ms = snapshot.elapsed.as_millis() as u64,
            "Workload run finished"
        );

        self.message_order = messages.iter().map(|m| m.id.clone()).collect();
        &*self.results.insert(table)
    }

    /// Blocking version of [`Workload::run`] for callers outside a runtime.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Io` if the runtime cannot be started.
    pub fn run_blocking(
        &mut self,
        messages: &[Message],
        executor: ExecutorType,
        max_parallelism: usize,
    ) -> Result<ResultTable, LabError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime
            .block_on(self.run(messages, executor, max_parallelism))
            .clone())
    }

    /// Runs every job's alternative configurations over the messages.
    ///
    /// Each job only revisits the messages its current configuration has a
    /// result for, so the comparison done by [`Workload::optimize_jobs`]
    /// covers the same set. A job that has not run yet uses every message.
    /// `parallel_jobs` is treated as `parallel`. Results stay in each job.
    pub async fn run_on_alternative_configurations(
        &mut self,
        messages: &[Message],
        executor: ExecutorType,
    ) {
        let executor = match executor {
            ExecutorType::ParallelJobs => {
                warn!(
                    "parallel_jobs is not supported for alternative configurations, using parallel"
                );
                ExecutorType::Parallel
            }
            other => other,
        };

        let semaphore = Semaphore::new(clamp_parallelism(self.max_parallelism));
        let counters = ProgressCounters::new();

        for j in 0..self.jobs.len() {
            let job = &self.jobs[j];
            if job.alternative_configs().is_empty() {
                debug!(job_id = %job.id, "No alternative configurations to run");
                continue;
            }

            let targets: Vec<&Message> = if job.results.is_empty() {
                messages.iter().collect()
            } else {
                messages
                    .iter()
                    .filter(|m| job.results.contains_key(&m.id))
                    .collect()
            };
            counters.add_scheduled(targets.len());

            info!(
                job_id = %job.id,
                executor = %executor,
                alternatives = job.alternative_configs().len(),
                messages = targets.len(),
                "Running alternative configurations"
            );

            let env = UnitEnv {
                handle: &self.handle,
                semaphore: match executor {
                    ExecutorType::Sequential => None,
                    _ => Some(&semaphore),
                },
                timeout: self.unit_timeout,
                counters: &counters,
                metrics: None,
            };

            let produced: Vec<(String, Vec<JobResult>)> = match executor {
                ExecutorType::Sequential => {
                    let mut produced = Vec::with_capacity(targets.len());
                    for message in &targets {
                        let outcome = env.run_alternatives(job, message).await;
                        produced.push((message.id.clone(), outcome));
                    }
                    produced
                }
                _ => {
                    let futures = targets.iter().map(|message| {
                        let env = &env;
                        async move {
                            (message.id.clone(), env.run_alternatives(job, message).await)
                        }
                    });
                    join_all(futures).await
                }
            };

            let job = &mut self.jobs[j];
            for (message_id, results) in produced {
                job.record_alternatives(&message_id, results);
            }
        }
    }

    /// Runs [`Job::optimize`] on every job and returns the ids of the jobs
    /// that switched configuration, with the index of the chosen alternative.
    pub fn optimize_jobs(
        &mut self,
        accuracy_threshold: f64,
        min_count: usize,
    ) -> Vec<(String, usize)> {
        self.jobs
            .iter_mut()
            .filter_map(|job| {
                job.optimize(accuracy_threshold, min_count)
                    .map(|index| (job.id.clone(), index))
            })
            .collect()
    }

    /// Results of the last run, `None` (with a warning) if nothing ran yet.
    pub fn results(&self) -> Option<&ResultTable> {
        if self.results.is_none() {
            warn!("Workload results requested before any run");
        }
        self.results.as_ref()
    }

    /// Values of the last run as a message × job table.
    ///
    /// Rows follow the message order of the run and columns the job
    /// insertion order. `None` (with a warning) if nothing ran yet.
    pub fn results_table(&self) -> Option<ResultsTable> {
        let results = self.results()?;
        let job_ids: Vec<String> = self.jobs.iter().map(|job| job.id.clone()).collect();
        Some(ResultsTable::from_results(results, &self.message_order, &job_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::lab::job::{job_fn, sync_job_fn, JobContext};
    use crate::lab::job_config::SelectableField;
    use crate::lab::result::ResultType;
    use crate::lab::table::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::user(format!("message {}", i)).with_id(format!("m{}", i)))
            .collect()
    }

    fn constant(name: &str, value: bool) -> Job {
        Job::from_function(sync_job_fn(name, move |_, _, _| {
            Ok(Some(JobResult::boolean(value)))
        }))
    }

    #[test]
    fn test_executor_type_parse() {
        assert_eq!("parallel".parse::<ExecutorType>().ok(), Some(ExecutorType::Parallel));
        assert_eq!(
            "parallel_jobs".parse::<ExecutorType>().ok(),
            Some(ExecutorType::ParallelJobs)
        );
        assert!(matches!(
            "threads".parse::<ExecutorType>(),
            Err(LabError::UnknownExecutorType(_))
        ));
        assert_eq!(ExecutorType::Sequential.to_string(), "sequential");
        assert_eq!(ExecutorType::default(), ExecutorType::ParallelJobs);
    }

    #[tokio::test]
    async fn test_results_before_run_is_none() {
        let workload = Workload::new();
        assert!(workload.results().is_none());
        assert!(workload.results_table().is_none());
    }

    #[tokio::test]
    async fn test_add_job_replaces_same_id() {
        let mut workload = Workload::new();
        workload.add_job(constant("detector", false));
        workload.add_job(constant("other", false));
        workload.add_job(constant("detector", true));

        assert_eq!(workload.jobs().len(), 2);
        assert_eq!(workload.jobs()[0].id, "detector");

        let msgs = messages(1);
        let results = workload.run(&msgs, ExecutorType::Sequential, 1).await;
        assert_eq!(results["m0"]["detector"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_full_product_for_every_executor() {
        for executor in [
            ExecutorType::Sequential,
            ExecutorType::Parallel,
            ExecutorType::ParallelJobs,
        ] {
            let mut workload = Workload::new();
            workload.add_job(constant("a", true));
            workload.add_job(constant("b", false));
            workload.add_job(constant("c", true));

            let msgs = messages(4);
            let results = workload.run(&msgs, executor, 3).await;

            assert_eq!(results.len(), 4, "executor {}", executor);
            for by_job in results.values() {
                assert_eq!(by_job.len(), 3);
            }
        }
    }

    #[tokio::test]
    async fn test_sampling_extremes() {
        let mut workload = Workload::new();
        workload.add_job(constant("never", true).with_sample(0.0).expect("valid sample"));
        let msgs = messages(5);
        assert!(workload.run(&msgs, ExecutorType::ParallelJobs, 4).await.is_empty());
        assert!(workload.jobs()[0].results.is_empty());

        let mut workload = Workload::new();
        workload.add_job(constant("always", true).with_sample(1.0).expect("valid sample"));
        let results = workload.run(&msgs, ExecutorType::ParallelJobs, 4).await;
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn test_seeded_sampling_is_reproducible() {
        let msgs = messages(40);
        let mut picked = Vec::new();
        for _ in 0..2 {
            let mut workload = Workload::new().with_sample_seed(7);
            workload.add_job(constant("half", true).with_sample(0.5).expect("valid sample"));
            let results = workload.run(&msgs, ExecutorType::Sequential, 1).await;
            let mut ids: Vec<String> = results.keys().cloned().collect();
            ids.sort();
            picked.push(ids);
        }
        assert_eq!(picked[0], picked[1]);
        assert!(!picked[0].is_empty() && picked[0].len() < 40);
    }

    fn tracked(name: &str, current: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Job {
        let current = current.clone();
        let peak = peak.clone();
        Job::from_function(job_fn(name, move |_, _, _| {
            let current = current.clone();
            let peak = peak.clone();
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(JobResult::boolean(true)))
            }
        }))
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        for executor in [ExecutorType::Parallel, ExecutorType::ParallelJobs] {
            let current = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let mut workload = Workload::new();
            workload.add_job(tracked("first", &current, &peak));
            workload.add_job(tracked("second", &current, &peak));

            let msgs = messages(12);
            let results = workload.run(&msgs, executor, 3).await;

            assert_eq!(results.len(), 12, "executor {}", executor);
            let observed = peak.load(Ordering::SeqCst);
            assert!(observed <= 3, "{}: observed {} concurrent units", executor, observed);
            assert!(observed > 1, "{}: units never overlapped", executor);
        }
    }

    #[tokio::test]
    async fn test_parallel_runs_one_job_at_a_time() {
        let log: Arc<std::sync::Mutex<Vec<(String, &'static str)>>> = Arc::default();

        let logged = |name: &str| {
            let log = log.clone();
            Job::from_function(job_fn(name, move |_, _, ctx: JobContext| {
                let log = log.clone();
                async move {
                    log.lock().expect("log lock").push((ctx.job_id.clone(), "start"));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().expect("log lock").push((ctx.job_id, "end"));
                    Ok(Some(JobResult::boolean(true)))
                }
            }))
        };

        let mut workload = Workload::new();
        workload.add_job(logged("first"));
        workload.add_job(logged("second"));

        let msgs = messages(6);
        workload.run(&msgs, ExecutorType::Parallel, 4).await;

        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 24);
        let last_first_end = log
            .iter()
            .rposition(|(job, event)| job == "first" && *event == "end")
            .expect("first job ran");
        let first_second_start = log
            .iter()
            .position(|(job, event)| job == "second" && *event == "start")
            .expect("second job ran");
        assert!(
            last_first_end < first_second_start,
            "second job started before the first one finished"
        );
    }

    #[tokio::test]
    async fn test_parallelism_above_semaphore_limit_is_clamped() {
        let mut workload = Workload::new().with_max_parallelism(usize::MAX);
        workload.add_job(constant("flag", true));

        let msgs = messages(3);
        for executor in [ExecutorType::Parallel, ExecutorType::ParallelJobs] {
            let results = workload.run(&msgs, executor, usize::MAX).await;
            assert_eq!(results.len(), 3, "executor {}", executor);
        }

        let config = JobConfig::new().with_selectable(SelectableField::new("mode", ["a", "b"]));
        workload.add_job(constant("modes", true).with_config(config));
        workload
            .run_on_alternative_configurations(&msgs, ExecutorType::Parallel)
            .await;
        let modes = workload.job("modes").expect("job registered");
        assert_eq!(modes.alternative_results()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let mut workload = Workload::new();
        workload.add_job(constant("ok", true));
        workload.add_job(Job::from_function(sync_job_fn("broken", |_, _, _| {
            Err(JobError::Failed("provider unavailable".to_string()))
        })));
        workload.add_job(Job::from_function(sync_job_fn(
            "panicking",
            |_, _, _| -> Result<Option<JobResult>, JobError> { panic!("unexpected input") },
        )));

        let msgs = messages(2);
        let results = workload.run(&msgs, ExecutorType::ParallelJobs, 2).await;

        for message in &msgs {
            let by_job = &results[&message.id];
            assert!(!by_job["ok"].is_error());
            assert_eq!(by_job["broken"].result_type, ResultType::Error);
            assert!(by_job["broken"].value.is_none());
            assert_eq!(by_job["panicking"].result_type, ResultType::Error);
        }
    }

    #[tokio::test]
    async fn test_unit_timeout() {
        let mut workload = Workload::new().with_unit_timeout(Duration::from_millis(20));
        workload.add_job(Job::from_function(job_fn("hung", |_, _, _| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Some(JobResult::boolean(true)))
        })));
        workload.add_job(constant("fast", true));

        let msgs = messages(1);
        let results = workload.run(&msgs, ExecutorType::Parallel, 2).await;
        assert!(results["m0"]["hung"].is_error());
        assert!(!results["m0"]["fast"].is_error());
    }

    #[tokio::test]
    async fn test_ids_stamped_on_results() {
        let mut workload = Workload::new()
            .with_project_id("project-1")
            .with_org_id("org-1");
        workload.add_job(constant("flag", true));

        let msgs = messages(1);
        let results = workload.run(&msgs, ExecutorType::Sequential, 1).await;
        let result = &results["m0"]["flag"];
        assert_eq!(result.project_id.as_deref(), Some("project-1"));
        assert_eq!(result.org_id.as_deref(), Some("org-1"));
        assert_eq!(result.job_id.as_deref(), Some("flag"));
    }

    #[tokio::test]
    async fn test_sequential_jobs_read_sibling_results() {
        let mut workload = Workload::new();
        workload.add_job(constant("first", true));
        workload.add_job(Job::from_function(job_fn("second", |message, _, ctx| async move {
            let first = ctx.workload.result(&message.id, "first").await;
            Ok(Some(JobResult::boolean(
                first.and_then(|r| r.as_bool()).unwrap_or(false),
            )))
        })));

        let msgs = messages(2);
        let results = workload.run(&msgs, ExecutorType::Sequential, 1).await;
        assert_eq!(results["m1"]["second"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_alternatives_and_optimize_jobs() {
        let config = JobConfig::new().with_selectable(SelectableField::new(
            "model",
            ["large", "broken", "small"],
        ));
        let echo = sync_job_fn("echo", |message: &Message, config: &JobConfig, _| {
            match config.get_str("model") {
                Some("broken") => Err(JobError::Failed("model offline".to_string())),
                _ => Ok(Some(JobResult::string(message.content.clone()))),
            }
        });
        let job = Job::from_function(echo).with_config(config);

        let mut workload = Workload::new().with_max_parallelism(2);
        workload.add_job(job);
        workload.add_job(constant("plain", true));

        let msgs = messages(3);
        workload.run(&msgs, ExecutorType::ParallelJobs, 2).await;
        workload
            .run_on_alternative_configurations(&msgs, ExecutorType::ParallelJobs)
            .await;

        let echo = workload.job("echo").expect("job registered");
        assert_eq!(echo.alternative_results().len(), 2);
        assert_eq!(echo.alternative_results()[0].len(), 3);
        assert!(echo.alternative_results()[0]["m0"].is_error());
        assert_eq!(echo.alternative_accuracies(), vec![0.0, 1.0]);

        let switched = workload.optimize_jobs(0.9, 3);
        assert_eq!(switched, vec![("echo".to_string(), 1)]);
        let echo = workload.job("echo").expect("job registered");
        assert_eq!(echo.config().get_str("model"), Some("small"));
        assert!(echo.alternative_configs().is_empty());
    }

    #[tokio::test]
    async fn test_results_table_marks_missing() {
        let mut workload = Workload::new();
        workload.add_job(constant("always", true));
        workload.add_job(constant("never", true).with_sample(0.0).expect("valid sample"));

        let msgs = messages(2);
        workload.run(&msgs, ExecutorType::Sequential, 1).await;

        let table = workload.results_table().expect("run completed");
        assert_eq!(table.job_ids, vec!["always".to_string(), "never".to_string()]);
        assert_eq!(table.get("m0", "always"), Some(&Cell::Value(Value::Bool(true))));
        assert_eq!(table.get("m1", "never"), Some(&Cell::Missing));
    }

    #[test]
    fn test_run_blocking() {
        let mut workload = Workload::new();
        workload.add_job(constant("flag", true));
        let results = workload
            .run_blocking(&messages(2), ExecutorType::Parallel, 2)
            .expect("runtime starts");
        assert_eq!(results.len(), 2);
    }
}
