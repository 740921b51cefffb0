//! CLI command definitions for convolab.
//!
//! - `run`: execute a YAML workload over a JSONL file of messages
//! - `configs`: list the alternative configurations of a workload's jobs
//! - `detect`: run a project's event detection over a JSONL file of tasks

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LabConfig;
use crate::lab::{ExecutorType, JobRegistry, Message, Workload};
use crate::llm::{LiteLlmClient, LlmProvider, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::pipeline::{EventDetectionPipeline, ProjectSettings, Task, WebhookSink};

/// Batch analytics over conversation logs.
#[derive(Parser)]
#[command(name = "convolab")]
#[command(about = "Run analytics jobs over conversation messages")]
#[command(version)]
#[command(
    long_about = "convolab runs analytics jobs (event detection, evaluation) over batches of conversation messages.\n\nExample usage:\n  convolab run --workload workload.yaml --messages messages.jsonl --optimize"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a workload over a file of messages.
    Run(RunArgs),

    /// Print the alternative configurations of every job of a workload.
    Configs(ConfigsArgs),

    /// Detect a project's events in a file of logged tasks.
    Detect(DetectArgs),
}

/// Connection settings of the LLM endpoint.
#[derive(clap::Args, Debug, Clone)]
pub struct ProviderArgs {
    /// API key of the OpenAI-compatible endpoint.
    #[arg(long, env = "LITELLM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, env = "LITELLM_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,
}

/// Arguments for `convolab run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML workload file.
    #[arg(short, long)]
    pub workload: PathBuf,

    /// JSONL file with one message per line.
    #[arg(short, long)]
    pub messages: PathBuf,

    /// Execution strategy (sequential, parallel, parallel_jobs).
    #[arg(short, long)]
    pub executor: Option<ExecutorType>,

    /// Maximum number of job invocations in flight.
    #[arg(short = 'p', long)]
    pub max_parallelism: Option<usize>,

    /// Run alternative configurations and switch jobs to cheaper ones that agree.
    #[arg(long)]
    pub optimize: bool,

    /// Minimum agreement for an alternative to be adopted.
    #[arg(long)]
    pub accuracy_threshold: Option<f64>,

    /// Minimum number of results before a job may be optimized.
    #[arg(long)]
    pub min_count: Option<usize>,

    /// Output results as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Arguments for `convolab configs`.
#[derive(Parser, Debug)]
pub struct ConfigsArgs {
    /// YAML workload file.
    #[arg(short, long)]
    pub workload: PathBuf,
}

/// Arguments for `convolab detect`.
#[derive(Parser, Debug)]
pub struct DetectArgs {
    /// JSON file with the project settings and its event definitions.
    #[arg(long)]
    pub project: PathBuf,

    /// JSONL file with one task per line.
    #[arg(short, long)]
    pub tasks: PathBuf,

    /// Output the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub provider: ProviderArgs,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and execute the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_workload_command(args).await,
        Commands::Configs(args) => run_configs_command(args),
        Commands::Detect(args) => run_detect_command(args).await,
    }
}

#[derive(Debug, Serialize)]
struct OptimizedJob {
    job_id: String,
    alternative: usize,
    config: serde_json::Map<String, serde_json::Value>,
}

async fn run_workload_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = LabConfig::from_env()?;
    if let Some(executor) = args.executor {
        config = config.with_executor_type(executor);
    }
    if let Some(max) = args.max_parallelism {
        config = config.with_max_parallelism(max);
    }
    if let Some(threshold) = args.accuracy_threshold {
        config = config.with_accuracy_threshold(threshold);
    }
    if let Some(min_count) = args.min_count {
        config = config.with_min_count(min_count);
    }
    config.validate()?;

    let registry = JobRegistry::with_detectors(build_llm_client(&args.provider));
    let mut workload = load_workload(&args.workload, &registry)?.with_config(&config);
    let messages: Vec<Message> = read_jsonl(&args.messages)?;
    info!(
        jobs = workload.jobs().len(),
        messages = messages.len(),
        executor = %config.executor_type,
        "Running workload"
    );

    workload
        .run(&messages, config.executor_type, config.max_parallelism)
        .await;

    let mut optimized = Vec::new();
    if args.optimize {
        workload
            .run_on_alternative_configurations(&messages, config.executor_type)
            .await;
        let switched = workload.optimize_jobs(config.accuracy_threshold, config.min_count);
        for (job_id, alternative) in switched {
            if let Some(job) = workload.job(&job_id) {
                optimized.push(OptimizedJob {
                    config: job.config().params().clone(),
                    job_id,
                    alternative,
                });
            }
        }
    }

    let table = workload
        .results_table()
        .ok_or_else(|| anyhow::anyhow!("Workload produced no results"))?;

    if args.json {
        let output = serde_json::json!({
            "results": table,
            "optimized": optimized,
        });
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        println!("{}", table);
        if args.optimize {
            if optimized.is_empty() {
                println!("No job switched configuration");
            }
            for job in &optimized {
                println!(
                    "✓ {} switched to alternative {}: {}",
                    job.job_id,
                    job.alternative,
                    serde_json::Value::Object(job.config.clone())
                );
            }
        }
    }

    Ok(())
}

fn run_configs_command(args: ConfigsArgs) -> anyhow::Result<()> {
    // Loading never calls the provider.
    let provider = Arc::new(LiteLlmClient::new(
        DEFAULT_API_BASE.to_string(),
        None,
        DEFAULT_MODEL.to_string(),
    ));
    let registry = JobRegistry::with_detectors(provider);
    let workload = load_workload(&args.workload, &registry)?;

    for job in workload.jobs() {
        println!("{}", job.id);
        println!("  current: {}", serde_json::Value::Object(job.config().params().clone()));
        let alternatives = job.alternative_configs();
        if alternatives.is_empty() {
            println!("  no alternatives");
        }
        for (index, alternative) in alternatives.iter().enumerate() {
            println!(
                "  [{}] {}",
                index,
                serde_json::Value::Object(alternative.params().clone())
            );
        }
    }

    Ok(())
}

async fn run_detect_command(args: DetectArgs) -> anyhow::Result<()> {
    let config = LabConfig::from_env()?;
    let project_json = fs::read_to_string(&args.project).map_err(|e| {
        anyhow::anyhow!("Failed to read project file {}: {}", args.project.display(), e)
    })?;
    let project: ProjectSettings = serde_json::from_str(&project_json)?;
    let tasks: Vec<Task> = read_jsonl(&args.tasks)?;

    let pipeline = EventDetectionPipeline::new(build_llm_client(&args.provider), config)
        .with_sink(Arc::new(WebhookSink::new()));
    let report = pipeline.run(&project, &tasks).await?;

    if args.json {
        let output = serde_json::json!({
            "events": report.events,
            "errors": report.errors,
            "billable_units": report.billable_units,
            "sink_failures": report.sink_failures,
        });
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        println!("✓ Event detection completed for project {}", project.project_id);
        println!(
            "  Tasks: {}, billable units: {}, errors: {}",
            tasks.len(),
            report.billable_units,
            report.errors
        );
        for event in &report.events {
            println!(
                "  {} in task {}",
                event.event_name,
                event.task_id.as_deref().unwrap_or(&event.message_id)
            );
        }
        if report.sink_failures > 0 {
            println!("  Failed deliveries: {}", report.sink_failures);
        }
    }

    Ok(())
}

fn build_llm_client(args: &ProviderArgs) -> Arc<dyn LlmProvider> {
    if args.api_key.is_none() {
        warn!("No API key configured; LLM-backed jobs will fail unless the endpoint needs none");
    }
    info!(api_base = %args.api_base, "Using OpenAI-compatible endpoint");
    Arc::new(LiteLlmClient::new(
        args.api_base.clone(),
        args.api_key.clone(),
        DEFAULT_MODEL.to_string(),
    ))
}

fn load_workload(path: &Path, registry: &JobRegistry) -> anyhow::Result<Workload> {
    Workload::from_yaml_file(path, registry)
        .map_err(|e| anyhow::anyhow!("Failed to load workload {}: {}", path.display(), e))
}

/// Reads one JSON value per non-blank line.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                anyhow::anyhow!("{}:{}: invalid JSON line: {}", path.display(), index + 1, e)
            })
        })
        .collect()
}
