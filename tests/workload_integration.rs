//! End-to-end tests of workloads through the public API.

use std::io::Write;

use convolab::error::JobError;
use convolab::lab::{
    job_fn, sync_job_fn, ExecutorType, Job, JobConfig, JobContext, JobRegistry, JobResult, Message,
    ResultType, SelectableField, Workload,
};
use convolab::LabConfig;
use serde_json::Value;

fn messages(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| Message::user(format!("message number {}", i)).with_id(format!("m{}", i)))
        .collect()
}

#[tokio::test]
async fn test_single_message_end_to_end() {
    let mut workload = Workload::new();
    let always = sync_job_fn("always", |_, _, _| Ok(Some(JobResult::boolean(true))));
    workload.add_job(Job::from_function(always).with_id("always"));

    let message = Message::user("hello").with_id("msg");
    let results = workload
        .run(std::slice::from_ref(&message), ExecutorType::ParallelJobs, 4)
        .await;

    let result = &results["msg"]["always"];
    assert_eq!(result.value, Some(Value::Bool(true)));
    assert_eq!(result.job_id.as_deref(), Some("always"));
}

#[tokio::test]
async fn test_failing_job_does_not_affect_siblings() {
    for executor in [ExecutorType::Sequential, ExecutorType::Parallel, ExecutorType::ParallelJobs] {
        let mut workload = Workload::new();
        let ok = sync_job_fn("ok", |_, _, _| Ok(Some(JobResult::boolean(true))));
        workload.add_job(Job::from_function(ok).with_id("a"));
        workload.add_job(
            Job::from_function(sync_job_fn("broken", |_, _, _| {
                Err(JobError::Failed("upstream unavailable".to_string()))
            }))
            .with_id("b"),
        );

        let results = workload.run(&messages(3), executor, 2).await;
        assert_eq!(results.len(), 3, "{}", executor);
        for row in results.values() {
            assert!(!row["a"].is_error());
            assert_eq!(row["b"].result_type, ResultType::Error);
            assert!(row["b"].value.is_none());
        }
    }
}

#[tokio::test]
async fn test_jobs_read_sibling_results() {
    let mut workload = Workload::new();
    workload.add_job(
        Job::from_function(sync_job_fn("length", |message: &Message, _, _| {
            Ok(Some(JobResult::number(message.content.len() as f64)))
        }))
        .with_id("length"),
    );
    workload.add_job(
        Job::from_function(job_fn(
            "long_message",
            |message: Message, _config: JobConfig, ctx: JobContext| async move {
                let length = ctx
                    .workload
                    .result(&message.id, "length")
                    .await
                    .and_then(|r| r.value)
                    .and_then(|v| v.as_f64());
                match length {
                    Some(length) => Ok(Some(JobResult::boolean(length > 10.0))),
                    None => Err(JobError::Failed("length missing".to_string())),
                }
            },
        ))
        .with_id("long_message"),
    );

    let batch = vec![
        Message::user("short").with_id("short"),
        Message::user("a much longer message").with_id("long"),
    ];
    let results = workload.run(&batch, ExecutorType::Sequential, 1).await;

    assert_eq!(results["short"]["long_message"].as_bool(), Some(false));
    assert_eq!(results["long"]["long_message"].as_bool(), Some(true));
}

#[tokio::test]
async fn test_yaml_workload_optimizes_to_cheaper_model() {
    // "model" answers are identical for both options, so the cheaper one is adopted.
    let mut registry = JobRegistry::new();
    registry.register_with_selectable(
        sync_job_fn("classify", |message: &Message, _, _| {
            Ok(Some(JobResult::boolean(message.content.ends_with('0'))))
        }),
        vec![SelectableField::new("model", ["large", "small"])],
    );

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, "jobs:\n  classifier:\n    name: classify\n").expect("write");

    let config = LabConfig::default().with_sample_seed(7);
    let mut workload = Workload::from_yaml_file(file.path(), &registry)
        .expect("valid workload")
        .with_config(&config);

    let batch = messages(12);
    workload.run(&batch, ExecutorType::Parallel, 4).await;
    workload
        .run_on_alternative_configurations(&batch, ExecutorType::Parallel)
        .await;

    let switched = workload.optimize_jobs(0.9, 10);
    assert_eq!(switched, vec![("classifier".to_string(), 0)]);

    let job = workload.job("classifier").expect("job");
    assert_eq!(job.config().get_str("model"), Some("small"));
    assert!(job.alternative_configs().is_empty());
}

#[tokio::test]
async fn test_results_table_rendering() {
    let mut workload = Workload::new();
    workload.add_job(
        Job::from_function(sync_job_fn("upper", |message: &Message, _, _| {
            Ok(Some(JobResult::string(message.content.to_uppercase())))
        }))
        .with_id("upper"),
    );

    workload.run(&messages(2), ExecutorType::ParallelJobs, 2).await;
    let table = workload.results_table().expect("workload ran");

    let rendered = table.to_string();
    assert!(rendered.starts_with("message_id"));
    assert!(rendered.contains("MESSAGE NUMBER 1"));
}
