//! Prometheus metrics for workload runs.
//!
//! Metrics live in an instance-scoped [`LabMetrics`] with its own registry,
//! so several workloads (or tests) never fight over global state. Attach one
//! to a workload with `Workload::with_metrics` and export it with
//! [`LabMetrics::export`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use convolab::metrics::LabMetrics;
//!
//! let metrics = Arc::new(LabMetrics::new()?);
//! let mut workload = Workload::new().with_metrics(metrics.clone());
//! workload.run(&messages, ExecutorType::Parallel, 8).await;
//! println!("{}", metrics.export());
//! ```

pub mod prometheus;

pub use self::prometheus::LabMetrics;
