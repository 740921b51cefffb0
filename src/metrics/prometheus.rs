//! Prometheus metric registration and export.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Metrics recorded while a workload runs.
#[derive(Debug, Clone)]
pub struct LabMetrics {
    registry: Registry,
    /// Finished units, labeled by job id and outcome (`ok` / `error`).
    units_total: CounterVec,
    /// Units skipped by sampling, labeled by job id.
    units_skipped: CounterVec,
    /// Unit duration in seconds, labeled by job id.
    unit_duration: HistogramVec,
    /// Units currently executing.
    units_in_flight: Gauge,
}

impl LabMetrics {
    /// Creates the metrics and registers them with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric definition is invalid.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let units_total = CounterVec::new(
            Opts::new("convolab_units_total", "Job executions finished"),
            &["job_id", "outcome"],
        )?;

        let units_skipped = CounterVec::new(
            Opts::new("convolab_units_skipped_total", "Job executions skipped by sampling"),
            &["job_id"],
        )?;

        let unit_duration = HistogramVec::new(
            HistogramOpts::new(
                "convolab_unit_duration_seconds",
                "Job execution duration in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
            &["job_id"],
        )?;

        let units_in_flight = Gauge::new(
            "convolab_units_in_flight",
            "Job executions currently running",
        )?;

        registry.register(Box::new(units_total.clone()))?;
        registry.register(Box::new(units_skipped.clone()))?;
        registry.register(Box::new(unit_duration.clone()))?;
        registry.register(Box::new(units_in_flight.clone()))?;

        Ok(Self {
            registry,
            units_total,
            units_skipped,
            unit_duration,
            units_in_flight,
        })
    }

    pub(crate) fn unit_started(&self) {
        self.units_in_flight.inc();
    }

    pub(crate) fn unit_finished(&self, job_id: &str, failed: bool, duration_secs: f64) {
        self.units_in_flight.dec();
        let outcome = if failed { "error" } else { "ok" };
        self.units_total
            .with_label_values(&[job_id, outcome])
            .inc();
        self.unit_duration
            .with_label_values(&[job_id])
            .observe(duration_secs);

        tracing::trace!(
            job_id = job_id,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded unit metric"
        );
    }

    pub(crate) fn unit_skipped(&self, job_id: &str) {
        self.units_skipped.with_label_values(&[job_id]).inc();
    }

    /// Number of finished units for a job and outcome.
    pub fn units(&self, job_id: &str, outcome: &str) -> u64 {
        self.units_total
            .with_label_values(&[job_id, outcome])
            .get() as u64
    }

    /// Exports every metric in the Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}
