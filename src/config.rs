//! Runtime configuration for workload runs.
//!
//! [`LabConfig`] gathers the knobs that control how a workload executes:
//! concurrency, per-unit timeouts, progress reporting, sampling seed and the
//! optimization thresholds.

use std::time::Duration;

use thiserror::Error;

use crate::lab::{ExecutorType, MAX_PARALLELISM};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for workload execution.
#[derive(Debug, Clone, PartialEq)]
pub struct LabConfig {
    /// Maximum number of job invocations in flight at once.
    pub max_parallelism: usize,
    /// Strategy used when none is given explicitly.
    pub executor_type: ExecutorType,
    /// Per-unit timeout; a unit running longer becomes an error result.
    pub unit_timeout: Option<Duration>,
    /// Interval of the periodic progress log, disabled when `None`.
    pub progress_interval: Option<Duration>,
    /// Minimum agreement for an alternative configuration to be adopted.
    pub accuracy_threshold: f64,
    /// Minimum number of results before a job may be optimized.
    pub min_count: usize,
    /// Seed for the sampling gate.
    pub sample_seed: Option<u64>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            executor_type: ExecutorType::ParallelJobs,
            unit_timeout: None,
            progress_interval: None,
            accuracy_threshold: 0.9,
            min_count: 10,
            sample_seed: None,
        }
    }
}

impl LabConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LAB_MAX_PARALLELISM`: Maximum in-flight invocations (default: 10)
    /// - `LAB_EXECUTOR_TYPE`: `sequential`, `parallel` or `parallel_jobs` (default: parallel_jobs)
    /// - `LAB_UNIT_TIMEOUT_SECS`: Per-unit timeout in seconds (default: none)
    /// - `LAB_PROGRESS_INTERVAL_SECS`: Progress log interval in seconds (default: none)
    /// - `LAB_ACCURACY_THRESHOLD`: Optimization threshold (default: 0.9)
    /// - `LAB_MIN_COUNT`: Minimum results before optimizing (default: 10)
    /// - `LAB_SAMPLE_SEED`: Seed for deterministic sampling (default: none)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("LAB_MAX_PARALLELISM") {
            config.max_parallelism = parse_env_value(&val, "LAB_MAX_PARALLELISM")?;
        }

        if let Some(val) = lookup("LAB_EXECUTOR_TYPE") {
            config.executor_type = val.parse().map_err(|e: crate::error::LabError| {
                ConfigError::InvalidValue {
                    key: "LAB_EXECUTOR_TYPE".to_string(),
                    message: e.to_string(),
                }
            })?;
        }

        if let Some(val) = lookup("LAB_UNIT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "LAB_UNIT_TIMEOUT_SECS")?;
            config.unit_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(val) = lookup("LAB_PROGRESS_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "LAB_PROGRESS_INTERVAL_SECS")?;
            config.progress_interval = Some(Duration::from_secs(secs));
        }

        if let Some(val) = lookup("LAB_ACCURACY_THRESHOLD") {
            config.accuracy_threshold = parse_env_value(&val, "LAB_ACCURACY_THRESHOLD")?;
        }

        if let Some(val) = lookup("LAB_MIN_COUNT") {
            config.min_count = parse_env_value(&val, "LAB_MIN_COUNT")?;
        }

        if let Some(val) = lookup("LAB_SAMPLE_SEED") {
            config.sample_seed = Some(parse_env_value(&val, "LAB_SAMPLE_SEED")?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallelism must be greater than 0".to_string(),
            ));
        }

        if self.max_parallelism > MAX_PARALLELISM {
            return Err(ConfigError::ValidationFailed(format!(
                "max_parallelism must be at most {}",
                MAX_PARALLELISM
            )));
        }

        if !(0.0..=1.0).contains(&self.accuracy_threshold) {
            return Err(ConfigError::ValidationFailed(
                "accuracy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.unit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "unit_timeout must be greater than 0".to_string(),
            ));
        }

        if self.progress_interval.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "progress_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max;
        self
    }

    pub fn with_executor_type(mut self, executor_type: ExecutorType) -> Self {
        self.executor_type = executor_type;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn with_accuracy_threshold(mut self, threshold: f64) -> Self {
        self.accuracy_threshold = threshold;
        self
    }

    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = LabConfig::default();
        assert_eq!(config.max_parallelism, 10);
        assert_eq!(config.executor_type, ExecutorType::ParallelJobs);
        assert!(config.unit_timeout.is_none());
        assert!((config.accuracy_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.min_count, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = LabConfig::new()
            .with_max_parallelism(4)
            .with_executor_type(ExecutorType::Sequential)
            .with_unit_timeout(Duration::from_secs(30))
            .with_accuracy_threshold(0.75)
            .with_min_count(3)
            .with_sample_seed(42);

        assert_eq!(config.max_parallelism, 4);
        assert_eq!(config.executor_type, ExecutorType::Sequential);
        assert_eq!(config.unit_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.min_count, 3);
        assert_eq!(config.sample_seed, Some(42));
    }

    #[test]
    fn test_from_lookup() {
        let config = LabConfig::from_lookup(lookup_from(&[
            ("LAB_MAX_PARALLELISM", "3"),
            ("LAB_EXECUTOR_TYPE", "parallel"),
            ("LAB_UNIT_TIMEOUT_SECS", "20"),
            ("LAB_ACCURACY_THRESHOLD", "0.8"),
            ("LAB_SAMPLE_SEED", "9"),
        ]))
        .expect("valid environment");

        assert_eq!(config.max_parallelism, 3);
        assert_eq!(config.executor_type, ExecutorType::Parallel);
        assert_eq!(config.unit_timeout, Some(Duration::from_secs(20)));
        assert_eq!(config.sample_seed, Some(9));
        assert_eq!(config.min_count, 10);
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let result = LabConfig::from_lookup(lookup_from(&[("LAB_MAX_PARALLELISM", "many")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = LabConfig::from_lookup(lookup_from(&[("LAB_EXECUTOR_TYPE", "threads")]));
        assert!(result.unwrap_err().to_string().contains("LAB_EXECUTOR_TYPE"));

        let result = LabConfig::from_lookup(lookup_from(&[("LAB_MAX_PARALLELISM", "0")]));
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_validation_invalid_threshold() {
        let result = LabConfig::default().with_accuracy_threshold(1.5).validate();
        assert!(result.unwrap_err().to_string().contains("accuracy_threshold"));
    }

    #[test]
    fn test_validation_zero_timeout() {
        let result = LabConfig::default()
            .with_unit_timeout(Duration::ZERO)
            .validate();
        assert!(result.unwrap_err().to_string().contains("unit_timeout"));
    }

    #[test]
    fn test_validation_parallelism_above_semaphore_limit() {
        let result = LabConfig::default().with_max_parallelism(usize::MAX).validate();
        assert!(result.unwrap_err().to_string().contains("max_parallelism"));

        assert!(LabConfig::default()
            .with_max_parallelism(MAX_PARALLELISM)
            .validate()
            .is_ok());
    }
}
