//! Loading workloads from YAML.
//!
//! ```yaml
//! jobs:
//!   refund:
//!     name: keyword_detection        # registered job function
//!     config:
//!       keywords: refund, money back
//!   frustration:
//!     name: llm_detection
//!     sample: 0.25
//!     config:
//!       event_name: frustration
//!       event_description: The user is frustrated
//!     selectable:
//!       - name: model
//!         options: [openai/gpt-4o, openai/gpt-4o-mini]
//! ```
//!
//! Job ids are the mapping keys; jobs are registered in key order.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::LabError;

use super::job::{Job, JobFunction};
use super::job_config::{JobConfig, SelectableField};
use super::workload::Workload;

/// Parsed contents of a workload file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSpec>,
}

/// One job entry of a workload file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Name of the registered job function.
    pub name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Overrides the function's default selectable fields by name.
    #[serde(default)]
    pub selectable: Vec<SelectableField>,
    #[serde(default)]
    pub sample: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkloadSpec {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, LabError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

struct RegisteredFunction {
    function: Arc<dyn JobFunction>,
    selectable: Vec<SelectableField>,
}

/// Job functions available to workload files, by name.
#[derive(Default)]
pub struct JobRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under its own name.
    pub fn register(&mut self, function: impl JobFunction + 'static) -> &mut Self {
        self.register_with_selectable(function, Vec::new())
    }

    /// Registers a function together with the selectable fields every job
    /// using it explores by default.
    pub fn register_with_selectable(
        &mut self,
        function: impl JobFunction + 'static,
        selectable: Vec<SelectableField>,
    ) -> &mut Self {
        let function: Arc<dyn JobFunction> = Arc::new(function);
        self.functions.insert(
            function.name().to_string(),
            RegisteredFunction {
                function,
                selectable,
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the job described by `spec` under the id `id`.
    ///
    /// # Errors
    ///
    /// `LabError::UnknownJobFunction` for unregistered names,
    /// `LabError::InvalidConfig` / `LabError::InvalidSample` for bad values.
    pub fn build_job(&self, id: &str, spec: &JobSpec) -> Result<Job, LabError> {
        let registered = self
            .functions
            .get(&spec.name)
            .ok_or_else(|| LabError::UnknownJobFunction(spec.name.clone()))?;

        let mut fields = registered.selectable.clone();
        for field in &spec.selectable {
            match fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => *existing = field.clone(),
                None => fields.push(field.clone()),
            }
        }

        let mut config = JobConfig::from_params(spec.config.clone());
        for field in fields {
            config = config.with_selectable(field);
        }
        config
            .validate()
            .map_err(|e| LabError::InvalidConfig(format!("job '{}': {}", id, e)))?;

        let mut job = Job::new(registered.function.clone())
            .with_id(id)
            .with_config(config)
            .with_metadata(spec.metadata.clone());
        if let Some(sample) = spec.sample {
            job = job.with_sample(sample)?;
        }
        Ok(job)
    }
}

impl Workload {
    /// Builds a workload from a parsed spec.
    pub fn from_spec(spec: &WorkloadSpec, registry: &JobRegistry) -> Result<Self, LabError> {
        let mut workload = Workload::new();
        for (id, job_spec) in &spec.jobs {
            workload.add_job(registry.build_job(id, job_spec)?);
        }
        info!(jobs = workload.jobs().len(), "Loaded workload");
        Ok(workload)
    }

    /// Builds a workload from YAML text.
    pub fn from_yaml_str(yaml: &str, registry: &JobRegistry) -> Result<Self, LabError> {
        Self::from_spec(&WorkloadSpec::from_yaml_str(yaml)?, registry)
    }

    /// Builds a workload from a YAML file.
    pub fn from_yaml_file(
        path: impl AsRef<Path>,
        registry: &JobRegistry,
    ) -> Result<Self, LabError> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&yaml, registry)
    }
}
