//! Built-in job functions for event detection and evaluation.
//!
//! Each project configures a list of [`EventDefinition`]s. Every definition
//! becomes one [`Job`] whose function depends on its detection engine:
//!
//! | engine              | job function          |
//! |---------------------|-----------------------|
//! | `keyword_detection` | [`KeywordDetector`]   |
//! | `regex_detection`   | [`RegexDetector`]     |
//! | `llm_detection`     | [`LlmDetector`]       |
//!
//! The portion of the conversation a detector looks at is chosen by its
//! [`DetectionScope`].

pub mod evaluator;
pub mod keyword;
pub mod llm;
pub mod pattern;
pub mod scope;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::LabError;
use crate::lab::{Job, JobConfig, JobRegistry, SelectableField, Workload};
use crate::llm::LlmProvider;

pub use evaluator::LlmEvaluator;
pub use keyword::KeywordDetector;
pub use llm::LlmDetector;
pub use pattern::RegexDetector;
pub use scope::{scoped_text, DetectionScope};

/// Models explored when optimizing LLM-backed jobs, most expensive first.
pub const DEFAULT_MODELS: [&str; 2] = ["openai/gpt-4o", "openai/gpt-4o-mini"];

/// How an event is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionEngine {
    LlmDetection,
    KeywordDetection,
    RegexDetection,
}

impl DetectionEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionEngine::LlmDetection => "llm_detection",
            DetectionEngine::KeywordDetection => "keyword_detection",
            DetectionEngine::RegexDetection => "regex_detection",
        }
    }
}

impl fmt::Display for DetectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionEngine {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_detection" => Ok(DetectionEngine::LlmDetection),
            "keyword_detection" => Ok(DetectionEngine::KeywordDetection),
            "regex_detection" => Ok(DetectionEngine::RegexDetection),
            other => Err(LabError::InvalidConfig(format!(
                "unsupported detection engine '{}'",
                other
            ))),
        }
    }
}

fn default_engine() -> String {
    DetectionEngine::LlmDetection.as_str().to_string()
}

fn default_scope() -> String {
    DetectionScope::Task.as_str().to_string()
}

/// A project's description of one event to detect.
///
/// Engine and scope are kept as plain strings so that definitions written by
/// newer producers still load; unsupported values are reported when the job
/// is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_engine")]
    pub detection_engine: String,
    #[serde(default = "default_scope")]
    pub detection_scope: String,
    /// Comma-separated keywords for `keyword_detection`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_pattern: Option<String>,
    /// Preferred model for `llm_detection`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint notified when the event is detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl EventDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            detection_engine: default_engine(),
            detection_scope: default_scope(),
            keywords: None,
            regex_pattern: None,
            model: None,
            webhook_url: None,
        }
    }

    pub fn keyword_detection(name: impl Into<String>, keywords: impl Into<String>) -> Self {
        let mut definition = Self::new(name, "");
        definition.detection_engine = DetectionEngine::KeywordDetection.as_str().to_string();
        definition.keywords = Some(keywords.into());
        definition
    }

    pub fn regex_detection(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        let mut definition = Self::new(name, "");
        definition.detection_engine = DetectionEngine::RegexDetection.as_str().to_string();
        definition.regex_pattern = Some(pattern.into());
        definition
    }

    pub fn with_scope(mut self, scope: DetectionScope) -> Self {
        self.detection_scope = scope.as_str().to_string();
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn engine(&self) -> Result<DetectionEngine, LabError> {
        self.detection_engine.parse()
    }

    pub fn scope(&self) -> Result<DetectionScope, LabError> {
        self.detection_scope.parse()
    }

    fn as_metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// The `model` selectable field, with `preferred` first when given.
pub fn model_field(preferred: Option<&str>) -> SelectableField {
    let mut options: Vec<String> = Vec::new();
    if let Some(model) = preferred {
        options.push(model.to_string());
    }
    for model in DEFAULT_MODELS {
        if !options.iter().any(|o| o == model) {
            options.push(model.to_string());
        }
    }
    SelectableField::new("model", options)
}

fn build_config(
    definition: &EventDefinition,
    engine: DetectionEngine,
    scope: DetectionScope,
) -> Result<JobConfig, LabError> {
    let config = JobConfig::new().with_param("detection_scope", scope.as_str());

    match engine {
        DetectionEngine::KeywordDetection => {
            let keywords = definition
                .keywords
                .as_deref()
                .filter(|k| keyword::parse_keywords(k).next().is_some())
                .ok_or_else(|| LabError::InvalidConfig("no keywords configured".to_string()))?;
            Ok(config.with_param("keywords", keywords))
        }
        DetectionEngine::RegexDetection => {
            let pattern = definition
                .regex_pattern
                .as_deref()
                .ok_or_else(|| LabError::InvalidConfig("no regex_pattern configured".to_string()))?;
            ::regex::Regex::new(pattern)
                .map_err(|e| LabError::InvalidConfig(format!("invalid regex_pattern: {}", e)))?;
            Ok(config.with_param("regex_pattern", pattern))
        }
        DetectionEngine::LlmDetection => Ok(config
            .with_param("event_name", definition.name.as_str())
            .with_param("event_description", definition.description.as_str())
            .with_selectable(model_field(definition.model.as_deref()))),
    }
}

/// Builds the job detecting one event.
///
/// The job id is the definition's name and its metadata the definition
/// itself. Returns `None`, with a warning, for unsupported engines or
/// scopes and for definitions missing their engine's parameters.
pub fn build_detector_job(
    definition: &EventDefinition,
    provider: Arc<dyn LlmProvider>,
) -> Option<Job> {
    let engine_and_scope = definition.engine().and_then(|engine| {
        let scope = definition.scope()?;
        Ok((engine, scope))
    });
    let (engine, scope) = match engine_and_scope {
        Ok(pair) => pair,
        Err(e) => {
            warn!(event = %definition.name, error = %e, "Skipping event definition");
            return None;
        }
    };

    let config = match build_config(definition, engine, scope) {
        Ok(config) => config,
        Err(e) => {
            warn!(
                event = %definition.name,
                engine = %engine,
                error = %e,
                "Skipping event definition"
            );
            return None;
        }
    };

    let job = match engine {
        DetectionEngine::KeywordDetection => Job::from_function(KeywordDetector),
        DetectionEngine::RegexDetection => Job::from_function(RegexDetector),
        DetectionEngine::LlmDetection => Job::from_function(LlmDetector::new(provider)),
    };

    Some(
        job.with_id(definition.name.clone())
            .with_config(config)
            .with_metadata(definition.as_metadata()),
    )
}

/// Builds a workload with one job per supported event definition.
pub fn build_detection_workload(
    definitions: &[EventDefinition],
    provider: Arc<dyn LlmProvider>,
) -> Workload {
    let mut workload = Workload::new();
    for definition in definitions {
        if let Some(job) = build_detector_job(definition, provider.clone()) {
            workload.add_job(job);
        }
    }
    info!(
        definitions = definitions.len(),
        jobs = workload.jobs().len(),
        "Built detection workload"
    );
    workload
}

impl JobRegistry {
    /// A registry holding the built-in detectors and the evaluator.
    ///
    /// LLM-backed functions explore [`DEFAULT_MODELS`] by default.
    pub fn with_detectors(provider: Arc<dyn LlmProvider>) -> Self {
        let mut registry = JobRegistry::new();
        registry
            .register(KeywordDetector)
            .register(RegexDetector)
            .register_with_selectable(LlmDetector::new(provider.clone()), vec![model_field(None)])
            .register_with_selectable(LlmEvaluator::new(provider), vec![model_field(None)]);
        registry
    }
}
