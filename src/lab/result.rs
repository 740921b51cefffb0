//! Outcome of running one job on one message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of value a job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Bool,
    /// One value out of a closed set, e.g. "success" / "failure".
    Literal,
    List,
    Dict,
    String,
    Number,
    Object,
    /// The job failed or produced nothing; `value` is `None`.
    Error,
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultType::Bool => "bool",
            ResultType::Literal => "literal",
            ResultType::List => "list",
            ResultType::Dict => "dict",
            ResultType::String => "string",
            ResultType::Number => "number",
            ResultType::Object => "object",
            ResultType::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Result of a job execution on a single message.
///
/// Job functions build the value, kind, logs and metadata. The identifiers
/// linking the result back to its job, task, project and organization are
/// stamped afterwards by the job wrapper, the workload or the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub created_at: DateTime<Utc>,
    /// Id of the job that produced this result.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Copy of the producing job's metadata.
    #[serde(default)]
    pub job_metadata: Map<String, Value>,
    pub value: Option<Value>,
    pub result_type: ResultType,
    /// Diagnostic entries in order, typically `[prompt, raw_llm_output]`.
    #[serde(default)]
    pub logs: Vec<Value>,
    /// Auxiliary data: LLM call record, score breakdown, source tag.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

impl JobResult {
    /// Creates a result with the given kind and value.
    pub fn new(result_type: ResultType, value: Value) -> Self {
        Self {
            created_at: Utc::now(),
            job_id: None,
            job_metadata: Map::new(),
            value: Some(value),
            result_type,
            logs: Vec::new(),
            metadata: Map::new(),
            task_id: None,
            project_id: None,
            org_id: None,
        }
    }

    /// Creates a boolean result.
    pub fn boolean(value: bool) -> Self {
        Self::new(ResultType::Bool, Value::Bool(value))
    }

    /// Creates a literal (closed-set) result.
    pub fn literal(value: impl Into<String>) -> Self {
        Self::new(ResultType::Literal, Value::String(value.into()))
    }

    /// Creates a numeric result. Non-finite numbers become an error result.
    pub fn number(value: f64) -> Self {
        match serde_json::Number::from_f64(value) {
            Some(n) => Self::new(ResultType::Number, Value::Number(n)),
            None => Self::error(format!("non-finite number: {}", value)),
        }
    }

    /// Creates a free-text result.
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ResultType::String, Value::String(value.into()))
    }

    /// Creates an error result carrying `reason` as its first log entry.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            value: None,
            result_type: ResultType::Error,
            logs: vec![Value::String(reason.into())],
            ..Self::new(ResultType::Error, Value::Null)
        }
    }

    /// Appends a log entry.
    pub fn with_log(mut self, entry: impl Into<Value>) -> Self {
        self.logs.push(entry.into());
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns whether this result records a failure.
    pub fn is_error(&self) -> bool {
        self.result_type == ResultType::Error
    }

    /// Returns the value as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_ref().and_then(Value::as_bool)
    }
}
