//! Which part of a conversation a detector examines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, LabError};
use crate::lab::{JobConfig, Message, TranscriptOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionScope {
    /// The latest user/assistant exchange.
    #[default]
    Task,
    /// The whole conversation so far.
    Session,
    /// Only the user turn of the latest exchange.
    TaskInputOnly,
    /// Only the assistant turn of the latest exchange.
    TaskOutputOnly,
    /// The system prompt stored in the message metadata.
    SystemPrompt,
}

impl DetectionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionScope::Task => "task",
            DetectionScope::Session => "session",
            DetectionScope::TaskInputOnly => "task_input_only",
            DetectionScope::TaskOutputOnly => "task_output_only",
            DetectionScope::SystemPrompt => "system_prompt",
        }
    }

    /// Reads the `detection_scope` parameter, defaulting to `task`.
    pub fn from_config(config: &JobConfig) -> Result<Self, JobError> {
        match config.get_str("detection_scope") {
            Some(scope) => Ok(scope.parse()?),
            None => Ok(DetectionScope::Task),
        }
    }
}

impl fmt::Display for DetectionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionScope {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(DetectionScope::Task),
            "session" => Ok(DetectionScope::Session),
            "task_input_only" => Ok(DetectionScope::TaskInputOnly),
            "task_output_only" => Ok(DetectionScope::TaskOutputOnly),
            "system_prompt" => Ok(DetectionScope::SystemPrompt),
            other => Err(LabError::InvalidConfig(format!(
                "unsupported detection scope '{}'",
                other
            ))),
        }
    }
}

/// Text a detector with the given scope should look at, `None` when the
/// message carries nothing for that scope.
pub fn scoped_text(message: &Message, scope: DetectionScope) -> Option<String> {
    match scope {
        DetectionScope::Task => Some(message.latest_interaction()),
        DetectionScope::Session => {
            Some(message.transcript(&TranscriptOptions::new().with_previous_messages()))
        }
        DetectionScope::TaskInputOnly => {
            if message.role == "user" {
                Some(message.content.clone())
            } else {
                message
                    .previous_message()
                    .filter(|m| m.role == "user")
                    .map(|m| m.content.clone())
            }
        }
        DetectionScope::TaskOutputOnly => Some(message.content.clone()),
        DetectionScope::SystemPrompt => message
            .metadata_str("system_prompt")
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn exchange() -> Message {
        Message::assistant("Our plans start at $10.")
            .with_previous_messages(vec![
                Message::user("Hello"),
                Message::assistant("Hi!"),
                Message::user("What does it cost?"),
            ])
            .with_metadata("system_prompt", Value::from("You sell software."))
    }

    #[test]
    fn test_scoped_text() {
        let message = exchange();

        assert_eq!(
            scoped_text(&message, DetectionScope::Task).as_deref(),
            Some("user: What does it cost?\nassistant: Our plans start at $10.")
        );
        assert!(scoped_text(&message, DetectionScope::Session)
            .unwrap_or_default()
            .starts_with("user: Hello"));
        assert_eq!(
            scoped_text(&message, DetectionScope::TaskInputOnly).as_deref(),
            Some("What does it cost?")
        );
        assert_eq!(
            scoped_text(&message, DetectionScope::TaskOutputOnly).as_deref(),
            Some("Our plans start at $10.")
        );
        assert_eq!(
            scoped_text(&message, DetectionScope::SystemPrompt).as_deref(),
            Some("You sell software.")
        );
    }

    #[test]
    fn test_missing_scope_content() {
        let message = Message::assistant("orphan reply");
        assert!(scoped_text(&message, DetectionScope::TaskInputOnly).is_none());
        assert!(scoped_text(&message, DetectionScope::SystemPrompt).is_none());
    }

    #[test]
    fn test_from_config() {
        let config = JobConfig::new().with_param("detection_scope", "session");
        assert_eq!(DetectionScope::from_config(&config).ok(), Some(DetectionScope::Session));
        assert_eq!(
            DetectionScope::from_config(&JobConfig::new()).ok(),
            Some(DetectionScope::Task)
        );
        let bad = JobConfig::new().with_param("detection_scope", "galaxy");
        assert!(DetectionScope::from_config(&bad).is_err());
    }
}
