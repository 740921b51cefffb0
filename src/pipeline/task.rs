//! Stored conversation turns and their conversion to [`Message`]s.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lab::Message;

/// One user input and the assistant's output, as logged by a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Conversation the task belongs to; tasks without one stand alone.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: None,
            created_at: Utc::now(),
            input: input.into(),
            output: None,
            system_prompt: None,
            metadata: Map::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn input_message(&self) -> Message {
        Message::user(self.input.clone())
            .with_id(format!("input_{}", self.id))
            .with_created_at(self.created_at)
    }

    fn output_message(&self) -> Option<Message> {
        self.output.as_ref().map(|output| {
            Message::assistant(output.clone())
                .with_id(format!("output_{}", self.id))
                .with_created_at(self.created_at)
        })
    }
}

impl Message {
    /// Builds the message analyzed for a task.
    ///
    /// The assistant output `output_<id>` is the message and the user input
    /// `input_<id>` its latest previous turn; tasks without an output yield
    /// the input itself. Turns of `previous_tasks` come first, oldest first.
    /// Metadata carries `task_id`, `session_id` and `system_prompt`.
    pub fn from_task(task: &Task, previous_tasks: &[Task]) -> Message {
        let mut previous: Vec<Message> = previous_tasks
            .iter()
            .flat_map(|t| std::iter::once(t.input_message()).chain(t.output_message()))
            .collect();

        let message = match task.output_message() {
            Some(output) => {
                previous.push(task.input_message());
                output
            }
            None => task.input_message(),
        };

        let mut message = message
            .with_previous_messages(previous)
            .with_metadata("task_id", Value::from(task.id.as_str()));
        if let Some(session_id) = &task.session_id {
            message = message.with_metadata("session_id", Value::from(session_id.as_str()));
        }
        if let Some(prompt) = &task.system_prompt {
            message = message.with_metadata("system_prompt", Value::from(prompt.as_str()));
        }
        message
    }
}

/// Builds one message per task, chaining earlier tasks of the same session
/// as context. Messages come back in chronological order.
pub fn messages_from_tasks(tasks: &[Task]) -> Vec<Message> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by_key(|t| t.created_at);

    let mut sessions: HashMap<&str, Vec<Task>> = HashMap::new();
    let mut messages = Vec::with_capacity(tasks.len());

    for task in ordered {
        match task.session_id.as_deref() {
            Some(session_id) => {
                let history = sessions.entry(session_id).or_default();
                messages.push(Message::from_task(task, history));
                history.push(task.clone());
            }
            None => messages.push(Message::from_task(task, &[])),
        }
    }

    messages
}
