//! Conversational messages, the unit of work a workload iterates over.
//!
//! A [`Message`] is one turn plus the turns that came before it. Prior turns
//! are embedded by value in `previous_messages`, so a message chain is a plain
//! list and can never form a cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Marker inserted where transcript content was elided.
const ELISION: &str = "...";

/// Which part of an over-long turn is dropped when building a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Elision {
    /// Drop the beginning, keep the tail.
    Left,
    /// Drop the end, keep the head.
    #[default]
    Right,
    /// Keep head and tail, drop the middle.
    Center,
}

/// Options controlling how a transcript is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptOptions {
    /// Prefix every turn with `role: `.
    pub with_role: bool,
    /// Include the previous turns before this message.
    pub with_previous_messages: bool,
    /// Render only the previous turns, leaving this message out.
    pub only_previous_messages: bool,
    /// Keep at most this many of the most recent previous turns.
    pub max_previous_messages: Option<usize>,
    /// Truncate every turn's content to this many characters.
    pub max_chars_per_message: Option<usize>,
    /// Side elided when a turn is truncated.
    pub elision: Elision,
}

impl Default for TranscriptOptions {
    fn default() -> Self {
        Self {
            with_role: true,
            with_previous_messages: false,
            only_previous_messages: false,
            max_previous_messages: None,
            max_chars_per_message: None,
            elision: Elision::Right,
        }
    }
}

impl TranscriptOptions {
    /// Creates options rendering only this message with its role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes previous turns.
    pub fn with_previous_messages(mut self) -> Self {
        self.with_previous_messages = true;
        self
    }

    /// Renders only previous turns.
    pub fn only_previous_messages(mut self) -> Self {
        self.with_previous_messages = true;
        self.only_previous_messages = true;
        self
    }

    /// Caps the number of previous turns.
    pub fn with_max_previous_messages(mut self, n: usize) -> Self {
        self.max_previous_messages = Some(n);
        self
    }

    /// Truncates each turn to `max_chars` with the given elision side.
    pub fn with_truncation(mut self, max_chars: usize, elision: Elision) -> Self {
        self.max_chars_per_message = Some(max_chars);
        self.elision = elision;
        self
    }

    /// Omits the `role: ` prefix.
    pub fn without_role(mut self) -> Self {
        self.with_role = false;
        self
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// One conversational turn with its chronological context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Aggregation key for results; must be unique within a run.
    #[serde(default = "new_message_id")]
    pub id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Free-form role such as "user", "assistant" or "system".
    #[serde(default = "default_role")]
    pub role: String,
    pub content: String,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub previous_messages: Vec<Message>,
    /// Context for job functions (few-shot examples, originating task, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_role() -> String {
    "user".to_string()
}

impl Message {
    /// Creates a user message with a random id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            created_at: Utc::now(),
            role: default_role(),
            content: content.into(),
            previous_messages: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content).with_role("assistant")
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(content).with_role("system")
    }

    /// Sets the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Sets the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the previous turns, oldest first.
    pub fn with_previous_messages(mut self, previous: Vec<Message>) -> Self {
        self.previous_messages = previous;
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the metadata value under `key` as a string, if it is one.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Returns the turn right before this one.
    pub fn previous_message(&self) -> Option<&Message> {
        self.previous_messages.last()
    }

    /// Renders the conversation as `role: content` lines.
    pub fn transcript(&self, options: &TranscriptOptions) -> String {
        let mut turns: Vec<&Message> = Vec::new();

        if options.with_previous_messages || options.only_previous_messages {
            let skip = options
                .max_previous_messages
                .map(|n| self.previous_messages.len().saturating_sub(n))
                .unwrap_or(0);
            turns.extend(self.previous_messages.iter().skip(skip));
        }
        if !options.only_previous_messages {
            turns.push(self);
        }

        render_turns(&turns, options)
    }

    /// Transcript of the last previous turn followed by this message.
    pub fn latest_interaction(&self) -> String {
        let options = TranscriptOptions::new()
            .with_previous_messages()
            .with_max_previous_messages(1);
        self.transcript(&options)
    }

    /// Transcript of every turn before the latest interaction.
    pub fn latest_interaction_context(&self) -> String {
        let end = self.previous_messages.len().saturating_sub(1);
        let turns: Vec<&Message> = self.previous_messages[..end].iter().collect();
        render_turns(&turns, &TranscriptOptions::default())
    }
}

fn render_turns(turns: &[&Message], options: &TranscriptOptions) -> String {
    turns
        .iter()
        .map(|m| {
            let content = match options.max_chars_per_message {
                Some(max) => truncate(&m.content, max, options.elision),
                None => m.content.clone(),
            };
            if options.with_role {
                format!("{}: {}", m.role, content)
            } else {
                content
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shortens `text` to at most `max_chars` kept characters plus an elision marker.
pub fn truncate(text: &str, max_chars: usize, elision: Elision) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }

    match elision {
        Elision::Left => {
            let tail: String = text.chars().skip(len - max_chars).collect();
            format!("{}{}", ELISION, tail)
        }
        Elision::Right => {
            let head: String = text.chars().take(max_chars).collect();
            format!("{}{}", head, ELISION)
        }
        Elision::Center => {
            let head_len = max_chars.div_ceil(2);
            let tail_len = max_chars - head_len;
            let head: String = text.chars().take(head_len).collect();
            let tail: String = text.chars().skip(len - tail_len).collect();
            format!("{}{}{}", head, ELISION, tail)
        }
    }
}
