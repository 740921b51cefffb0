//! Keyword-based event detection.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::error::JobError;
use crate::lab::{JobConfig, JobContext, JobFunction, JobResult, Message};

use super::scope::{scoped_text, DetectionScope};

/// Splits a comma-separated keyword list, dropping blanks.
pub fn parse_keywords(keywords: &str) -> impl Iterator<Item = &str> {
    keywords.split(',').map(str::trim).filter(|k| !k.is_empty())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive pattern for `keyword`. A word boundary is required on
/// each edge that ends in a word character; symbol edges such as the `$` of
/// `$10` or the `++` of `c++` already delimit themselves.
fn keyword_pattern(keyword: &str) -> String {
    let starts_with_word = keyword.chars().next().is_some_and(is_word_char);
    let ends_with_word = keyword.chars().last().is_some_and(is_word_char);
    format!(
        "(?i){}{}{}",
        if starts_with_word { r"\b" } else { "" },
        regex::escape(keyword),
        if ends_with_word { r"\b" } else { "" },
    )
}

/// Flags a message when any configured keyword appears as a whole word,
/// ignoring case.
///
/// Parameters: `keywords` (comma-separated) and `detection_scope`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordDetector;

#[async_trait]
impl JobFunction for KeywordDetector {
    fn name(&self) -> &str {
        "keyword_detection"
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        _ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        let keywords: Vec<&str> = parse_keywords(config.require_str("keywords")?).collect();
        if keywords.is_empty() {
            return Err(JobError::Config("no keywords configured".to_string()));
        }
        let scope = DetectionScope::from_config(config)?;

        let Some(text) = scoped_text(message, scope) else {
            return Ok(Some(
                JobResult::boolean(false).with_log(format!("nothing to scan in scope {}", scope)),
            ));
        };

        let mut matched = Vec::new();
        for keyword in keywords {
            let pattern = Regex::new(&keyword_pattern(keyword))
                .map_err(|e| JobError::Config(format!("keyword '{}': {}", keyword, e)))?;
            if pattern.is_match(&text) {
                matched.push(Value::from(keyword));
            }
        }

        Ok(Some(
            JobResult::boolean(!matched.is_empty())
                .with_metadata("matched_keywords", Value::Array(matched)),
        ))
    }
}
