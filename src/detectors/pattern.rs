//! Regular-expression event detection.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::error::JobError;
use crate::lab::{JobConfig, JobContext, JobFunction, JobResult, Message};

use super::scope::{scoped_text, DetectionScope};

/// Flags a message when `regex_pattern` matches the scoped text.
///
/// The first match's span and text are stored under the `match` metadata key.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexDetector;

#[async_trait]
impl JobFunction for RegexDetector {
    fn name(&self) -> &str {
        "regex_detection"
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        _ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        let pattern = config.require_str("regex_pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| JobError::Config(format!("invalid regex_pattern: {}", e)))?;
        let scope = DetectionScope::from_config(config)?;

        let Some(text) = scoped_text(message, scope) else {
            return Ok(Some(
                JobResult::boolean(false).with_log(format!("nothing to scan in scope {}", scope)),
            ));
        };

        let result = match regex.find(&text) {
            Some(found) => JobResult::boolean(true).with_metadata(
                "match",
                json!({
                    "start": found.start(),
                    "end": found.end(),
                    "text": found.as_str(),
                }),
            ),
            None => JobResult::boolean(false),
        };
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::DetectionScope;
    use crate::lab::Job;

    fn detector(pattern: &str, scope: DetectionScope) -> Job {
        Job::from_function(RegexDetector).with_config(
            JobConfig::new()
                .with_param("regex_pattern", pattern)
                .with_param("detection_scope", scope.as_str()),
        )
    }

    #[tokio::test]
    async fn test_records_match_span() {
        let mut job = detector(r"\border #\d+", DetectionScope::TaskOutputOnly);
        let message = Message::assistant("I found order #4521 for you.");

        let result = job.run(&message).await.expect("detector runs");
        assert_eq!(result.as_bool(), Some(true));
        assert_eq!(result.metadata["match"]["text"], "order #4521");
        assert_eq!(result.metadata["match"]["start"], 8);
    }

    #[tokio::test]
    async fn test_no_match() {
        let mut job = detector(r"\d{4}-\d{4}", DetectionScope::Task);
        let result = job.run(&Message::user("no numbers here")).await.expect("runs");
        assert_eq!(result.as_bool(), Some(false));
        assert!(!result.metadata.contains_key("match"));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_an_error() {
        let mut job = detector("(unclosed", DetectionScope::Task);
        assert!(matches!(
            job.run(&Message::user("text")).await,
            Err(JobError::Config(_))
        ));
    }
}
