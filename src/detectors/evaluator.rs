//! Success/failure evaluation of the latest interaction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::JobError;
use crate::lab::{JobConfig, JobContext, JobFunction, JobResult, Message};
use crate::llm::{ChatMessage, GenerationRequest, LlmProvider};

use super::llm::llm_call_metadata;

const EVALUATION_PROMPT: &str = "You evaluate whether an assistant handled the user's latest \
request well.
{criteria}
[Conversation]
{conversation}
[End of conversation]

Answer with exactly one word: success or failure.";

/// Reads the verdict from the first word of the model output.
fn parse_evaluation(raw: &str) -> Option<&'static str> {
    let word: String = raw
        .chars()
        .skip_while(|c| !c.is_alphanumeric())
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "success" | "successful" => Some("success"),
        "failure" | "failed" | "fail" => Some("failure"),
        _ => None,
    }
}

/// Rates the latest interaction as `"success"` or `"failure"`.
///
/// Parameters: `model` and an optional `success_criteria` text.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
}

impl LlmEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobFunction for LlmEvaluator {
    fn name(&self) -> &str {
        "evaluate_task"
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        _ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        let criteria = config
            .get_str("success_criteria")
            .map(|c| format!("Success criteria: {}\n", c))
            .unwrap_or_default();
        let prompt = EVALUATION_PROMPT
            .replace("{criteria}", &criteria)
            .replace("{conversation}", &message.latest_interaction());
        let model = config.get_str("model").unwrap_or_default().to_string();

        let request = GenerationRequest::new(model.clone(), vec![ChatMessage::user(prompt.clone())])
            .with_temperature(0.0)
            .with_max_tokens(5);

        let response = match self.provider.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    model = %model,
                    error = %e,
                    "Evaluation call failed"
                );
                return Ok(Some(
                    JobResult::error(format!("LLM call failed: {}", e)).with_log(prompt),
                ));
            }
        };

        let raw = response.first_content().unwrap_or_default().to_string();
        let result = match parse_evaluation(&raw) {
            Some(verdict) => JobResult::literal(verdict)
                .with_metadata("llm_call", llm_call_metadata(&response)),
            None => {
                warn!(message_id = %message.id, output = %raw, "Unparseable evaluation");
                JobResult::error("expected success or failure")
            }
        };

        Ok(Some(result.with_log(prompt).with_log(raw)))
    }
}
