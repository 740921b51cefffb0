//! LLM-backed event detection.
//!
//! The detector asks the model a yes/no question about the scoped part of
//! the conversation. When the provider returns token log-probabilities, the
//! probability mass of the chosen answer among the yes/no candidates of the
//! first token is reported as a confidence score.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::JobError;
use crate::lab::{JobConfig, JobContext, JobFunction, JobResult, Message};
use crate::llm::{ChatMessage, GenerationRequest, GenerationResponse, LlmProvider, TokenLogprob};

use super::scope::{scoped_text, DetectionScope};

const SYSTEM_PROMPT: &str = "You are an impartial judge reviewing conversations between a user \
and an assistant. Answer strictly with Yes or No.";

const DETECTION_PROMPT: &str = "Does the following event happen in the conversation below?

Event: {event_name}
Description: {event_description}
{context}
[Conversation]
{conversation}
[End of conversation]

Answer Yes or No.";

/// Parses a yes/no answer from raw model output.
pub(crate) fn parse_yes_no(raw: &str) -> Option<bool> {
    let word: String = raw
        .chars()
        .skip_while(|c| !c.is_alphanumeric())
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// Probability of `answer` relative to its opposite, taken from the first
/// generated token's alternatives.
pub(crate) fn answer_confidence(logprobs: &[TokenLogprob], answer: bool) -> Option<f64> {
    let first = logprobs.first()?;
    let mut yes = 0.0;
    let mut no = 0.0;

    let candidates: Vec<(&str, f64)> = if first.top_logprobs.is_empty() {
        vec![(first.token.as_str(), first.logprob)]
    } else {
        first
            .top_logprobs
            .iter()
            .map(|t| (t.token.as_str(), t.logprob))
            .collect()
    };

    for (token, logprob) in candidates {
        match parse_yes_no(token) {
            Some(true) => yes += logprob.exp(),
            Some(false) => no += logprob.exp(),
            None => {}
        }
    }

    let total = yes + no;
    if total <= 0.0 {
        return None;
    }
    Some(if answer { yes / total } else { no / total })
}

pub(crate) fn llm_call_metadata(response: &GenerationResponse) -> Value {
    json!({
        "model": response.model,
        "prompt_tokens": response.usage.prompt_tokens,
        "completion_tokens": response.usage.completion_tokens,
        "total_tokens": response.usage.total_tokens,
    })
}

/// Detects an event described in natural language.
///
/// Parameters: `event_name`, `event_description`, `model` and
/// `detection_scope`. Logs hold `[prompt, raw_output]`.
pub struct LlmDetector {
    provider: Arc<dyn LlmProvider>,
}

impl LlmDetector {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    fn prompt(
        message: &Message,
        config: &JobConfig,
        scope: DetectionScope,
        text: &str,
    ) -> Result<String, JobError> {
        let context = match scope {
            DetectionScope::Task => {
                let context = message.latest_interaction_context();
                if context.is_empty() {
                    String::new()
                } else {
                    format!("\n[Earlier in the conversation]\n{}\n", context)
                }
            }
            _ => String::new(),
        };

        Ok(DETECTION_PROMPT
            .replace("{event_name}", config.require_str("event_name")?)
            .replace("{event_description}", config.get_str("event_description").unwrap_or(""))
            .replace("{context}", &context)
            .replace("{conversation}", text))
    }
}

#[async_trait]
impl JobFunction for LlmDetector {
    fn name(&self) -> &str {
        "llm_detection"
    }

    async fn call(
        &self,
        message: &Message,
        config: &JobConfig,
        _ctx: &JobContext,
    ) -> Result<Option<JobResult>, JobError> {
        let scope = DetectionScope::from_config(config)?;
        let Some(text) = scoped_text(message, scope) else {
            return Ok(Some(
                JobResult::boolean(false).with_log(format!("nothing to review in scope {}", scope)),
            ));
        };

        let prompt = Self::prompt(message, config, scope, &text)?;
        let model = config.get_str("model").unwrap_or_default().to_string();

        let request = GenerationRequest::new(
            model.clone(),
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt.clone())],
        )
        .with_temperature(0.0)
        .with_max_tokens(5)
        .with_logprobs(5);

        let response = match self.provider.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    model = %model,
                    error = %e,
                    "LLM detection call failed"
                );
                return Ok(Some(
                    JobResult::error(format!("LLM call failed: {}", e)).with_log(prompt),
                ));
            }
        };

        let raw = response.first_content().unwrap_or_default().to_string();
        let Some(detected) = parse_yes_no(&raw) else {
            warn!(message_id = %message.id, output = %raw, "Unparseable LLM detection answer");
            return Ok(Some(
                JobResult::error("expected a Yes or No answer")
                    .with_log(prompt)
                    .with_log(raw),
            ));
        };

        let mut result = JobResult::boolean(detected)
            .with_log(prompt)
            .with_log(raw)
            .with_metadata("llm_call", llm_call_metadata(&response));

        if let Some(confidence) = response
            .first_logprobs()
            .and_then(|logprobs| answer_confidence(logprobs, detected))
        {
            result = result.with_metadata("confidence", json!(confidence));
        }

        Ok(Some(result))
    }
}
