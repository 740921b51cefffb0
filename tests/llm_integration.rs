//! Integration tests for the LLM client and the LLM-backed detectors.
//!
//! Most of these tests make real API calls.
//! Run with: LITELLM_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use convolab::detectors::{build_detection_workload, EventDefinition};
use convolab::lab::{ExecutorType, Message};
use convolab::llm::{ChatMessage, GenerationRequest, LiteLlmClient, LlmProvider};

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::from_env()
        .expect("LITELLM_API_KEY environment variable must be set for integration tests")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "openai/gpt-4o-mini",
        vec![
            ChatMessage::system("You are a helpful assistant. Reply concisely."),
            ChatMessage::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(content.contains('4'), "Expected '4' in response, got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_logprobs_requested() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "openai/gpt-4o-mini",
        vec![ChatMessage::user("Answer yes or no: is water wet?")],
    )
    .with_max_tokens(2)
    .with_temperature(0.0)
    .with_logprobs(5);

    let response = client.generate(request).await.expect("generation succeeds");
    let logprobs = response.first_logprobs().expect("provider returns logprobs");
    assert!(!logprobs.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_llm_detection_end_to_end() {
    let provider: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let mut definition =
        EventDefinition::new("refund_request", "The user asks for their money back");
    definition.model = Some("openai/gpt-4o-mini".to_string());

    let mut workload = build_detection_workload(&[definition], provider);
    let messages = vec![
        Message::user("I want a refund for my broken headphones, please.").with_id("refund"),
        Message::user("What time does the store open tomorrow?").with_id("hours"),
    ];

    let results = workload.run(&messages, ExecutorType::ParallelJobs, 2).await;
    assert_eq!(results["refund"]["refund_request"].as_bool(), Some(true));
    assert_eq!(results["hours"]["refund_request"].as_bool(), Some(false));
}

#[tokio::test]
async fn test_invalid_api_key() {
    let client = LiteLlmClient::new_with_defaults("invalid-key".to_string());

    let request =
        GenerationRequest::new("openai/gpt-4o-mini", vec![ChatMessage::user("test")])
            .with_max_tokens(5);

    let response = client.generate(request).await;
    assert!(response.is_err(), "Should fail with invalid API key");
}
