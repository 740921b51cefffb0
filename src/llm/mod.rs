//! LLM integration.
//!
//! Detectors talk to language models through the [`LlmProvider`] trait.
//! [`LiteLlmClient`] implements it for any OpenAI-compatible endpoint
//! (LiteLLM proxy, OpenRouter, ...); tests plug in their own provider.
//!
//! ```ignore
//! use convolab::llm::{ChatMessage, GenerationRequest, LiteLlmClient, LlmProvider};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![ChatMessage::user("Hello")])
//!     .with_logprobs(5);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    ChatMessage, Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider,
    TokenLogprob, TopLogprob, Usage, DEFAULT_API_BASE, DEFAULT_MODEL,
};
