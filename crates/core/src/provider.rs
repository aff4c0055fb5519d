//! Provider trait: the abstraction over model backends.
//!
//! A Provider knows how to send a system prompt plus conversation history to
//! one model endpoint and return the raw text it produced. Everything above
//! that (failover, caching, batching, parsing) lives in the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::error::ProviderError;
use crate::message::Message;

/// A single completion request against one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4-20250514")
    pub model: String,

    /// System instructions, sent ahead of the history
    pub system_prompt: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text, unparsed
    pub text: String,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,

    /// Which provider answered
    #[serde(default)]
    pub provider: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Callback receiving text deltas as they arrive (live typing).
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// The core Provider trait.
///
/// Every model backend (OpenAI-compatible, Anthropic, test doubles) implements
/// this trait. Cancellation is applied by the caller, which drops the future.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    /// Send a request, forwarding text deltas to `sink` as they arrive.
    ///
    /// Default implementation calls `complete()` and emits the whole text once.
    async fn stream(
        &self,
        request: CompletionRequest,
        sink: TokenSink,
    ) -> Result<Completion, ProviderError> {
        let completion = self.complete(request).await?;
        sink(&completion.text);
        Ok(completion)
    }
}
