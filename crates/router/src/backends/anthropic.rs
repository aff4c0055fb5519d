//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events

use super::{SseBuffer, check_status};
use async_trait::async_trait;
use futures::StreamExt;
use helmsman_core::{
    Completion, CompletionRequest, Message, Provider, ProviderError, Role, TokenSink, Usage,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert history to Anthropic messages.
    ///
    /// The Messages API only knows `user` and `assistant`. In-history system
    /// notes (tool results, corrections) travel as tagged user turns, and
    /// consecutive turns of the same role are merged.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let (role, content) = match msg.role {
                Role::User => ("user", msg.content.clone()),
                Role::Assistant => ("assistant", msg.content.clone()),
                Role::System => ("user", format!("[system] {}", msg.content)),
            };

            match result.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&content);
                }
                _ => result.push(AnthropicMessage {
                    role: role.into(),
                    content,
                }),
            }
        }

        result
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });
        if !request.system_prompt.is_empty() {
            body["system"] = serde_json::json!(request.system_prompt);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");
        let body = Self::request_body(&request, false);
        let response = self.post(&body, false).await?;

        let api_resp: AnthropicResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        let text = api_resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            text,
            usage: api_resp.usage.map(Usage::from),
            model: api_resp.model.unwrap_or(request.model),
            provider: self.name.clone(),
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        sink: TokenSink,
    ) -> Result<Completion, ProviderError> {
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");
        let body = Self::request_body(&request, true);
        let response = self.post(&body, true).await?;

        let mut byte_stream = response.bytes_stream();
        let mut sse = SseBuffer::default();
        let mut text = String::new();
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;

        'outer: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;

            for data in sse.push(&bytes) {
                let event: serde_json::Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                        continue;
                    }
                };

                match event["type"].as_str().unwrap_or("") {
                    "message_start" => {
                        let usage = &event["message"]["usage"];
                        input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                    }
                    "content_block_delta" => {
                        let delta = &event["delta"];
                        if delta["type"].as_str() == Some("text_delta")
                            && let Some(piece) = delta["text"].as_str()
                            && !piece.is_empty()
                        {
                            sink(piece);
                            text.push_str(piece);
                        }
                    }
                    "message_delta" => {
                        if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                            output_tokens = out as u32;
                        }
                    }
                    "message_stop" => break 'outer,
                    "error" => {
                        let message = event["error"]["message"]
                            .as_str()
                            .unwrap_or("unknown stream error");
                        return Err(ProviderError::StreamInterrupted(message.into()));
                    }
                    _ => {}
                }
            }
        }

        let usage = (input_tokens > 0 || output_tokens > 0).then(|| Usage {
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
        });

        Ok(Completion {
            text,
            usage,
            model: request.model,
            provider: self.name.clone(),
        })
    }
}

// --- Anthropic API types (internal) ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_notes_become_user_turns() {
        let messages = vec![
            Message::user("list files"),
            Message::assistant("{\"tool\":\"list_directory\"}"),
            Message::system("Tool list_directory result: a.txt"),
        ];
        let api = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[2].role, "user");
        assert!(api[2].content.starts_with("[system] "));
    }

    #[test]
    fn consecutive_roles_are_merged() {
        let messages = vec![
            Message::user("first"),
            Message::system("note"),
            Message::assistant("ok"),
        ];
        let api = AnthropicProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].content, "first\n\n[system] note");
    }

    #[test]
    fn system_prompt_is_top_level() {
        let request = CompletionRequest {
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: "Be terse".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: None,
        };
        let body = AnthropicProvider::request_body(&request, false);
        assert_eq!(body["system"], "Be terse");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn parse_response_text_blocks() {
        let data = r#"{"model":"claude-sonnet-4-20250514","content":[{"type":"text","text":"{\"tool\":"},{"type":"thinking","thinking":"x"},{"type":"text","text":"\"none\"}"}],"usage":{"input_tokens":12,"output_tokens":3}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.content.len(), 3);
        assert!(matches!(parsed.content[1], ResponseBlock::Other));
        assert_eq!(Usage::from(parsed.usage.unwrap()).total_tokens, 15);
    }

    #[test]
    fn custom_base_url_is_trimmed() {
        let provider = AnthropicProvider::new("k").with_base_url("http://proxy.test/");
        assert_eq!(provider.base_url, "http://proxy.test");
    }
}
