//! Model backends.
//!
//! Two wire formats cover every supported provider: the OpenAI-compatible
//! chat completions API (OpenAI, OpenRouter, Groq, DeepSeek, Google's OpenAI
//! endpoint, Ollama, vLLM, llama.cpp) and Anthropic's native Messages API.

pub mod anthropic;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;

use crate::credentials::Credential;
use helmsman_config::ProviderEntry;
use helmsman_core::{Provider, ProviderError};
use std::sync::Arc;

/// Default OpenAI-compatible base URL for a provider name.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    Some(match provider {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "together" => "https://api.together.xyz/v1",
        "google" | "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "ollama" => "http://localhost:11434/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" => "http://localhost:8080/v1",
        _ => return None,
    })
}

/// Build the backend for one chain entry.
pub fn build_backend(
    entry: &ProviderEntry,
    credential: Credential,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let key = match credential {
        Credential::Key(key) => Some(key),
        Credential::NotRequired => None,
    };

    if entry.provider == "anthropic" {
        let mut provider = AnthropicProvider::new(key.unwrap_or_default());
        if let Some(url) = &entry.api_url {
            provider = provider.with_base_url(url);
        }
        return Ok(Arc::new(provider));
    }

    let base_url = entry
        .api_url
        .as_deref()
        .or_else(|| default_base_url(&entry.provider))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "provider '{}' has no known endpoint; set api_url",
                entry.provider
            ))
        })?;

    Ok(Arc::new(OpenAiCompatProvider::new(
        entry.provider.clone(),
        base_url,
        key,
    )))
}

/// Map a non-success HTTP status to a provider error.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        )));
    }

    if !response.status().is_success() {
        let error_body = response.text().await.unwrap_or_default();
        tracing::warn!(provider, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    /// Feed bytes; returns the payloads of every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            // Skip blank separators, comments and `event:` lines
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_buffer_handles_split_lines() {
        let mut sse = SseBuffer::default();
        assert!(sse.push(b"data: {\"a\"").is_empty());
        let out = sse.push(b":1}\n\n: keep-alive\nevent: ping\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn known_providers_have_endpoints() {
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("11434"));
        assert!(default_base_url("gemini").unwrap().contains("googleapis"));
        assert!(default_base_url("acme").is_none());
    }

    #[test]
    fn unknown_provider_without_url_is_not_configured() {
        let entry = ProviderEntry::new("acme", "m1");
        let err = build_backend(&entry, Credential::Key("k".into())).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn unknown_provider_with_url_builds() {
        let mut entry = ProviderEntry::new("acme", "m1");
        entry.api_url = Some("https://llm.acme.test/v1".into());
        let backend = build_backend(&entry, Credential::Key("k".into())).unwrap();
        assert_eq!(backend.name(), "acme");
    }

    #[test]
    fn anthropic_gets_native_backend() {
        let entry = ProviderEntry::new("anthropic", "claude-sonnet-4-20250514");
        let backend = build_backend(&entry, Credential::Key("k".into())).unwrap();
        assert_eq!(backend.name(), "anthropic");
    }
}
