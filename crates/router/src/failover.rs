//! Provider failover: ordered retry chain with per-provider timeouts.
//!
//! When a provider fails (timeout, rate limit, error), the next configured
//! provider is tried. Cancellation is different: it aborts the whole chain.

use crate::backends::build_backend;
use crate::credentials;
use helmsman_config::AppConfig;
use helmsman_core::{
    CancellationToken, Completion, CompletionRequest, Message, Provider, ProviderError, TokenSink,
};
use helmsman_telemetry::TelemetryEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A single entry in the chain.
struct ChainEntry {
    provider: Arc<dyn Provider>,
    model: String,
    timeout: Duration,
}

/// An ordered list of (provider, model) pairs tried until one answers.
pub struct FailoverChain {
    entries: Vec<ChainEntry>,
    telemetry: Option<Arc<TelemetryEngine>>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl FailoverChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            telemetry: None,
            temperature: 0.2,
            max_tokens: None,
        }
    }

    /// Build the chain from configuration, skipping entries without credentials.
    pub fn from_config(config: &AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut chain = Self::new().with_sampling(
            config.router.temperature,
            Some(config.router.max_tokens),
        );

        for entry in &config.providers {
            let Some(credential) = credentials::resolve(entry, &lookup) else {
                debug!(provider = %entry.provider, "No credential found, skipping provider");
                continue;
            };
            match build_backend(entry, credential) {
                Ok(provider) => {
                    chain = chain.add(
                        provider,
                        entry.model.clone(),
                        Duration::from_secs(entry.timeout_secs),
                    );
                }
                Err(e) => {
                    warn!(provider = %entry.provider, error = %e, "Skipping unusable provider");
                }
            }
        }

        info!(providers = chain.len(), "Failover chain ready");
        chain
    }

    /// Append a provider with the model to request from it.
    pub fn add(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        self.entries.push(ChainEntry {
            provider,
            model: model.into(),
            timeout,
        });
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The model of the first entry; keys the response cache.
    pub fn primary_model(&self) -> &str {
        self.entries.first().map(|e| e.model.as_str()).unwrap_or("")
    }

    /// `provider/model` labels, in order.
    pub fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{}/{}", e.provider.name(), e.model))
            .collect()
    }

    /// Try each entry in order. With a sink, output is streamed.
    pub async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
        cancel: &CancellationToken,
        sink: Option<TokenSink>,
    ) -> Result<Completion, ProviderError> {
        if self.entries.is_empty() {
            return Err(ProviderError::NotConfigured(
                "No providers in failover chain".into(),
            ));
        }

        let mut last_error = None;

        for (i, entry) in self.entries.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let provider_name = entry.provider.name().to_string();
            info!(
                provider = %provider_name,
                model = %entry.model,
                attempt = i + 1,
                total = self.entries.len(),
                "Failover: trying provider"
            );

            let request = CompletionRequest {
                model: entry.model.clone(),
                system_prompt: system_prompt.to_string(),
                messages: history.to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };
            let call = async {
                match &sink {
                    Some(sink) => entry.provider.stream(request, sink.clone()).await,
                    None => entry.provider.complete(request).await,
                }
            };

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(provider = %provider_name, "Failover: cancelled");
                    return Err(ProviderError::Cancelled);
                }
                outcome = tokio::time::timeout(entry.timeout, call) => outcome,
            };
            let elapsed = started.elapsed();

            let error = match outcome {
                Ok(Ok(completion)) => {
                    self.record_success(&provider_name, &entry.model, elapsed, &completion);
                    return Ok(completion);
                }
                Ok(Err(ProviderError::Cancelled)) => return Err(ProviderError::Cancelled),
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        error = %e,
                        "Failover: provider failed, trying next"
                    );
                    e
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        timeout_secs = entry.timeout.as_secs(),
                        "Failover: provider timed out, trying next"
                    );
                    ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ))
                }
            };

            if let Some(telemetry) = &self.telemetry {
                telemetry.record_llm_call(&provider_name, &entry.model, elapsed, None, false);
            }
            last_error = Some(error);
        }

        Err(ProviderError::Exhausted {
            attempts: self.entries.len(),
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    fn record_success(
        &self,
        provider: &str,
        model: &str,
        elapsed: Duration,
        completion: &Completion,
    ) {
        if let Some(telemetry) = &self.telemetry {
            let tokens = completion
                .usage
                .map(|u| (u.prompt_tokens, u.completion_tokens));
            telemetry.record_llm_call(provider, model, elapsed, tokens, true);
        }
    }
}

impl Default for FailoverChain {
    fn default() -> Self {
        Self::new()
    }
}
