//! Model router: the [`Decider`] the orchestrator talks to.
//!
//! Per request: cache lookup, then streaming call, batched call or plain
//! failover call, then parse and shape. Live typing and fast mode skip the
//! cache; live typing also skips batching.

use crate::batch::{BatchSettings, Batcher};
use crate::cache::ResponseCache;
use crate::failover::FailoverChain;
use crate::parser;
use crate::shaper::{OutputShaper, PersonaShaper};
use async_trait::async_trait;
use helmsman_config::AppConfig;
use helmsman_core::{Decider, Decision, DecisionRequest, ProviderError, Usage};
use helmsman_telemetry::TelemetryEngine;
use std::sync::Arc;
use tracing::debug;

pub struct ModelRouter {
    chain: Arc<FailoverChain>,
    cache: Option<ResponseCache>,
    batcher: Option<Batcher>,
    shaper: Arc<dyn OutputShaper>,
    telemetry: Option<Arc<TelemetryEngine>>,
    fast_mode: bool,
}

impl ModelRouter {
    /// A router with no cache, no batching and whitespace-only shaping.
    pub fn new(chain: FailoverChain) -> Self {
        Self {
            chain: Arc::new(chain),
            cache: None,
            batcher: None,
            shaper: Arc::new(PersonaShaper::new()),
            telemetry: None,
            fast_mode: false,
        }
    }

    /// Build from configuration and the process environment.
    ///
    /// Spawns the batching task when batching is enabled, so this must run
    /// inside a Tokio runtime.
    pub fn from_config(config: &AppConfig, telemetry: Arc<TelemetryEngine>) -> Self {
        let chain = FailoverChain::from_config(config, |k| std::env::var(k).ok())
            .with_telemetry(telemetry.clone());

        let mut router = Self::new(chain)
            .with_telemetry(telemetry)
            .with_shaper(Arc::new(PersonaShaper::new()))
            .fast_mode(config.router.fast_mode);
        if config.router.cache_enabled {
            router = router.with_cache(config.router.cache_capacity);
        }
        if config.router.batching {
            router = router.with_batching(BatchSettings::from(&config.router));
        }
        router
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(ResponseCache::new(capacity));
        self
    }

    /// Start the batching queue. Must be called inside a Tokio runtime.
    pub fn with_batching(mut self, settings: BatchSettings) -> Self {
        self.batcher = Some(Batcher::spawn(
            self.chain.clone(),
            settings,
            self.telemetry.clone(),
        ));
        self
    }

    pub fn with_shaper(mut self, shaper: Arc<dyn OutputShaper>) -> Self {
        self.shaper = shaper;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Bypass the response cache for every request.
    pub fn fast_mode(mut self, enabled: bool) -> Self {
        self.fast_mode = enabled;
        self
    }

    /// `provider/model` labels of the failover chain.
    pub fn providers(&self) -> Vec<String> {
        self.chain.describe()
    }

    fn finish(&self, raw: &str, usage: Option<Usage>) -> Decision {
        let mut decision = parser::parse(raw);
        decision.usage = usage;
        self.shaper.shape(decision)
    }
}

#[async_trait]
impl Decider for ModelRouter {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, ProviderError> {
        if request.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        let streaming = request.on_token.is_some();
        let cacheable = !streaming && !request.fast && !self.fast_mode;

        let cache_key = match &self.cache {
            Some(cache) if cacheable => {
                let key = ResponseCache::key(
                    &request.system_prompt,
                    &request.history,
                    self.chain.primary_model(),
                );
                if let Some(text) = cache.get(&key) {
                    debug!("Response cache hit");
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_cache_hit();
                    }
                    return Ok(self.finish(&text, None));
                }
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_cache_miss();
                }
                Some(key)
            }
            _ => None,
        };

        let completion = match (&request.on_token, &self.batcher) {
            (Some(sink), _) => {
                self.chain
                    .complete(
                        &request.system_prompt,
                        &request.history,
                        &request.cancel,
                        Some(sink.clone()),
                    )
                    .await?
            }
            (None, Some(batcher)) => {
                batcher
                    .submit(request.system_prompt, request.history, &request.cancel)
                    .await?
            }
            (None, None) => {
                self.chain
                    .complete(
                        &request.system_prompt,
                        &request.history,
                        &request.cancel,
                        None,
                    )
                    .await?
            }
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.put(key, completion.text.clone());
        }

        Ok(self.finish(&completion.text, completion.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::{
        Completion, CompletionRequest, Message, Provider, TokenSink, NO_TOOL,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies with a fixed text and counts calls.
    struct ScriptedProvider {
        text: String,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(text: &str) -> Self {
            Self {
                text: text.into(),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            Ok(Completion {
                text: self.text.clone(),
                usage: Some(Usage {
                    prompt_tokens: 7,
                    completion_tokens: 3,
                    total_tokens: 10,
                }),
                model: request.model,
                provider: "scripted".into(),
            })
        }
    }

    fn router(provider: Arc<ScriptedProvider>) -> ModelRouter {
        let chain = FailoverChain::new().add(provider, "m1", Duration::from_secs(120));
        ModelRouter::new(chain)
    }

    fn request() -> DecisionRequest {
        DecisionRequest::new("sys", vec![Message::user("list files")])
    }

    #[tokio::test]
    async fn parses_tool_calls() {
        let provider = Arc::new(ScriptedProvider::new(
            r#"Let me look. {"tool":"list_directory","args":{"path":"."}}"#,
        ));
        let decision = router(provider).decide(request()).await.unwrap();
        assert_eq!(decision.tool, "list_directory");
        assert_eq!(decision.usage.map(|u| u.total_tokens), Some(10));
    }

    #[tokio::test]
    async fn cache_hit_skips_provider_and_is_still_shaped() {
        let provider = Arc::new(ScriptedProvider::new(
            r#"{"tool":"none","message":"All done.\n\n\n\nBye"}"#,
        ));
        let telemetry = Arc::new(TelemetryEngine::new());
        let router = router(provider.clone())
            .with_telemetry(telemetry.clone())
            .with_cache(8)
            .with_shaper(Arc::new(PersonaShaper::signed("Helm")));

        let first = router.decide(request()).await.unwrap();
        let second = router.decide(request()).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(first.message, "All done.\n\nBye\n\n-- Helm");
        assert_eq!(second.message, first.message);
        assert_eq!(second.tool, NO_TOOL);
        assert!(second.usage.is_none());

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[tokio::test]
    async fn streaming_bypasses_cache() {
        let provider = Arc::new(ScriptedProvider::new(r#"{"tool":"none","message":"hi"}"#));
        let router = router(provider.clone()).with_cache(8);

        let typed = Arc::new(Mutex::new(String::new()));
        let sink_typed = typed.clone();
        let sink: TokenSink = Arc::new(move |d| sink_typed.lock().unwrap().push_str(d));

        router.decide(request().with_token_sink(sink.clone())).await.unwrap();
        router.decide(request().with_token_sink(sink)).await.unwrap();

        assert_eq!(provider.calls(), 2);
        assert!(typed.lock().unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn fast_requests_bypass_cache() {
        let provider = Arc::new(ScriptedProvider::new(r#"{"tool":"none","message":"hi"}"#));
        let router = router(provider.clone()).with_cache(8);

        router.decide(request().fast(true)).await.unwrap();
        router.decide(request().fast(true)).await.unwrap();
        assert_eq!(provider.calls(), 2);

        let fast_router = ModelRouter::new(
            FailoverChain::new().add(provider.clone(), "m1", Duration::from_secs(120)),
        )
        .with_cache(8)
        .fast_mode(true);
        fast_router.decide(request()).await.unwrap();
        fast_router.decide(request()).await.unwrap();
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn cancelled_request_never_reaches_provider() {
        let provider = Arc::new(ScriptedProvider::new("{}"));
        let router = router(provider.clone());
        let req = request();
        req.cancel.cancel();

        let err = router.decide(req).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batched_router_still_answers() {
        let provider = Arc::new(ScriptedProvider::new(r#"{"tool":"none","message":"ok"}"#));
        let router = router(provider.clone()).with_batching(BatchSettings::default());
        let decision = router.decide(request()).await.unwrap();
        assert_eq!(decision.message, "ok");
        assert_eq!(provider.calls(), 1);
    }
}
