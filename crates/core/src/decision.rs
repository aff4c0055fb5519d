//! Decision: the structured result of a model call.
//!
//! The router turns raw model text into a `Decision`; the orchestrator only
//! ever consumes decisions through the [`Decider`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::error::ProviderError;
use crate::message::Message;
use crate::provider::{TokenSink, Usage};
use crate::tool::ToolInvocation;

/// The tool name meaning "no action requested".
pub const NO_TOOL: &str = "none";

/// A parsed model decision.
///
/// If `tools` is non-empty it takes precedence over the single `tool`/`args`
/// pair, which then mirrors `tools[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub thought: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tools: Vec<ToolInvocation>,
    /// The unparsed model output.
    #[serde(default)]
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Decision {
    /// A conversational decision: no tool, the whole text is the message.
    pub fn message_only(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            thought: String::new(),
            tool: NO_TOOL.into(),
            args: serde_json::Value::Object(Default::default()),
            message: raw.clone(),
            tools: Vec::new(),
            raw,
            usage: None,
        }
    }

    /// Whether the model asked for at least one tool.
    pub fn requests_tools(&self) -> bool {
        !self.tools.is_empty() || !(self.tool.is_empty() || self.tool.eq_ignore_ascii_case(NO_TOOL))
    }

    /// The tool invocations to run, in order.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        if !self.tools.is_empty() {
            return self.tools.clone();
        }
        if self.tool.eq_ignore_ascii_case(NO_TOOL) || self.tool.is_empty() {
            return Vec::new();
        }
        vec![ToolInvocation {
            tool: self.tool.clone(),
            args: self.args.clone(),
        }]
    }
}

/// One request for a decision.
#[derive(Clone)]
pub struct DecisionRequest {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub cancel: CancellationToken,
    /// Live-typing callback; when set, caching and batching are bypassed.
    pub on_token: Option<TokenSink>,
    /// "Fast/unsafe" mode: bypasses the response cache.
    pub fast: bool,
}

impl DecisionRequest {
    pub fn new(system_prompt: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
            cancel: CancellationToken::new(),
            on_token: None,
            fast: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_token_sink(mut self, sink: TokenSink) -> Self {
        self.on_token = Some(sink);
        self
    }

    pub fn fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }
}

impl std::fmt::Debug for DecisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionRequest")
            .field("system_prompt_len", &self.system_prompt.len())
            .field("history", &self.history.len())
            .field("streaming", &self.on_token.is_some())
            .field("fast", &self.fast)
            .finish()
    }
}

/// Anything that turns a prompt and history into a [`Decision`].
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: DecisionRequest) -> Result<Decision, ProviderError>;
}
