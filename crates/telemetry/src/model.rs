//! Data model for spans and usage snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A model completion call against one provider.
    LlmCall,
    /// A tool execution.
    ToolExecution,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LlmCall => write!(f, "llm_call"),
            Self::ToolExecution => write!(f, "tool_execution"),
        }
    }
}

/// A single metered unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub kind: SpanKind,
    /// Model name for LLM calls, tool name for tool executions.
    pub label: String,
    /// Provider name for LLM calls, origin for tools.
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub success: bool,
}

impl Span {
    /// Create a completed span.
    pub fn new(
        kind: SpanKind,
        label: impl Into<String>,
        source: impl Into<String>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            source: source.into(),
            started_at: now - chrono::Duration::milliseconds(duration_ms as i64),
            duration_ms,
            input_tokens: None,
            output_tokens: None,
            success,
        }
    }

    /// Record token usage.
    pub fn with_tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    /// Total tokens (input + output), or 0 if not recorded.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────

/// Per-provider totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderUsage {
    pub calls: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_latency_ms: u64,
}

impl ProviderUsage {
    /// Mean latency over all calls, failed ones included.
    pub fn avg_latency_ms(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_latency_ms / self.calls
        }
    }
}

/// Real-time usage snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub llm_calls: u64,
    pub failed_llm_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_executions: u64,
    pub failed_tool_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Merged provider calls that carried two or more requests.
    pub batches_dispatched: u64,
    /// Requests answered through a merged call.
    pub batched_requests: u64,
    /// Requests whose id was missing from a merged response.
    pub batch_fallbacks: u64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
}

impl UsageSnapshot {
    /// Fraction of cache lookups that hit, 0.0 when nothing was looked up.
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_tokens() {
        let span = Span::new(SpanKind::LlmCall, "gpt-4o", "openai", 120, true).with_tokens(100, 50);
        assert_eq!(span.total_tokens(), 150);
        assert!(span.started_at <= Utc::now());
    }

    #[test]
    fn span_kind_display() {
        assert_eq!(SpanKind::LlmCall.to_string(), "llm_call");
        assert_eq!(SpanKind::ToolExecution.to_string(), "tool_execution");
    }

    #[test]
    fn hit_rate_handles_zero() {
        let snap = UsageSnapshot::default();
        assert_eq!(snap.cache_hit_rate(), 0.0);

        let snap = UsageSnapshot {
            cache_hits: 3,
            cache_misses: 1,
            ..Default::default()
        };
        assert!((snap.cache_hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn provider_average_latency() {
        let usage = ProviderUsage {
            calls: 4,
            total_latency_ms: 400,
            ..Default::default()
        };
        assert_eq!(usage.avg_latency_ms(), 100);
        assert_eq!(ProviderUsage::default().avg_latency_ms(), 0);
    }
}
