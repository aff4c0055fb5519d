//! Thread-safe telemetry engine: collects spans, keeps running totals and
//! serves usage snapshots.

use crate::TelemetryError;
use crate::model::*;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Spans retained before the oldest are pruned.
const MAX_SPANS: usize = 5_000;

/// The core telemetry engine.
///
/// Thread-safe via `RwLock`. A disabled engine accepts every call and
/// records nothing.
pub struct TelemetryEngine {
    enabled: bool,
    /// Recorded spans (most recent last).
    spans: RwLock<VecDeque<Span>>,
    /// Running totals.
    totals: RwLock<UsageSnapshot>,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            spans: RwLock::new(VecDeque::new()),
            totals: RwLock::new(UsageSnapshot::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Record one model call against one provider.
    pub fn record_llm_call(
        &self,
        provider: &str,
        model: &str,
        latency: Duration,
        tokens: Option<(u32, u32)>,
        success: bool,
    ) {
        if !self.enabled {
            return;
        }
        let latency_ms = latency.as_millis() as u64;
        let mut span = Span::new(SpanKind::LlmCall, model, provider, latency_ms, success);
        if let Some((input, output)) = tokens {
            span = span.with_tokens(input, output);
        }

        {
            let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
            totals.llm_calls += 1;
            if !success {
                totals.failed_llm_calls += 1;
            }
            totals.input_tokens += span.input_tokens.unwrap_or(0) as u64;
            totals.output_tokens += span.output_tokens.unwrap_or(0) as u64;

            let entry = totals.by_provider.entry(provider.to_string()).or_default();
            entry.calls += 1;
            if !success {
                entry.failures += 1;
            }
            entry.input_tokens += span.input_tokens.unwrap_or(0) as u64;
            entry.output_tokens += span.output_tokens.unwrap_or(0) as u64;
            entry.total_latency_ms += latency_ms;
        }

        tracing::debug!(
            provider,
            model,
            latency_ms,
            tokens = span.total_tokens(),
            success,
            "Model call metered"
        );
        self.push_span(span);
    }

    /// Record one tool execution.
    pub fn record_tool(&self, tool: &str, origin: &str, duration: Duration, success: bool) {
        if !self.enabled {
            return;
        }
        {
            let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
            totals.tool_executions += 1;
            if !success {
                totals.failed_tool_executions += 1;
            }
        }
        self.push_span(Span::new(
            SpanKind::ToolExecution,
            tool,
            origin,
            duration.as_millis() as u64,
            success,
        ));
    }

    pub fn record_cache_hit(&self) {
        self.bump(|t| t.cache_hits += 1);
    }

    pub fn record_cache_miss(&self) {
        self.bump(|t| t.cache_misses += 1);
    }

    /// Record a merged provider call carrying `size` requests.
    pub fn record_batch(&self, size: usize) {
        self.bump(|t| {
            t.batches_dispatched += 1;
            t.batched_requests += size as u64;
        });
    }

    /// Record a request that had to be re-sent on its own.
    pub fn record_batch_fallback(&self) {
        self.bump(|t| t.batch_fallbacks += 1);
    }

    fn bump(&self, f: impl FnOnce(&mut UsageSnapshot)) {
        if !self.enabled {
            return;
        }
        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut totals);
    }

    fn push_span(&self, span: Span) {
        let mut spans = self.spans.write().unwrap_or_else(PoisonError::into_inner);
        if spans.len() >= MAX_SPANS {
            // Drop the oldest tenth in one go
            let drain_count = MAX_SPANS / 10;
            spans.drain(..drain_count);
        }
        spans.push_back(span);
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Get a real-time usage snapshot.
    pub fn snapshot(&self) -> UsageSnapshot {
        self.totals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recent spans, most recent first.
    pub fn recent_spans(&self, limit: usize) -> Vec<Span> {
        let spans = self.spans.read().unwrap_or_else(PoisonError::into_inner);
        spans.iter().rev().take(limit).cloned().collect()
    }

    pub fn span_count(&self) -> usize {
        self.spans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Serialize the current snapshot for display or export.
    pub fn snapshot_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
