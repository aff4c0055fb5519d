//! Metering for Helmsman.
//!
//! Every model call the router makes is recorded as a span (provider, model,
//! latency, tokens, outcome). Cache hits and misses, batch dispatches and
//! batch fallbacks are counted; tool executions get spans of their own.

pub mod engine;
pub mod model;

pub use engine::TelemetryEngine;
pub use model::{ProviderUsage, Span, SpanKind, UsageSnapshot};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
