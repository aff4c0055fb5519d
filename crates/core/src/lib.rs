//! # Helmsman Core
//!
//! Domain types, traits, and error definitions for the Helmsman agent runtime.
//! This crate has no framework dependencies; it defines the model that the
//! registry, router and orchestrator crates implement against.
//!
//! ## Seams
//!
//! - [`Tool`] / [`ToolSource`]: what the orchestrator can invoke, and where it comes from
//! - [`Provider`]: one model backend
//! - [`Decider`]: anything that turns a prompt + history into a [`Decision`]

pub mod decision;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use decision::{Decider, Decision, DecisionRequest, NO_TOOL};
pub use error::{Error, ProviderError, RegistryError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationHistory, Message, Role};
pub use provider::{Completion, CompletionRequest, Provider, TokenSink, Usage};
pub use tool::{Tool, ToolInvocation, ToolOrigin, ToolSet, ToolSource};

/// Re-exported so downstream crates share one token type.
pub use tokio_util::sync::CancellationToken;
