//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the agent act: every operation exposed by a tool server
//! is proxied as a `Tool`, and so are the registry's own meta-tools. Identity
//! is the name; a later tool with the same name replaces an earlier one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::error::ToolError;

/// Where a tool came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "server", rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Provided by the runtime itself (e.g. `list_servers`).
    Builtin,
    /// Proxied from a connected tool server.
    Server(String),
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Server(name) => write!(f, "server:{name}"),
        }
    }
}

/// The core Tool trait.
///
/// `execute` receives arbitrary JSON arguments and the turn's cancellation
/// token; the returned value is opaque to the runtime and is JSON-encoded
/// for history and supervisor checks.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file", "start_server").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    /// Provenance of this tool.
    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Builtin
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolError>;
}

/// One requested tool invocation, as produced by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A flat name → tool mapping. Insertion replaces (last-write-wins).
///
/// Names are matched case-insensitively, since decisions carry lowercased
/// tool names. Each tool keeps its own spelling for listings and remote calls.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool, returning the one it replaced (if any).
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_lowercase(), tool)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(&name.to_lowercase())
    }

    /// Tool names as the tools spell them, sorted case-insensitively.
    pub fn names(&self) -> Vec<&str> {
        self.tools.values().map(|t| t.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Anything that can produce the current set of reachable tools.
///
/// Implemented by the tool provider registry; the orchestrator only sees this.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn tools(&self) -> ToolSet;
}

#[async_trait]
impl ToolSource for ToolSet {
    async fn tools(&self) -> ToolSet {
        self.clone()
    }
}
