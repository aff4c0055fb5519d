//! Built-in meta-tools: let the agent inspect and start tool servers.
//!
//! These are always offered, whatever is connected, so an agent can bootstrap
//! a missing dependency itself. They hold a weak reference so the registry's
//! tool set never keeps the registry alive.

use crate::registry::ToolProviderRegistry;
use async_trait::async_trait;
use helmsman_core::{CancellationToken, Tool, ToolError};
use std::sync::Weak;

pub const LIST_SERVERS: &str = "list_servers";
pub const START_SERVER: &str = "start_server";

fn upgrade(
    registry: &Weak<ToolProviderRegistry>,
    tool: &str,
) -> Result<std::sync::Arc<ToolProviderRegistry>, ToolError> {
    registry.upgrade().ok_or_else(|| ToolError::ExecutionFailed {
        tool_name: tool.into(),
        reason: "tool registry has shut down".into(),
    })
}

pub struct ListServersTool {
    registry: Weak<ToolProviderRegistry>,
}

impl ListServersTool {
    pub fn new(registry: Weak<ToolProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ListServersTool {
    fn name(&self) -> &str {
        LIST_SERVERS
    }

    fn description(&self) -> &str {
        "List every known tool server with its origin and whether it is running."
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        let registry = upgrade(&self.registry, LIST_SERVERS)?;
        let servers = registry.list_servers().await;
        serde_json::to_value(servers).map_err(|e| ToolError::ExecutionFailed {
            tool_name: LIST_SERVERS.into(),
            reason: e.to_string(),
        })
    }
}

pub struct StartServerTool {
    registry: Weak<ToolProviderRegistry>,
}

impl StartServerTool {
    pub fn new(registry: Weak<ToolProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for StartServerTool {
    fn name(&self) -> &str {
        START_SERVER
    }

    fn description(&self) -> &str {
        "Start a known tool server by name so its tools become available. Safe to call if already running."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Server name as shown by list_servers"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        let name = args["name"]
            .as_str()
            .or_else(|| args["server"].as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'name' argument".into()))?;

        let registry = upgrade(&self.registry, START_SERVER)?;
        let started = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ToolError::Cancelled { tool_name: START_SERVER.into() });
            }
            started = registry.start_server(name) => started,
        };

        started
            .map(serde_json::Value::String)
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: START_SERVER.into(),
                reason: e.to_string(),
            })
    }
}
