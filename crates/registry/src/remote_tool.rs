//! Proxies a tool served by a connected tool server.

use crate::client::ServerConnection;
use crate::protocol::RemoteToolInfo;
use async_trait::async_trait;
use helmsman_core::{CancellationToken, RegistryError, Tool, ToolError, ToolOrigin};
use std::sync::Arc;
use tracing::debug;

/// A remote tool. Invocation goes over the owning server's connection.
pub struct RemoteTool {
    server: String,
    info: RemoteToolInfo,
    description: String,
    connection: Arc<ServerConnection>,
}

impl RemoteTool {
    pub fn new(connection: Arc<ServerConnection>, info: RemoteToolInfo) -> Self {
        let description = info.description.clone().unwrap_or_default();
        Self {
            server: connection.name().to_string(),
            info,
            description,
            connection,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.info.input_schema.clone()
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Server(self.server.clone())
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        let args = if args.is_null() {
            serde_json::json!({})
        } else {
            args
        };

        let result = self
            .connection
            .call_tool(&self.info.name, args, cancel)
            .await
            .map_err(|e| match e {
                RegistryError::Cancelled => ToolError::Cancelled {
                    tool_name: self.info.name.clone(),
                },
                RegistryError::Timeout { timeout_secs, .. } => ToolError::Timeout {
                    tool_name: self.info.name.clone(),
                    timeout_secs,
                },
                other => ToolError::ExecutionFailed {
                    tool_name: self.info.name.clone(),
                    reason: other.to_string(),
                },
            })?;

        if result.is_error {
            debug!(server = %self.server, tool = %self.info.name, "Tool reported an error");
            return Err(ToolError::ExecutionFailed {
                tool_name: self.info.name.clone(),
                reason: result.text(),
            });
        }

        Ok(result.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionTimeouts;
    use crate::fake::{FakeServer, spawn_fake};

    async fn connect(server: FakeServer) -> Arc<ServerConnection> {
        let name = server.name.clone();
        ServerConnection::connect(name, spawn_fake(server), ConnectionTimeouts::default())
            .await
            .unwrap()
    }

    fn info(name: &str) -> RemoteToolInfo {
        serde_json::from_value(serde_json::json!({"name": name, "description": "d"})).unwrap()
    }

    #[tokio::test]
    async fn remote_tool_round_trips_arguments() {
        let conn = connect(FakeServer::new("fs").with_tools(&["read_file"])).await;
        let tool = RemoteTool::new(conn, info("read_file"));

        assert_eq!(tool.origin(), ToolOrigin::Server("fs".into()));
        let out = tool
            .execute(serde_json::json!({"path": "a.txt"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["args"]["path"], "a.txt");
        assert_eq!(out["server"], "fs");
    }

    #[tokio::test]
    async fn is_error_becomes_execution_failed() {
        let conn = connect(FakeServer::new("fs").with_tools(&["fail"])).await;
        let tool = RemoteTool::new(conn, info("fail"));

        let err = tool
            .execute(serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "fail");
                assert_eq!(reason, "it broke");
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_call_is_tool_cancelled() {
        let conn = connect(FakeServer::new("slow").with_tools(&["hang"])).await;
        let tool = RemoteTool::new(conn, info("hang"));

        let token = CancellationToken::new();
        token.cancel();
        let err = tool.execute(serde_json::json!({}), &token).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled { .. }));
    }
}
