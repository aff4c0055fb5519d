//! A live JSON-RPC connection to one tool server.
//!
//! Requests are correlated by id: each request parks a oneshot sender in the
//! pending map and a reader task routes every response line to its waiter.

use crate::protocol::*;
use crate::transport::Transport;
use helmsman_config::ServersConfig;
use helmsman_core::{CancellationToken, RegistryError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PendingMap = Arc<Mutex<HashMap<u64, tokio::sync::oneshot::Sender<JsonRpcResponse>>>>;

/// How long to wait for the handshake and for each request.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    pub handshake: Duration,
    pub request: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            request: Duration::from_secs(120),
        }
    }
}

impl From<&ServersConfig> for ConnectionTimeouts {
    fn from(config: &ServersConfig) -> Self {
        Self {
            handshake: Duration::from_secs(config.handshake_timeout_secs),
            request: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// One running tool server.
pub struct ServerConnection {
    name: String,
    writer: tokio::sync::Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    server_info: OnceLock<ServerInfo>,
    timeouts: ConnectionTimeouts,
}

/// Releases a pending slot however the waiting future ends.
struct PendingSlot {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl ServerConnection {
    /// Take ownership of a transport and complete the handshake.
    ///
    /// On failure the transport is torn down before returning, so no half-open
    /// connection survives.
    pub async fn connect(
        name: impl Into<String>,
        transport: Transport,
        timeouts: ConnectionTimeouts,
    ) -> Result<Arc<Self>, RegistryError> {
        let name = name.into();
        let Transport {
            reader,
            writer,
            child,
        } = transport;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader_task = spawn_reader(name.clone(), reader, pending.clone(), alive.clone());

        let conn = Arc::new(Self {
            name: name.clone(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            child: tokio::sync::Mutex::new(child),
            next_id: AtomicU64::new(1),
            pending,
            alive,
            reader_task,
            server_info: OnceLock::new(),
            timeouts,
        });

        let outcome = tokio::time::timeout(timeouts.handshake, conn.handshake()).await;
        let reason = match outcome {
            Ok(Ok(init)) => {
                info!(
                    server = %name,
                    remote_name = %init.server_info.name,
                    remote_version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    "Tool server connected"
                );
                let _ = conn.server_info.set(init.server_info);
                return Ok(conn);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no response within {}s", timeouts.handshake.as_secs()),
        };

        conn.shutdown().await;
        Err(RegistryError::Handshake {
            server: name,
            reason,
        })
    }

    async fn handshake(&self) -> Result<InitializeResult, RegistryError> {
        let result = self
            .request(METHOD_INITIALIZE, Some(initialize_params()), None)
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| RegistryError::Protocol(format!("invalid initialize result: {e}")))?;
        self.write_message(&JsonRpcNotification::new(METHOD_INITIALIZED))
            .await?;
        Ok(init)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server reported about itself during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.get()
    }

    /// Whether the server is still reachable (its output stream is open).
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// List every tool, following `nextCursor` pagination.
    pub async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, RegistryError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let result = self.request(METHOD_LIST_TOOLS, Some(params), None).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| RegistryError::Protocol(format!("invalid tools/list result: {e}")))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke one tool. Resolves early with `Cancelled` when `cancel` fires.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, RegistryError> {
        debug!(server = %self.name, tool, "Calling tool");
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let result = self
            .request(METHOD_CALL_TOOL, Some(params), Some(cancel))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| RegistryError::Protocol(format!("invalid tools/call result: {e}")))
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, RegistryError> {
        if !self.is_alive() {
            return Err(RegistryError::Transport(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _slot = PendingSlot {
            pending: self.pending.clone(),
            id,
        };

        self.write_message(&JsonRpcRequest::new(id, method, params))
            .await?;

        let wait = tokio::time::timeout(self.timeouts.request, rx);
        let outcome = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(RegistryError::Cancelled),
                outcome = wait => outcome,
            },
            None => wait.await,
        };

        let response = outcome
            .map_err(|_| {
                warn!(server = %self.name, method, "Request timed out");
                RegistryError::Timeout {
                    method: method.to_string(),
                    timeout_secs: self.timeouts.request.as_secs(),
                }
            })?
            .map_err(|_| {
                RegistryError::Transport(format!("'{}' closed the connection", self.name))
            })?;

        if let Some(error) = response.error {
            return Err(RegistryError::Remote {
                server: self.name.clone(),
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| RegistryError::Protocol(format!("'{method}' response has no result")))
    }

    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), RegistryError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| RegistryError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            RegistryError::Transport(format!("connection to '{}' is closed", self.name))
        })?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close stdin, kill the child and stop the reader. Waiters see a closed
    /// connection.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }

        self.reader_task.abort();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(server = %self.name, "Connection shut down");
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        // The child is killed on drop by tokio; the reader must be stopped here.
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn spawn_reader(
    server: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(server = %server, error = %e, "Ignoring non-JSON output line");
                    continue;
                }
            };

            // Server-initiated notifications and requests are not supported.
            if value.get("method").is_some() {
                debug!(server = %server, method = %value["method"], "Ignoring server message");
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(server = %server, error = %e, "Malformed JSON-RPC response");
                    continue;
                }
            };

            let Some(id) = response.numeric_id() else {
                warn!(server = %server, "Response without a numeric id");
                continue;
            };

            let waiter = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(server = %server, id, "Response for unknown or abandoned request"),
            }
        }

        alive.store(false, Ordering::SeqCst);
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(server = %server, "Output stream closed");
    })
}
