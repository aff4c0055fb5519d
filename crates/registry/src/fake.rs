//! An in-process tool server speaking the stdio protocol over `tokio::io::duplex`.

use crate::descriptor::ServerDescriptor;
use crate::protocol::PROTOCOL_VERSION;
use crate::transport::{Launcher, Transport};
use async_trait::async_trait;
use helmsman_core::RegistryError;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Behaviour of one fake server.
///
/// `tools/call` echoes `{"tool", "server", "args"}` as JSON text. A tool named
/// `fail` reports `isError`, and a tool named `hang` never answers.
#[derive(Clone)]
pub(crate) struct FakeServer {
    pub name: String,
    pub tools: Vec<String>,
    pub page_size: Option<usize>,
    pub fail_initialize: bool,
    pub silent: bool,
    pub crash_after_handshake: bool,
    /// Every method received, notifications included.
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            page_size: None,
            fail_initialize: false,
            silent: false,
            crash_after_handshake: false,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn crash_after_handshake(mut self) -> Self {
        self.crash_after_handshake = true;
        self
    }
}

/// Start a fake server and return the client side of its transport.
pub(crate) fn spawn_fake(fake: FakeServer) -> Transport {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(serve(server, fake));
    let (reader, writer) = tokio::io::split(client);
    Transport::from_io(reader, writer)
}

async fn serve(stream: tokio::io::DuplexStream, server: FakeServer) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        server.seen.lock().unwrap().push(method.clone());

        if method == "notifications/initialized" && server.crash_after_handshake {
            return;
        }
        let Some(id) = msg.get("id").cloned() else {
            continue;
        };
        if server.silent {
            continue;
        }

        let params = &msg["params"];
        let reply = match method.as_str() {
            "initialize" if server.fail_initialize => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32603, "message": "boom"}
            }),
            "initialize" => json!({
                "jsonrpc": "2.0", "id": id,
                "result": {
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": server.name, "version": "0.0.1"}
                }
            }),
            "tools/list" => {
                let offset: usize = params["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let size = server.page_size.unwrap_or(server.tools.len().max(1));
                let end = (offset + size).min(server.tools.len());
                let page: Vec<Value> = server.tools[offset..end]
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "description": format!("{name} from {}", server.name),
                            "inputSchema": {"type": "object"}
                        })
                    })
                    .collect();
                let mut result = json!({ "tools": page });
                if end < server.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                json!({"jsonrpc": "2.0", "id": id, "result": result})
            }
            "tools/call" => {
                let tool = params["name"].as_str().unwrap_or_default();
                match tool {
                    "hang" => continue,
                    "fail" => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"content": [{"type": "text", "text": "it broke"}], "isError": true}
                    }),
                    _ => {
                        let body = json!({
                            "tool": tool,
                            "server": server.name,
                            "args": params["arguments"],
                        });
                        json!({
                            "jsonrpc": "2.0", "id": id,
                            "result": {"content": [{"type": "text", "text": body.to_string()}]}
                        })
                    }
                }
            }
            _ => json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": "method not found"}
            }),
        };

        let mut out = reply.to_string();
        out.push('\n');
        if writer.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// A launcher that starts fake servers by descriptor name and counts launches.
#[derive(Default)]
pub(crate) struct FakeLauncher {
    servers: HashMap<String, FakeServer>,
    launches: Mutex<HashMap<String, usize>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, server: FakeServer) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }

    pub fn launch_count(&self, name: &str) -> usize {
        self.launches.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, descriptor: &ServerDescriptor) -> Result<Transport, RegistryError> {
        *self
            .launches
            .lock()
            .unwrap()
            .entry(descriptor.name.clone())
            .or_default() += 1;

        match self.servers.get(&descriptor.name) {
            Some(server) => Ok(spawn_fake(server.clone())),
            None => Err(RegistryError::Spawn {
                server: descriptor.name.clone(),
                reason: format!("{}: command not found", descriptor.command),
            }),
        }
    }
}
