//! The tool provider registry.
//!
//! Holds the descriptor arena and the live connections, and flattens every
//! connected server's tools (plus the meta-tools) into one [`ToolSet`].

use crate::client::{ConnectionTimeouts, ServerConnection};
use crate::descriptor::{ServerDescriptor, ServerOrigin};
use crate::discovery::DiscoverySources;
use crate::meta::{ListServersTool, StartServerTool};
use crate::remote_tool::RemoteTool;
use crate::transport::{Launcher, ProcessLauncher};
use async_trait::async_trait;
use chrono::Utc;
use helmsman_core::{DomainEvent, EventBus, RegistryError, Tool, ToolSet, ToolSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Running,
    Stopped,
}

/// One row of `list_servers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub origin: ServerOrigin,
    pub status: ServerState,
}

pub struct ToolProviderRegistry {
    sources: DiscoverySources,
    launcher: Arc<dyn Launcher>,
    timeouts: ConnectionTimeouts,
    /// Immutable descriptors keyed by name. Replaced wholesale by `discover`.
    descriptors: RwLock<BTreeMap<String, ServerDescriptor>>,
    /// Live connections in start order; later entries win on tool name clashes.
    connections: RwLock<Vec<Arc<ServerConnection>>>,
    /// Serializes start/stop so a server is never spawned twice.
    lifecycle: Mutex<()>,
    events: Option<Arc<EventBus>>,
    self_ref: Weak<ToolProviderRegistry>,
}

/// Builder for [`ToolProviderRegistry`].
pub struct RegistryBuilder {
    sources: DiscoverySources,
    launcher: Arc<dyn Launcher>,
    timeouts: ConnectionTimeouts,
    events: Option<Arc<EventBus>>,
}

impl RegistryBuilder {
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn timeouts(mut self, timeouts: ConnectionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Arc<ToolProviderRegistry> {
        Arc::new_cyclic(|self_ref| ToolProviderRegistry {
            sources: self.sources,
            launcher: self.launcher,
            timeouts: self.timeouts,
            descriptors: RwLock::new(BTreeMap::new()),
            connections: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
            events: self.events,
            self_ref: self_ref.clone(),
        })
    }
}

impl ToolProviderRegistry {
    pub fn builder(sources: DiscoverySources) -> RegistryBuilder {
        RegistryBuilder {
            sources,
            launcher: Arc::new(ProcessLauncher),
            timeouts: ConnectionTimeouts::default(),
            events: None,
        }
    }

    /// Rebuild the descriptor arena from the discovery sources.
    ///
    /// Never starts a process. Connections whose descriptor disappeared are
    /// stopped. Returns the number of known servers.
    pub async fn discover(&self) -> usize {
        let arena = self.sources.discover();
        let count = arena.len();
        info!(
            configured = arena.values().filter(|d| d.origin == ServerOrigin::Configured).count(),
            auto_discovered = arena
                .values()
                .filter(|d| d.origin == ServerOrigin::AutoDiscovered)
                .count(),
            "Discovered tool servers"
        );
        self.replace_descriptors(arena).await;
        count
    }

    /// Add one descriptor without touching the others.
    pub async fn register(&self, descriptor: ServerDescriptor) {
        self.descriptors
            .write()
            .await
            .insert(descriptor.name.clone(), descriptor);
    }

    async fn replace_descriptors(&self, arena: BTreeMap<String, ServerDescriptor>) {
        let _guard = self.lifecycle.lock().await;
        let orphaned: Vec<Arc<ServerConnection>> = {
            let mut connections = self.connections.write().await;
            let (keep, orphaned): (Vec<_>, Vec<_>) = connections
                .drain(..)
                .partition(|c| arena.contains_key(c.name()));
            *connections = keep;
            orphaned
        };
        *self.descriptors.write().await = arena;

        for conn in orphaned {
            warn!(server = %conn.name(), "Descriptor removed; stopping server");
            self.close(&conn).await;
        }
    }

    /// Every known server with its origin and whether it is connected.
    pub async fn list_servers(&self) -> Vec<ServerStatus> {
        let descriptors = self.descriptors.read().await;
        let connections = self.connections.read().await;
        descriptors
            .values()
            .map(|d| {
                let running = connections
                    .iter()
                    .any(|c| c.name() == d.name && c.is_alive());
                ServerStatus {
                    name: d.name.clone(),
                    origin: d.origin,
                    status: if running {
                        ServerState::Running
                    } else {
                        ServerState::Stopped
                    },
                }
            })
            .collect()
    }

    /// Start a server by name.
    ///
    /// Idempotent: a running server is left alone. On spawn or handshake
    /// failure nothing is registered.
    pub async fn start_server(&self, name: &str) -> Result<String, RegistryError> {
        let _guard = self.lifecycle.lock().await;

        if let Some(existing) = self.connection(name).await {
            if existing.is_alive() {
                return Ok(format!("Server '{name}' is already running"));
            }
            warn!(server = %name, "Replacing dead connection");
            self.remove_connection(name).await;
            existing.shutdown().await;
        }

        let descriptor = self
            .descriptors
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownServer(name.to_string()))?;

        let transport = self.launcher.launch(&descriptor).await?;
        let conn = ServerConnection::connect(name, transport, self.timeouts).await?;

        let tool_count = match conn.list_tools().await {
            Ok(tools) => tools.len(),
            Err(e) => {
                warn!(server = %name, error = %e, "Started, but listing tools failed");
                0
            }
        };

        self.connections.write().await.push(conn);
        info!(server = %name, tool_count, "Tool server started");
        self.publish(DomainEvent::ServerStarted {
            server: name.to_string(),
            tool_count,
            timestamp: Utc::now(),
        });

        Ok(format!("Started server '{name}' with {tool_count} tool(s)"))
    }

    /// Stop a server. Returns whether it was running.
    pub async fn stop_server(&self, name: &str) -> bool {
        let _guard = self.lifecycle.lock().await;
        match self.remove_connection(name).await {
            Some(conn) => {
                self.close(&conn).await;
                true
            }
            None => false,
        }
    }

    /// Stop every connection.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let all: Vec<_> = self.connections.write().await.drain(..).collect();
        for conn in all {
            self.close(&conn).await;
        }
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.connection(name)
            .await
            .is_some_and(|c| c.is_alive())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// The meta-tools plus every tool of every live connection.
    ///
    /// A connection that fails to list its tools is logged and skipped. On a
    /// name clash the later-started server wins.
    pub async fn get_tools(&self) -> ToolSet {
        let mut set = ToolSet::new();
        set.insert(Arc::new(ListServersTool::new(self.self_ref.clone())));
        set.insert(Arc::new(StartServerTool::new(self.self_ref.clone())));

        let connections: Vec<_> = self.connections.read().await.clone();
        for conn in connections {
            if !conn.is_alive() {
                warn!(server = %conn.name(), "Skipping dead tool server");
                continue;
            }

            let tools = match conn.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %conn.name(), error = %e, "Failed to list tools; skipping server");
                    continue;
                }
            };

            for info in tools {
                let tool = Arc::new(RemoteTool::new(conn.clone(), info));
                if let Some(previous) = set.insert(tool.clone()) {
                    warn!(
                        tool = %tool.name(),
                        previous = %previous.origin(),
                        winner = %tool.origin(),
                        "Tool name collision; later server wins"
                    );
                }
            }
        }

        set
    }

    async fn connection(&self, name: &str) -> Option<Arc<ServerConnection>> {
        self.connections
            .read()
            .await
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    async fn remove_connection(&self, name: &str) -> Option<Arc<ServerConnection>> {
        let mut connections = self.connections.write().await;
        let idx = connections.iter().position(|c| c.name() == name)?;
        Some(connections.remove(idx))
    }

    async fn close(&self, conn: &ServerConnection) {
        conn.shutdown().await;
        info!(server = %conn.name(), "Tool server stopped");
        self.publish(DomainEvent::ServerStopped {
            server: conn.name().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

#[async_trait]
impl ToolSource for ToolProviderRegistry {
    async fn tools(&self) -> ToolSet {
        self.get_tools().await
    }
}
